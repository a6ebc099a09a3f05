//! Pixel sink: tone mapping, tile compositing and PNG export.

use std::path::Path;

use lumen_core::Color;

use crate::error::RenderResult;

/// Default exponent of the display curve.
pub const DEFAULT_GAMMA: f32 = 0.3;

/// Map a linear radiance value to display range: `pow(c / 2.2, gamma)`.
#[inline]
pub fn tone_map(color: Color, gamma: f32) -> Color {
    let c = (color / 2.2).max(Color::ZERO);
    Color::new(c.x.powf(gamma), c.y.powf(gamma), c.z.powf(gamma))
}

/// Clamp a value to [0, 1] range.
#[inline]
pub fn clamp_01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Convert a display-range color to 8-bit RGBA.
pub fn color_to_rgba(color: Color) -> [u8; 4] {
    let r = (255.0 * clamp_01(color.x)) as u8;
    let g = (255.0 * clamp_01(color.y)) as u8;
    let b = (255.0 * clamp_01(color.z)) as u8;
    [r, g, b, 255]
}

/// Image buffer for tiles and whole frames.
///
/// Row 0 is the bottom row of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl FrameBuffer {
    /// Create a new buffer filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::ZERO; (width * height) as usize],
        }
    }

    /// Get the pixel at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Set the pixel at (x, y). Out-of-range writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = color;
        }
    }

    /// Copy `tile` into this buffer with its origin at `(x, y)`.
    ///
    /// Parts of the tile that fall outside the buffer are dropped.
    pub fn blit(&mut self, x: u32, y: u32, tile: &FrameBuffer) {
        let cols = tile.width.min(self.width.saturating_sub(x));
        let rows = tile.height.min(self.height.saturating_sub(y));

        for row in 0..rows {
            let src = (row * tile.width) as usize;
            let dst = ((y + row) * self.width + x) as usize;
            self.pixels[dst..dst + cols as usize]
                .copy_from_slice(&tile.pixels[src..src + cols as usize]);
        }
    }

    /// RGBA bytes with the top row first, as image files expect.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity((self.width * self.height * 4) as usize);
        for row in (0..self.height).rev() {
            let start = (row * self.width) as usize;
            for color in &self.pixels[start..start + self.width as usize] {
                bytes.extend_from_slice(&color_to_rgba(*color));
            }
        }
        bytes
    }

    /// Write the buffer as a PNG file.
    pub fn save_png(&self, path: impl AsRef<Path>) -> RenderResult<()> {
        let path = path.as_ref();
        image::save_buffer(
            path,
            &self.to_rgba8(),
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )?;
        log::info!("Saved {}x{} image to {}", self.width, self.height, path.display());
        Ok(())
    }
}
