//! Tile decomposition of the frame.
//!
//! Divides the image into tiles that can be rendered independently by
//! the scheduler's workers.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::camera::Camera;
use crate::error::RenderResult;
use crate::frame::{tone_map, FrameBuffer};
use crate::integrator::{average, Integrator};

/// Anti-aliasing rays per pixel
const SUB_RAYS: usize = 4;

/// A rectangular region of the image to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// X coordinate of the tile's lower-left corner
    pub x: u32,
    /// Y coordinate of the tile's lower-left corner
    pub y: u32,
    /// Width of the tile in pixels
    pub width: u32,
    /// Height of the tile in pixels
    pub height: u32,
    /// Index of this tile in the render order
    pub index: usize,
}

impl Tile {
    pub fn new(x: u32, y: u32, width: u32, height: u32, index: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            index,
        }
    }

    /// Get the total number of pixels in this tile.
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Generate tiles for an image, sorted in spiral order from center.
///
/// Tiles on the right and top edges are shortened to fit. Index 0 is
/// the tile nearest the center.
pub fn generate_tiles(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Vec<Tile> {
    if tile_width == 0 || tile_height == 0 {
        return Vec::new();
    }

    let mut tiles = Vec::new();
    let mut index = 0;

    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let tw = tile_width.min(width - x);
            let th = tile_height.min(height - y);
            tiles.push(Tile::new(x, y, tw, th, index));
            index += 1;
            x += tile_width;
        }
        y += tile_height;
    }

    sort_spiral(&mut tiles, width, height);

    for (i, tile) in tiles.iter_mut().enumerate() {
        tile.index = i;
    }

    tiles
}

/// Sort tiles by distance from image center (spiral order).
fn sort_spiral(tiles: &mut [Tile], width: u32, height: u32) {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;

    let dist = |t: &Tile| {
        let cx = t.x as f32 + t.width as f32 / 2.0;
        let cy = t.y as f32 + t.height as f32 / 2.0;
        (cx - center_x).powi(2) + (cy - center_y).powi(2)
    };

    tiles.sort_by(|a, b| dist(a).partial_cmp(&dist(b)).unwrap_or(std::cmp::Ordering::Equal));
}

/// Seed of the AO stream for the tile whose origin is `(x, y)`.
///
/// Depends only on the base seed and the tile position, never on the
/// worker that renders it.
pub fn tile_seed(seed: u64, x: u32, y: u32) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ ((u64::from(x) << 32) | u64::from(y))
}

/// Result of rendering a tile.
#[derive(Debug, Clone)]
pub struct TileResult {
    /// The tile that was rendered
    pub tile: Tile,
    /// Tone-mapped pixels, tile-sized
    pub image: FrameBuffer,
}

/// Render a single tile into a private, tone-mapped image.
///
/// All `4 * width * height` sub-rays of the tile are traced as one
/// wavefront, so a batched backend sees one query per stage.
pub fn render_tile(
    tile: &Tile,
    integrator: &Integrator,
    camera: &Camera,
    seed: u64,
    gamma: f32,
) -> RenderResult<TileResult> {
    let mut rng = StdRng::seed_from_u64(tile_seed(seed, tile.x, tile.y));
    let mut image = FrameBuffer::new(tile.width, tile.height);

    let mut rays = Vec::with_capacity(tile.pixel_count() as usize * SUB_RAYS);
    for local_y in 0..tile.height {
        for local_x in 0..tile.width {
            rays.extend(camera.pixel_rays(tile.x + local_x, tile.y + local_y));
        }
    }

    let colors = integrator.trace_batch(&rays, 0, &mut rng)?;
    for (i, samples) in colors.chunks(SUB_RAYS).enumerate() {
        let i = i as u32;
        let color = average(samples);
        image.set_pixel(i % tile.width, i / tile.width, tone_map(color, gamma));
    }

    Ok(TileResult { tile: *tile, image })
}
