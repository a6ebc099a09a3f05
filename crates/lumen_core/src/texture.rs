//! Texture loading and caching for materials.
//!
//! Textures are addressed in texel units: the scene loader scales UVs by
//! the texture size (and the material's scale factors) once, so shading
//! only has to floor and wrap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen_math::Vec2;
use thiserror::Error;

/// Errors that can occur during texture loading.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to load texture {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Empty texture: {0}")]
    Empty(String),
}

pub type TextureResult<T> = Result<T, TextureError>;

/// A loaded texture with pixel data.
#[derive(Clone, Debug)]
pub struct Texture {
    /// Texture width in pixels
    pub width: u32,

    /// Texture height in pixels
    pub height: u32,

    /// Pixel data in RGBA format (0-1 range, not linearized)
    /// Stored as [R, G, B, A] per pixel, row-major, top row first
    pub pixels: Vec<[f32; 4]>,

    /// Horizontal UV scale applied by the scene loader
    pub scale_x: f32,

    /// Vertical UV scale applied by the scene loader
    pub scale_y: f32,

    /// Source file path (for debugging)
    pub path: String,
}

impl Texture {
    /// Create a new texture from pixel data.
    pub fn from_rgba(
        width: u32,
        height: u32,
        pixels: Vec<[f32; 4]>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            width,
            height,
            pixels,
            scale_x: 1.0,
            scale_y: 1.0,
            path: path.into(),
        }
    }

    /// Set the UV scale factors.
    pub fn with_scale(mut self, scale_x: f32, scale_y: f32) -> Self {
        self.scale_x = scale_x;
        self.scale_y = scale_y;
        self
    }

    /// Load a texture from an image file.
    pub fn load(path: &Path) -> TextureResult<Self> {
        let img = image::open(path).map_err(|source| TextureError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(TextureError::Empty(path.display().to_string()));
        }

        let pixels: Vec<[f32; 4]> = rgba
            .pixels()
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();

        Ok(Self::from_rgba(
            width,
            height,
            pixels,
            path.to_string_lossy().to_string(),
        ))
    }

    /// Texel at `(x, y)` with wraparound addressing.
    ///
    /// `y` counts rows from the bottom of the image.
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        let x = x % self.width;
        let y = y % self.height;
        let row = self.height - 1 - y;
        self.pixels
            .get((row * self.width + x) as usize)
            .copied()
            .unwrap_or([0.0, 0.0, 0.0, 1.0])
    }

    /// Texel containing the continuous texel coordinate `texel`.
    ///
    /// Negative coordinates wrap the same way as positive ones.
    pub fn sample_texel(&self, texel: Vec2) -> [f32; 4] {
        let x = (texel.x.floor() as i64).rem_euclid(self.width as i64) as u32;
        let y = (texel.y.floor() as i64).rem_euclid(self.height as i64) as u32;
        self.get(x, y)
    }

    /// Texel-space multiplier for normalized UVs: size times scale.
    pub fn uv_scale(&self) -> Vec2 {
        Vec2::new(
            self.width as f32 * self.scale_x,
            self.height as f32 * self.scale_y,
        )
    }

    /// Get total size in bytes (approximate).
    pub fn size_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<[f32; 4]>()
    }
}

/// Cache for loaded textures.
///
/// Materials that reference the same image share one decoded copy.
pub struct TextureCache {
    /// Cached textures by file path
    textures: HashMap<PathBuf, Arc<Texture>>,

    /// Base directory for resolving relative paths
    base_dir: Option<PathBuf>,
}

impl TextureCache {
    /// Create a texture cache with a base directory for relative paths.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            textures: HashMap::new(),
            base_dir: Some(base_dir.into()),
        }
    }

    /// Load a texture from file, using cache if available.
    pub fn load(&mut self, path: &str) -> TextureResult<Arc<Texture>> {
        let full_path = self.resolve_path(path);

        if let Some(texture) = self.textures.get(&full_path) {
            return Ok(texture.clone());
        }

        let texture = Arc::new(Texture::load(&full_path)?);
        self.textures.insert(full_path, texture.clone());

        log::debug!(
            "Loaded texture: {} ({}x{}, {:.1} KB)",
            path,
            texture.width,
            texture.height,
            texture.size_bytes() as f32 / 1024.0
        );

        Ok(texture)
    }

    /// Resolve a path relative to the base directory.
    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);

        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(base) = &self.base_dir {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}
