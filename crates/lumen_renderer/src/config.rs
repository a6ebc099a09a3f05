//! Render configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::{RenderError, RenderResult};
use crate::frame::DEFAULT_GAMMA;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 48;

/// Render configuration.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Worker thread count
    pub threads: usize,
    /// Maximum number of mirror bounces after the primary hit
    pub max_reflection_depth: u32,
    /// Ambient occlusion rays per hit (0 disables AO)
    pub ao_samples: u32,
    /// Use the GPU intersection backend
    pub gpu: bool,
    /// Base seed for the per-tile AO random streams
    pub seed: u64,
    /// Exponent of the display curve
    pub gamma: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            max_reflection_depth: 2,
            ao_samples: 30,
            gpu: false,
            seed: 0,
            gamma: DEFAULT_GAMMA,
        }
    }
}

impl RenderConfig {
    /// Set image resolution.
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the tile size.
    pub fn with_tile_size(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.tile_width = tile_width;
        self.tile_height = tile_height;
        self
    }

    /// Set the worker count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set quality settings.
    pub fn with_quality(mut self, max_reflection_depth: u32, ao_samples: u32) -> Self {
        self.max_reflection_depth = max_reflection_depth;
        self.ao_samples = ao_samples;
        self
    }

    /// Select the intersection backend.
    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Load a config from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot run.
    pub fn validate(&self) -> RenderResult<()> {
        let invalid = |msg: &str| Err(RenderError::InvalidConfig(msg.to_string()));

        if self.width == 0 || self.height == 0 {
            return invalid("image size must be non-zero");
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return invalid("tile size must be non-zero");
        }
        if self.threads == 0 {
            return invalid("at least one worker thread is required");
        }
        if !(self.gamma > 0.0) {
            return invalid("gamma must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RenderConfig::default();
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!((config.tile_width, config.tile_height), (48, 48));
        assert_eq!(config.max_reflection_depth, 2);
        assert_eq!(config.ao_samples, 30);
        assert!(!config.gpu);
        assert!(config.threads >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RenderConfig = serde_json::from_str(r#"{"width": 64, "gpu": true}"#).unwrap();
        assert_eq!(config.width, 64);
        assert_eq!(config.height, 600);
        assert!(config.gpu);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = RenderConfig::default().with_resolution(0, 10);
        assert!(matches!(config.validate(), Err(RenderError::InvalidConfig(_))));

        let config = RenderConfig::default().with_tile_size(16, 0);
        assert!(config.validate().is_err());

        let config = RenderConfig::default().with_threads(0);
        assert!(config.validate().is_err());
    }
}
