//! Errors raised while building or loading a scene.

use thiserror::Error;

use crate::texture::TextureError;

/// Errors that can occur while assembling a scene.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed scene file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),

    #[error("Sphere {index} has non-positive radius {radius}")]
    InvalidRadius { index: usize, radius: f32 },

    #[error("Face {face} references missing vertex {vertex}")]
    MissingVertex { face: usize, vertex: usize },

    #[error("Unknown material index {0}")]
    MissingMaterial(usize),
}

pub type SceneResult<T> = Result<T, SceneError>;
