//! Error type shared by the intersection backends, the integrator and the
//! scheduler.

use thiserror::Error;

/// Errors that can occur while setting up or running a render.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("GPU initialization failed: {0}")]
    GpuInit(String),

    #[error("GPU device request failed: {0}")]
    GpuDevice(#[from] wgpu::RequestDeviceError),

    #[error("GPU batch failed: {0}")]
    GpuBatch(String),

    #[error("Invalid render configuration: {0}")]
    InvalidConfig(String),

    #[error("Render worker {worker} panicked: {message}")]
    WorkerPanicked { worker: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

pub type RenderResult<T> = Result<T, RenderError>;
