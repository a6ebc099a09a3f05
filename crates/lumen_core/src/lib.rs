//! Lumen Core - scene model, textures and scene loading.
//!
//! This crate provides:
//!
//! - **Scene types**: `Scene`, `Material`, `Triangle`, `Sphere`, `Lamp`
//! - **Textures**: `Texture` with wraparound texel lookup
//! - **Loading**: JSON scene files resolved into an immutable `Scene`
//!
//! # Example
//!
//! ```ignore
//! use lumen_core::load_scene;
//!
//! let scene = load_scene("hello.scene")?;
//! println!("Loaded {} triangles, {} spheres, {} lamps",
//!     scene.triangles().len(),
//!     scene.spheres().len(),
//!     scene.lamps().len());
//! ```

pub mod error;
pub mod loader;
pub mod scene;
pub mod texture;

// Re-export commonly used types
pub use error::{SceneError, SceneResult};
pub use loader::{load_scene, load_scene_from_str};
pub use scene::{Color, Lamp, Material, MaterialId, Scene, Sphere, Triangle, World};
pub use texture::{Texture, TextureCache, TextureError};
