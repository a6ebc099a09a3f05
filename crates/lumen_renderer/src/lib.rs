//! Lumen renderer: tile-parallel Whitted-style ray tracing.
//!
//! Intersection runs on one of two interchangeable backends, a linear CPU
//! scan or batched wgpu compute kernels. The integrator shades hits with
//! ambient occlusion, Lambert and Phong terms, shadows and bounded mirror
//! reflection; the scheduler spreads tiles over a fixed worker pool.

mod camera;
mod config;
mod error;
mod frame;
mod gpu;
mod integrator;
mod intersect;
mod scheduler;
mod tile;

use std::sync::Arc;

use lumen_core::Scene;

pub use camera::Camera;
pub use config::{RenderConfig, DEFAULT_TILE_SIZE};
pub use error::{RenderError, RenderResult};
pub use frame::{color_to_rgba, tone_map, FrameBuffer, DEFAULT_GAMMA};
pub use gpu::GpuIntersector;
pub use integrator::{random_unit_vector, sample_hemisphere, Hit, Integrator};
pub use intersect::{
    any_hit, closest_of, closest_sphere, closest_triangle, intersect_sphere, intersect_triangle,
    CpuIntersector, Intersector, Primitive, PrimitiveHit, SphereHit, TriangleHit,
};
pub use scheduler::{render_frame, render_parallel, RenderJob, RenderStats, SyncQueue};
pub use tile::{generate_tiles, render_tile, tile_seed, Tile, TileResult};

/// Re-export common math types from lumen_math
pub use lumen_math::{Ray, Vec3};

/// Build the intersection backend selected by `config.gpu`.
///
/// GPU construction failures are returned as-is; there is no silent
/// fallback to the CPU.
pub fn create_intersector(
    scene: &Arc<Scene>,
    config: &RenderConfig,
) -> RenderResult<Arc<dyn Intersector>> {
    if config.gpu {
        let gpu = GpuIntersector::new(scene)?;
        log::info!("Using GPU intersection on {}", gpu.adapter_name());
        Ok(Arc::new(gpu))
    } else {
        log::info!("Using CPU intersection");
        Ok(Arc::new(CpuIntersector::new(Arc::clone(scene))))
    }
}

/// Build an integrator for `scene` with the backend and quality settings
/// from `config`.
pub fn create_integrator(scene: Arc<Scene>, config: &RenderConfig) -> RenderResult<Integrator> {
    let intersector = create_intersector(&scene, config)?;
    Ok(Integrator::new(scene, intersector)
        .with_max_reflection_depth(config.max_reflection_depth)
        .with_ao_samples(config.ao_samples))
}
