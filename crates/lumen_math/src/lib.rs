// Re-export glam for convenience
pub use glam::*;

// Lumen math types
mod ray;
pub use ray::Ray;

/// Tolerance shared by the intersection tests and the shading code.
///
/// Determinants, discriminants and ray parameters closer to zero than this
/// are treated as degenerate.
pub const EPSILON: f32 = 1e-4;

/// Mirror `v` about the plane with normal `n`.
///
/// `n` is expected to be unit length; `v` can have any length.
#[inline]
pub fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * n * v.dot(n)
}
