//! Ray-primitive intersection and the CPU intersection backend.
//!
//! Both backends share the formulas in this file: the GPU kernel is a
//! line-for-line port of [`intersect_triangle`] and [`intersect_sphere`],
//! and its host-side reduction uses [`closest_of`] so the tie-break rule is
//! identical.

use std::sync::Arc;

use lumen_core::{Scene, Sphere, Triangle};
use lumen_math::{Ray, Vec3, EPSILON};

use crate::error::RenderResult;

/// Result of a successful ray-triangle test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    /// Barycentric weight of `e1`
    pub u: f32,
    /// Barycentric weight of `e2`
    pub v: f32,
    pub point: Vec3,
    /// The triangle's precomputed face normal
    pub normal: Vec3,
}

/// Result of a successful ray-sphere test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereHit {
    pub t: f32,
    pub point: Vec3,
    /// `(point - center) / radius`
    pub normal: Vec3,
}

/// Which primitive list a hit came from, and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Triangle(usize),
    Sphere(usize),
}

/// Closest hit across the whole scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveHit {
    pub primitive: Primitive,
    pub t: f32,
    /// Barycentrics for triangles, zero for spheres
    pub u: f32,
    pub v: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

impl PrimitiveHit {
    fn from_triangle(index: usize, hit: TriangleHit) -> Self {
        Self {
            primitive: Primitive::Triangle(index),
            t: hit.t,
            u: hit.u,
            v: hit.v,
            point: hit.point,
            normal: hit.normal,
        }
    }

    fn from_sphere(index: usize, hit: SphereHit) -> Self {
        Self {
            primitive: Primitive::Sphere(index),
            t: hit.t,
            u: 0.0,
            v: 0.0,
            point: hit.point,
            normal: hit.normal,
        }
    }
}

/// Ray-triangle test in determinant (Cramer's rule) form.
///
/// Rejects near-parallel rays (`|det| < ε`), hits at `t < ε` and points
/// outside the barycentric range.
#[inline]
pub fn intersect_triangle(triangle: &Triangle, ray: &Ray) -> Option<TriangleHit> {
    let dir = ray.direction;
    let q = ray.origin - triangle.p;
    let det = dir.dot(triangle.e2.cross(triangle.e1));

    // Ray is parallel to the triangle plane
    if det.abs() < EPSILON {
        return None;
    }

    let t = q.dot(triangle.e1.cross(triangle.e2)) / det;
    if t < EPSILON {
        return None;
    }

    let u = dir.dot(triangle.e2.cross(q)) / det;
    let v = dir.dot(q.cross(triangle.e1)) / det;
    if u < 0.0 || v < 0.0 || u + v > 1.0 {
        return None;
    }

    Some(TriangleHit {
        t,
        u,
        v,
        point: ray.at(t),
        normal: triangle.normal,
    })
}

/// Ray-sphere test solving `a t² + b t + c = 0`.
///
/// Returns the smallest root greater than `ε`, so a ray starting inside the
/// sphere reports the exit point.
#[inline]
pub fn intersect_sphere(sphere: &Sphere, ray: &Ray) -> Option<SphereHit> {
    let dir = ray.direction;
    let oc = ray.origin - sphere.center;
    let a = dir.dot(dir);
    let b = 2.0 * oc.dot(dir);
    let c = oc.dot(oc) - sphere.radius * sphere.radius;
    let d = b * b - 4.0 * a * c;

    if d < 0.0 {
        return None;
    }

    let t = if d.abs() < EPSILON {
        let t = -b / (2.0 * a);
        if t <= EPSILON {
            return None;
        }
        t
    } else {
        let sqrt_d = d.sqrt();
        let t1 = (-b + sqrt_d) / (2.0 * a);
        let t2 = (-b - sqrt_d) / (2.0 * a);
        if t1 > EPSILON && t2 > EPSILON {
            t1.min(t2)
        } else if t1 > EPSILON {
            t1
        } else if t2 > EPSILON {
            t2
        } else {
            return None;
        }
    };

    let point = ray.at(t);
    Some(SphereHit {
        t,
        point,
        normal: (point - sphere.center) / sphere.radius,
    })
}

/// Closest triangle hit: minimum `t`, first minimum wins.
pub fn closest_triangle(triangles: &[Triangle], ray: &Ray) -> Option<(usize, TriangleHit)> {
    let mut closest: Option<(usize, TriangleHit)> = None;
    for (index, triangle) in triangles.iter().enumerate() {
        if let Some(hit) = intersect_triangle(triangle, ray) {
            if closest.map_or(true, |(_, best)| hit.t < best.t) {
                closest = Some((index, hit));
            }
        }
    }
    closest
}

/// Closest sphere hit: minimum `t`, first minimum wins.
pub fn closest_sphere(spheres: &[Sphere], ray: &Ray) -> Option<(usize, SphereHit)> {
    let mut closest: Option<(usize, SphereHit)> = None;
    for (index, sphere) in spheres.iter().enumerate() {
        if let Some(hit) = intersect_sphere(sphere, ray) {
            if closest.map_or(true, |(_, best)| hit.t < best.t) {
                closest = Some((index, hit));
            }
        }
    }
    closest
}

/// Merge the per-list closest hits. Triangles are scanned first, so a
/// sphere only wins when it is strictly closer.
pub fn closest_of(
    triangle: Option<(usize, TriangleHit)>,
    sphere: Option<(usize, SphereHit)>,
) -> Option<PrimitiveHit> {
    match (triangle, sphere) {
        (Some((ti, th)), Some((si, sh))) => {
            if sh.t < th.t {
                Some(PrimitiveHit::from_sphere(si, sh))
            } else {
                Some(PrimitiveHit::from_triangle(ti, th))
            }
        }
        (Some((ti, th)), None) => Some(PrimitiveHit::from_triangle(ti, th)),
        (None, Some((si, sh))) => Some(PrimitiveHit::from_sphere(si, sh)),
        (None, None) => None,
    }
}

/// Occlusion test: stops at the first accepted hit, triangles then spheres.
pub fn any_hit(scene: &Scene, ray: &Ray) -> bool {
    scene
        .triangles()
        .iter()
        .any(|triangle| intersect_triangle(triangle, ray).is_some())
        || scene
            .spheres()
            .iter()
            .any(|sphere| intersect_sphere(sphere, ray).is_some())
}

/// Trait for closest-hit / any-hit backends.
///
/// The integrator holds exactly one implementation, chosen when the render
/// is configured. Batch methods exist so a backend can amortize per-call
/// overhead; single-ray methods default to a batch of one.
pub trait Intersector: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Closest hit for every ray, in input order.
    fn closest_hits(&self, rays: &[Ray]) -> RenderResult<Vec<Option<PrimitiveHit>>>;

    /// Occlusion flag for every ray, in input order.
    fn any_hits(&self, rays: &[Ray]) -> RenderResult<Vec<bool>>;

    fn closest_hit(&self, ray: &Ray) -> RenderResult<Option<PrimitiveHit>> {
        Ok(self
            .closest_hits(std::slice::from_ref(ray))?
            .into_iter()
            .next()
            .flatten())
    }

    fn any_hit(&self, ray: &Ray) -> RenderResult<bool> {
        Ok(self
            .any_hits(std::slice::from_ref(ray))?
            .into_iter()
            .next()
            .unwrap_or(false))
    }
}

/// Sequential linear-scan backend.
pub struct CpuIntersector {
    scene: Arc<Scene>,
}

impl CpuIntersector {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

impl Intersector for CpuIntersector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn closest_hits(&self, rays: &[Ray]) -> RenderResult<Vec<Option<PrimitiveHit>>> {
        rays.iter().map(|ray| self.closest_hit(ray)).collect()
    }

    fn any_hits(&self, rays: &[Ray]) -> RenderResult<Vec<bool>> {
        Ok(rays.iter().map(|ray| any_hit(&self.scene, ray)).collect())
    }

    fn closest_hit(&self, ray: &Ray) -> RenderResult<Option<PrimitiveHit>> {
        Ok(closest_of(
            closest_triangle(self.scene.triangles(), ray),
            closest_sphere(self.scene.spheres(), ray),
        ))
    }

    fn any_hit(&self, ray: &Ray) -> RenderResult<bool> {
        Ok(any_hit(&self.scene, ray))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::{Material, MaterialId};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn triangle(p1: Vec3, p2: Vec3, p3: Vec3) -> Triangle {
        Triangle::new(p1, p2, p3, MaterialId(0)).unwrap()
    }

    fn random_vec(rng: &mut StdRng, extent: f32) -> Vec3 {
        Vec3::new(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        )
    }

    #[test]
    fn test_triangle_hit() {
        // Triangle in XY plane at z=-1
        let tri = triangle(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
        );

        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let hit = intersect_triangle(&tri, &ray).unwrap();

        assert!((hit.t - 1.0).abs() < 0.001);
        assert!((hit.point - Vec3::new(0.0, 0.0, -1.0)).length() < 0.001);
        assert_eq!(hit.normal, tri.normal);
    }

    #[test]
    fn test_triangle_miss() {
        let tri = triangle(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
        );

        // Ray pointing away
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&tri, &ray).is_none());

        // Ray beside the triangle
        let ray = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_triangle(&tri, &ray).is_none());
    }

    #[test]
    fn test_triangle_parallel_ray_misses() {
        let tri = triangle(Vec3::ZERO, Vec3::X, Vec3::Y);
        let ray = Ray::new(Vec3::new(0.2, 0.2, 0.0), Vec3::X);
        assert!(intersect_triangle(&tri, &ray).is_none());
    }

    #[test]
    fn test_centroid_rays_land_inside() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            let p1 = random_vec(&mut rng, 10.0);
            let p2 = random_vec(&mut rng, 10.0);
            let p3 = random_vec(&mut rng, 10.0);
            let Some(tri) = Triangle::new(p1, p2, p3, MaterialId(0)) else {
                continue;
            };
            // Skip slivers where float error dominates
            if tri.e1.cross(tri.e2).length() < 1e-2 {
                continue;
            }

            let centroid = tri.centroid();
            let ray = Ray::new(centroid + tri.normal * 3.0, -tri.normal);
            let hit = intersect_triangle(&tri, &ray).expect("centroid ray must hit");

            assert!(hit.u >= 0.0 && hit.v >= 0.0);
            assert!(hit.u + hit.v <= 1.0);
            assert!((hit.t - 3.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_sphere_hit() {
        let sphere = Sphere::new(Vec3::new(0.0, 0.0, -1.0), 0.5, MaterialId(0)).unwrap();
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));

        let hit = intersect_sphere(&sphere, &ray).unwrap();
        assert!((hit.t - 0.5).abs() < 0.001); // Should hit at t=0.5
        assert!((hit.normal - Vec3::Z).length() < 0.001);
    }

    #[test]
    fn test_sphere_miss() {
        let sphere = Sphere::new(Vec3::new(0.0, 0.0, -1.0), 0.5, MaterialId(0)).unwrap();

        // Ray pointing away from sphere
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0));
        assert!(intersect_sphere(&sphere, &ray).is_none());

        // Sphere entirely behind the origin
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_sphere(&sphere, &ray).is_none());
    }

    #[test]
    fn test_sphere_from_inside_hits_exit() {
        let sphere = Sphere::new(Vec3::ZERO, 2.0, MaterialId(0)).unwrap();
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        let hit = intersect_sphere(&sphere, &ray).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_rays_through_center_hit_near_side() {
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..500 {
            let center = random_vec(&mut rng, 20.0);
            let radius = rng.gen_range(0.1..5.0);
            let sphere = Sphere::new(center, radius, MaterialId(0)).unwrap();

            let dir = random_vec(&mut rng, 1.0).normalize_or_zero();
            if dir == Vec3::ZERO {
                continue;
            }
            let distance = radius + rng.gen_range(0.5..10.0);
            let origin = center - dir * distance;

            let hit = intersect_sphere(&sphere, &Ray::new(origin, dir)).unwrap();
            let near = distance - radius;
            let far = distance + radius;

            assert!((hit.t - near).abs() < 1e-3 * distance.max(1.0));
            assert!((far - hit.t - 2.0 * radius).abs() < 1e-3 * distance.max(1.0));
            assert!((hit.point - (center - dir * radius)).length() < 1e-3 * distance.max(1.0));
        }
    }

    fn scene_with(triangles: Vec<Triangle>, spheres: Vec<Sphere>) -> Scene {
        let mut scene = Scene::new();
        scene.add_material(Material::default());
        for t in triangles {
            scene.add_triangle(t).unwrap();
        }
        for s in spheres {
            scene.add_sphere(s).unwrap();
        }
        scene
    }

    #[test]
    fn test_sphere_behind_triangle_is_hidden() {
        let scene = scene_with(
            vec![triangle(
                Vec3::new(-2.0, -2.0, -2.0),
                Vec3::new(2.0, -2.0, -2.0),
                Vec3::new(0.0, 2.0, -2.0),
            )],
            vec![Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, MaterialId(0)).unwrap()],
        );
        let backend = CpuIntersector::new(Arc::new(scene));

        let hit = backend
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::NEG_Z))
            .unwrap()
            .unwrap();
        assert_eq!(hit.primitive, Primitive::Triangle(0));
        assert!((hit.t - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_closer_sphere_wins_over_triangle() {
        let scene = scene_with(
            vec![triangle(
                Vec3::new(-2.0, -2.0, -8.0),
                Vec3::new(2.0, -2.0, -8.0),
                Vec3::new(0.0, 2.0, -8.0),
            )],
            vec![Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, MaterialId(0)).unwrap()],
        );
        let backend = CpuIntersector::new(Arc::new(scene));

        let hit = backend
            .closest_hit(&Ray::new(Vec3::ZERO, Vec3::NEG_Z))
            .unwrap()
            .unwrap();
        assert_eq!(hit.primitive, Primitive::Sphere(0));
        assert!((hit.t - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_extra_geometry_keeps_closest_t() {
        let mut rng = StdRng::seed_from_u64(3);
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);
        let base = Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, MaterialId(0)).unwrap();
        let expected = closest_of(None, closest_sphere(std::slice::from_ref(&base), &ray))
            .unwrap()
            .t;

        let mut spheres = vec![base];
        let mut triangles = Vec::new();
        for _ in 0..50 {
            // Keep everything off the ray by staying at x >= 3
            let offset = Vec3::new(
                rng.gen_range(3.0..20.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-20.0..5.0),
            );
            spheres.push(Sphere::new(offset, rng.gen_range(0.1..2.0), MaterialId(0)).unwrap());
            triangles.push(triangle(offset, offset + Vec3::X, offset + Vec3::Y));

            let hit = closest_of(
                closest_triangle(&triangles, &ray),
                closest_sphere(&spheres, &ray),
            )
            .unwrap();
            assert_eq!(hit.t, expected);
            assert_eq!(hit.primitive, Primitive::Sphere(0));
        }
    }

    #[test]
    fn test_any_hit() {
        let scene = scene_with(
            vec![],
            vec![Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, MaterialId(0)).unwrap()],
        );
        let backend = CpuIntersector::new(Arc::new(scene));

        let rays = [
            Ray::new(Vec3::ZERO, Vec3::NEG_Z),
            Ray::new(Vec3::ZERO, Vec3::Z),
        ];
        assert_eq!(backend.any_hits(&rays).unwrap(), vec![true, false]);
    }

    #[test]
    fn test_empty_scene_misses() {
        let backend = CpuIntersector::new(Arc::new(Scene::new()));
        let ray = Ray::new(Vec3::ZERO, Vec3::NEG_Z);

        assert!(backend.closest_hit(&ray).unwrap().is_none());
        assert!(!backend.any_hit(&ray).unwrap());
    }
}
