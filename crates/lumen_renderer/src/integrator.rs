//! Recursive Whitted-style shading.
//!
//! Composes ambient, ambient occlusion, per-lamp diffuse and specular
//! terms with shadow tests, and bounded mirror reflection. All geometric
//! queries go through the injected [`Intersector`], so the same shading
//! code runs on either backend.

use std::sync::Arc;

use lumen_core::{Color, Lamp, Material, MaterialId, Scene};
use lumen_math::{reflect, Ray, Vec3, EPSILON};
use rand::{Rng, RngCore};

use crate::camera::Camera;
use crate::error::RenderResult;
use crate::intersect::{Intersector, Primitive, PrimitiveHit};

/// Shading record for the closest hit of a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub material: MaterialId,
    pub point: Vec3,
    /// Unit geometric normal
    pub normal: Vec3,
    /// Material color after texture lookup
    pub color: Color,
    pub t: f32,
}

/// Shading integrator over one scene and one intersection backend.
pub struct Integrator {
    scene: Arc<Scene>,
    intersector: Arc<dyn Intersector>,
    max_reflection_depth: u32,
    ao_samples: u32,
}

impl Integrator {
    pub fn new(scene: Arc<Scene>, intersector: Arc<dyn Intersector>) -> Self {
        Self {
            scene,
            intersector,
            max_reflection_depth: 2,
            ao_samples: 30,
        }
    }

    /// Set the number of mirror bounces after the primary hit.
    pub fn with_max_reflection_depth(mut self, depth: u32) -> Self {
        self.max_reflection_depth = depth;
        self
    }

    /// Set the number of ambient occlusion rays per hit.
    pub fn with_ao_samples(mut self, samples: u32) -> Self {
        self.ao_samples = samples;
        self
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Name of the active intersection backend.
    pub fn backend_name(&self) -> &'static str {
        self.intersector.name()
    }

    /// Closest hit of `ray`, with the material color resolved.
    pub fn closest_hit(&self, ray: &Ray) -> RenderResult<Option<Hit>> {
        Ok(self.intersector.closest_hit(ray)?.map(|hit| self.resolve(&hit)))
    }

    /// Closest hits of a whole batch, in one backend query.
    pub fn closest_hits(&self, rays: &[Ray]) -> RenderResult<Vec<Option<Hit>>> {
        let hits = self.intersector.closest_hits(rays)?;
        Ok(hits.iter().map(|hit| hit.as_ref().map(|h| self.resolve(h))).collect())
    }

    fn resolve(&self, hit: &PrimitiveHit) -> Hit {
        let (material, color) = match hit.primitive {
            Primitive::Triangle(index) => {
                let triangle = &self.scene.triangles()[index];
                let material = self.scene.material(triangle.material);
                (triangle.material, material.color_at(triangle.uv_at(hit.u, hit.v)))
            }
            Primitive::Sphere(index) => {
                let sphere = &self.scene.spheres()[index];
                (sphere.material, self.scene.material(sphere.material).color)
            }
        };

        Hit {
            material,
            point: hit.point,
            normal: hit.normal,
            color,
            t: hit.t,
        }
    }

    /// Color seen along `ray`. `depth` counts reflections taken so far.
    pub fn trace(&self, ray: &Ray, depth: u32, rng: &mut dyn RngCore) -> RenderResult<Color> {
        let colors = self.trace_batch(std::slice::from_ref(ray), depth, rng)?;
        Ok(colors[0])
    }

    /// Colors seen along each of `rays`, traced as one wavefront.
    ///
    /// Each stage issues a single backend query for the whole batch:
    /// closest hits, then every AO ray, then every shadow ray. Mirror
    /// bounces form the next wavefront at `depth + 1`.
    pub fn trace_batch(
        &self,
        rays: &[Ray],
        depth: u32,
        rng: &mut dyn RngCore,
    ) -> RenderResult<Vec<Color>> {
        let world = &self.scene.world;
        let hits = self.closest_hits(rays)?;

        let mut colors = vec![world.horizon_color; rays.len()];
        let surface: Vec<SurfacePoint> = hits
            .into_iter()
            .zip(rays)
            .enumerate()
            .filter_map(|(slot, (hit, ray))| {
                hit.map(|hit| SurfacePoint {
                    slot,
                    hit,
                    ray_dir: ray.direction.normalize(),
                })
            })
            .collect();
        if surface.is_empty() {
            return Ok(colors);
        }

        let occlusion = self.occlusion_batch(&surface, rng)?;
        for (s, ao) in surface.iter().zip(occlusion) {
            colors[s.slot] = world.ambient_color + s.hit.color * ao;
        }

        // Lamps on the viewer's side of each surface, one shadow ray each
        let mut lit: Vec<(&SurfacePoint, &Lamp, Vec3)> = Vec::new();
        for s in &surface {
            let facing = s.ray_dir.dot(s.hit.normal);
            for lamp in self.scene.lamps() {
                let to_lamp = lamp.position - s.hit.point;
                let side = to_lamp.dot(s.hit.normal);
                if !((facing > 0.0 && side > 0.0) || (facing < 0.0 && side < 0.0)) {
                    lit.push((s, lamp, to_lamp));
                }
            }
        }

        let shadow_rays: Vec<Ray> = lit
            .iter()
            .map(|(s, _, to_lamp)| Ray::new(s.hit.point, *to_lamp))
            .collect();
        let occluded = self.intersector.any_hits(&shadow_rays)?;

        for ((s, lamp, to_lamp), blocked) in lit.into_iter().zip(occluded) {
            if !blocked {
                let material = self.scene.material(s.hit.material);
                colors[s.slot] +=
                    direct_light(material, s.hit.color, s.hit.normal, s.ray_dir, lamp, to_lamp);
            }
        }

        if depth < self.max_reflection_depth {
            let (mirrors, reflected): (Vec<(usize, f32)>, Vec<Ray>) = surface
                .iter()
                .filter_map(|s| {
                    let factor = self.scene.material(s.hit.material).reflection_factor;
                    (factor > EPSILON).then(|| {
                        let bounce = Ray::new(s.hit.point, reflect(s.ray_dir, s.hit.normal));
                        ((s.slot, factor), bounce)
                    })
                })
                .unzip();

            if !reflected.is_empty() {
                let bounced = self.trace_batch(&reflected, depth + 1, rng)?;
                for ((slot, factor), color) in mirrors.into_iter().zip(bounced) {
                    colors[slot] += factor * color;
                }
            }
        }

        Ok(colors)
    }

    /// Fraction of unoccluded hemisphere rays, scaled by the world's
    /// ambient factor.
    ///
    /// Sampling uses the normal that faces the incoming ray.
    pub fn ambient_occlusion(
        &self,
        point: Vec3,
        normal: Vec3,
        ray_dir: Vec3,
        rng: &mut dyn RngCore,
    ) -> RenderResult<f32> {
        let surface = SurfacePoint {
            slot: 0,
            hit: Hit {
                material: MaterialId(0),
                point,
                normal,
                color: Color::ZERO,
                t: 0.0,
            },
            ray_dir,
        };
        Ok(self.occlusion_batch(std::slice::from_ref(&surface), rng)?[0])
    }

    fn occlusion_batch(
        &self,
        surface: &[SurfacePoint],
        rng: &mut dyn RngCore,
    ) -> RenderResult<Vec<f32>> {
        let factor = self.scene.world.ambient_factor;
        if self.ao_samples == 0 || factor == 0.0 {
            return Ok(vec![factor; surface.len()]);
        }

        let samples = self.ao_samples as usize;
        let mut rays = Vec::with_capacity(surface.len() * samples);
        for s in surface {
            let n = if s.hit.normal.dot(s.ray_dir) > 0.0 {
                -s.hit.normal
            } else {
                s.hit.normal
            };
            for _ in 0..samples {
                rays.push(Ray::new(s.hit.point, sample_hemisphere(n, rng)));
            }
        }

        let blocked = self.intersector.any_hits(&rays)?;
        Ok(blocked
            .chunks(samples)
            .map(|chunk| {
                let open = chunk.iter().filter(|&&b| !b).count();
                factor * open as f32 / samples as f32
            })
            .collect())
    }

    /// Average of the four anti-aliasing rays through pixel `(x, y)`.
    pub fn render_pixel(
        &self,
        camera: &Camera,
        x: u32,
        y: u32,
        rng: &mut dyn RngCore,
    ) -> RenderResult<Color> {
        let colors = self.trace_batch(&camera.pixel_rays(x, y), 0, rng)?;
        Ok(average(&colors))
    }
}

/// A surface hit inside a wavefront, with the batch slot it shades.
struct SurfacePoint {
    slot: usize,
    hit: Hit,
    ray_dir: Vec3,
}

/// Mean of a pixel's sub-ray colors.
pub(crate) fn average(colors: &[Color]) -> Color {
    colors.iter().fold(Color::ZERO, |acc, c| acc + *c) / colors.len() as f32
}

/// Diffuse plus specular contribution of one unshadowed lamp.
fn direct_light(
    material: &Material,
    hit_color: Color,
    n: Vec3,
    ray_dir: Vec3,
    lamp: &Lamp,
    to_lamp: Vec3,
) -> Color {
    let dist_sq = to_lamp.length_squared();
    if dist_sq <= 0.0 {
        return Color::ZERO;
    }

    let lamp_dir = to_lamp / dist_sq.sqrt();
    let diffuse = material.diffuse_factor * lamp.intensity * lamp.distance * n.dot(lamp_dir).abs()
        / dist_sq;

    let highlight = reflect(to_lamp, n).normalize_or_zero().dot(ray_dir);
    let specular = if highlight > 0.0 {
        material.specular_factor * lamp.distance * highlight.powf(material.specular_hardness)
            / dist_sq
    } else {
        0.0
    };

    hit_color * (diffuse + specular)
}

/// Generate a random unit vector (rejection sampling in the unit ball).
pub fn random_unit_vector(rng: &mut dyn RngCore) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// Cosine-weighted direction around the unit normal `n`.
///
/// Directions at or below the surface are redrawn.
pub fn sample_hemisphere(n: Vec3, rng: &mut dyn RngCore) -> Vec3 {
    loop {
        let dir = n + random_unit_vector(rng);
        if dir.dot(n) > EPSILON {
            return dir;
        }
    }
}
