//! Scene model for Lumen.
//!
//! Everything here is built once during loading and is read-only afterwards,
//! which is what lets render workers share a `Scene` behind an `Arc`
//! without any locking.

use std::sync::Arc;

use lumen_math::{Mat3, Vec2, Vec3};

use crate::error::{SceneError, SceneResult};
use crate::texture::Texture;

/// Color type alias (linear RGB)
pub type Color = Vec3;

/// Index of a material in the scene's material arena.
///
/// Ids are handed out by [`Scene::add_material`] in insertion order and stay
/// valid for the lifetime of the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

/// Surface description shared by any number of primitives.
#[derive(Clone, Debug)]
pub struct Material {
    /// Base (flat) color
    pub color: Color,

    /// Bound texture, blended over `color` by the texel alpha
    pub texture: Option<Arc<Texture>>,

    /// Scale of the diffuse (Lambert) term
    pub diffuse_factor: f32,

    /// Scale of the specular (Phong) term
    pub specular_factor: f32,

    /// Phong exponent
    pub specular_hardness: f32,

    /// Mirror reflection weight in [0, 1)
    pub reflection_factor: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Color::ZERO,
            texture: None,
            diffuse_factor: 0.0,
            specular_factor: 0.0,
            specular_hardness: 0.0,
            reflection_factor: 0.0,
        }
    }
}

impl Material {
    /// Create a purely diffuse material.
    pub fn diffuse(color: Color, diffuse_factor: f32) -> Self {
        Self {
            color,
            diffuse_factor,
            ..Default::default()
        }
    }

    /// Set the specular factor and hardness.
    pub fn with_specular(mut self, factor: f32, hardness: f32) -> Self {
        self.specular_factor = factor;
        self.specular_hardness = hardness;
        self
    }

    /// Set the reflection factor (clamped to [0, 1)).
    pub fn with_reflection(mut self, factor: f32) -> Self {
        self.reflection_factor = factor.clamp(0.0, 0.999);
        self
    }

    /// Bind a texture.
    pub fn with_texture(mut self, texture: Arc<Texture>) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Check if a texture is bound.
    pub fn is_textured(&self) -> bool {
        self.texture.is_some()
    }

    /// Resolve the shaded base color at a texel coordinate.
    ///
    /// The texel's RGB is alpha-blended over the flat color. Untextured
    /// materials return the flat color.
    pub fn color_at(&self, texel: Vec2) -> Color {
        match &self.texture {
            Some(texture) => {
                let [r, g, b, a] = texture.sample_texel(texel);
                a * Color::new(r, g, b) + (1.0 - a) * self.color
            }
            None => self.color,
        }
    }
}

/// A triangle stored in origin + edges form.
#[derive(Clone, Debug)]
pub struct Triangle {
    /// First vertex
    pub p: Vec3,
    /// `p2 - p1`
    pub e1: Vec3,
    /// `p3 - p1`
    pub e2: Vec3,
    /// Pre-computed face normal (unit length)
    pub normal: Vec3,
    /// Texel coordinate at `p`
    pub uv_start: Vec2,
    /// Texel offset along `e1`
    pub uv_u: Vec2,
    /// Texel offset along `e2`
    pub uv_v: Vec2,
    /// Material
    pub material: MaterialId,
}

impl Triangle {
    /// Create a triangle from three vertices.
    ///
    /// Returns `None` for degenerate input (`|e1 × e2| == 0`).
    pub fn new(p1: Vec3, p2: Vec3, p3: Vec3, material: MaterialId) -> Option<Self> {
        let e1 = p2 - p1;
        let e2 = p3 - p1;
        let cross = e1.cross(e2);
        if !(cross.length_squared() > 0.0) {
            return None;
        }

        Some(Self {
            p: p1,
            e1,
            e2,
            normal: cross.normalize(),
            uv_start: Vec2::ZERO,
            uv_u: Vec2::ZERO,
            uv_v: Vec2::ZERO,
            material,
        })
    }

    /// Set texel-space UVs for the three vertices.
    ///
    /// Coordinates must already be scaled to texture pixels.
    pub fn with_uvs(mut self, uv1: Vec2, uv2: Vec2, uv3: Vec2) -> Self {
        self.uv_start = uv1;
        self.uv_u = uv2 - uv1;
        self.uv_v = uv3 - uv1;
        self
    }

    /// Texel coordinate at barycentric `(u, v)`.
    #[inline]
    pub fn uv_at(&self, u: f32, v: f32) -> Vec2 {
        self.uv_start + self.uv_u * u + self.uv_v * v
    }

    /// Get the three vertices.
    pub fn vertices(&self) -> [Vec3; 3] {
        [self.p, self.p + self.e1, self.p + self.e2]
    }

    /// Get the centroid.
    pub fn centroid(&self) -> Vec3 {
        self.p + (self.e1 + self.e2) / 3.0
    }
}

/// A sphere primitive.
#[derive(Clone, Debug)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
    pub material: MaterialId,
}

impl Sphere {
    /// Create a new sphere. Returns `None` unless `radius > 0`.
    pub fn new(center: Vec3, radius: f32, material: MaterialId) -> Option<Self> {
        if radius > 0.0 {
            Some(Self {
                center,
                radius,
                material,
            })
        } else {
            None
        }
    }
}

/// A point light.
#[derive(Clone, Debug)]
pub struct Lamp {
    pub position: Vec3,
    pub intensity: f32,
    /// Falloff distance used in the 1/r² attenuation
    pub distance: f32,
}

impl Lamp {
    pub fn new(position: Vec3, intensity: f32, distance: f32) -> Self {
        Self {
            position,
            intensity,
            distance,
        }
    }
}

/// Global lighting settings.
#[derive(Clone, Debug, PartialEq)]
pub struct World {
    /// Constant term added to every hit
    pub ambient_color: Color,
    /// Color returned by rays that miss everything
    pub horizon_color: Color,
    /// Ambient occlusion strength
    pub ambient_factor: f32,
}

impl Default for World {
    fn default() -> Self {
        Self {
            ambient_color: Color::ZERO,
            horizon_color: Color::splat(0.3),
            ambient_factor: 0.0,
        }
    }
}

/// The complete, immutable scene.
#[derive(Clone, Debug)]
pub struct Scene {
    materials: Vec<Material>,
    triangles: Vec<Triangle>,
    spheres: Vec<Sphere>,
    lamps: Vec<Lamp>,

    /// Camera position in world space
    pub camera_position: Vec3,

    /// Camera-to-world rotation
    pub camera_matrix: Mat3,

    pub world: World,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    /// Create an empty scene with the camera at the origin looking down -Z.
    pub fn new() -> Self {
        Self {
            materials: Vec::new(),
            triangles: Vec::new(),
            spheres: Vec::new(),
            lamps: Vec::new(),
            camera_position: Vec3::ZERO,
            camera_matrix: Mat3::IDENTITY,
            world: World::default(),
        }
    }

    /// Add a material and return its id.
    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    /// Add a triangle. Fails if its material id is unknown.
    pub fn add_triangle(&mut self, triangle: Triangle) -> SceneResult<usize> {
        self.check_material(triangle.material)?;
        self.triangles.push(triangle);
        Ok(self.triangles.len() - 1)
    }

    /// Add a sphere. Fails if its material id is unknown.
    pub fn add_sphere(&mut self, sphere: Sphere) -> SceneResult<usize> {
        self.check_material(sphere.material)?;
        self.spheres.push(sphere);
        Ok(self.spheres.len() - 1)
    }

    /// Add a point light.
    pub fn add_lamp(&mut self, lamp: Lamp) {
        self.lamps.push(lamp);
    }

    /// Set the camera position and orientation.
    pub fn with_camera(mut self, position: Vec3, matrix: Mat3) -> Self {
        self.camera_position = position;
        self.camera_matrix = matrix;
        self
    }

    /// Set the world lighting.
    pub fn with_world(mut self, world: World) -> Self {
        self.world = world;
        self
    }

    fn check_material(&self, id: MaterialId) -> SceneResult<()> {
        if id.0 < self.materials.len() {
            Ok(())
        } else {
            Err(SceneError::MissingMaterial(id.0))
        }
    }

    /// Get a material by id.
    ///
    /// Ids stored in primitives are validated on insertion, so lookups from
    /// scene geometry never fail.
    #[inline]
    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn spheres(&self) -> &[Sphere] {
        &self.spheres
    }

    pub fn lamps(&self) -> &[Lamp] {
        &self.lamps
    }

    /// Total number of intersectable primitives.
    pub fn primitive_count(&self) -> usize {
        self.triangles.len() + self.spheres.len()
    }

    /// Check if the scene has no geometry at all.
    pub fn is_empty(&self) -> bool {
        self.primitive_count() == 0
    }
}
