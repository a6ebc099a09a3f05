//! JSON scene loading.
//!
//! Converts the exported scene description into a resolved [`Scene`]:
//! faces become triangles with precomputed edges and normals, material
//! indices are checked, texture UVs are scaled into texel space.

use std::path::Path;
use std::sync::Arc;

use lumen_math::{Mat3, Vec2, Vec3};
use serde::Deserialize;

use crate::error::{SceneError, SceneResult};
use crate::scene::{Color, Lamp, Material, MaterialId, Scene, Sphere, Triangle, World};
use crate::texture::TextureCache;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SceneFile {
    world: Option<WorldDef>,
    #[serde(default)]
    materials: Vec<MaterialDef>,
    #[serde(default)]
    vertices: Vec<[f32; 3]>,
    #[serde(default)]
    faces: Vec<FaceDef>,
    #[serde(default, alias = "mSpheres")]
    spheres: Vec<SphereDef>,
    #[serde(default)]
    lamps: Vec<LampDef>,
    translate: Option<[f32; 3]>,
    transform: Option<[[f32; 3]; 3]>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WorldDef {
    ambient_color: [f32; 3],
    horizon_color: [f32; 3],
    ambient_factor: f32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MaterialDef {
    diffusive_color: [f32; 3],
    #[serde(default)]
    diffusive_factor: f32,
    #[serde(default)]
    specular_factor: f32,
    #[serde(default)]
    specular_hardness: f32,
    #[serde(default)]
    reflection_factor: f32,
    image_path: Option<String>,
    #[serde(default = "unit_scale")]
    scale_x: f32,
    #[serde(default = "unit_scale")]
    scale_y: f32,
}

fn unit_scale() -> f32 {
    1.0
}

#[derive(Deserialize, Debug)]
struct FaceDef {
    vertices: [usize; 3],
    material: Option<usize>,
    uv: Option<[[f32; 2]; 3]>,
}

#[derive(Deserialize, Debug)]
struct SphereDef {
    center: [f32; 3],
    radius: f32,
    material: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct LampDef {
    pos: [f32; 3],
    intensity: f32,
    #[serde(default = "unit_scale")]
    distance: f32,
}

/// Load a scene file. Texture paths resolve relative to the file.
pub fn load_scene(path: impl AsRef<Path>) -> SceneResult<Scene> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let scene = load_scene_from_str(&json, base_dir)?;

    log::info!(
        "Loaded scene {}: {} materials, {} triangles, {} spheres, {} lamps",
        path.display(),
        scene.materials().len(),
        scene.triangles().len(),
        scene.spheres().len(),
        scene.lamps().len()
    );

    Ok(scene)
}

/// Build a scene from JSON text.
pub fn load_scene_from_str(json: &str, base_dir: impl AsRef<Path>) -> SceneResult<Scene> {
    let file: SceneFile = serde_json::from_str(json)?;
    let mut textures = TextureCache::with_base_dir(base_dir.as_ref());

    let world = match file.world {
        Some(w) => World {
            ambient_color: Color::from_array(w.ambient_color),
            horizon_color: Color::from_array(w.horizon_color),
            ambient_factor: w.ambient_factor,
        },
        None => World::default(),
    };

    let position = file.translate.map(Vec3::from_array).unwrap_or(Vec3::ZERO);
    // Rows of the exported matrix map camera space to world space.
    let matrix = file
        .transform
        .map(|rows| Mat3::from_cols_array_2d(&rows).transpose())
        .unwrap_or(Mat3::IDENTITY);

    let mut scene = Scene::new().with_world(world).with_camera(position, matrix);

    for def in &file.materials {
        let mut material = Material {
            color: Color::from_array(def.diffusive_color),
            texture: None,
            diffuse_factor: def.diffusive_factor,
            specular_factor: def.specular_factor,
            specular_hardness: def.specular_hardness,
            reflection_factor: def.reflection_factor,
        };
        if let Some(image_path) = &def.image_path {
            let texture = textures.load(image_path)?;
            let texture = if def.scale_x != 1.0 || def.scale_y != 1.0 {
                Arc::new((*texture).clone().with_scale(def.scale_x, def.scale_y))
            } else {
                texture
            };
            material.texture = Some(texture);
        }
        scene.add_material(material);
    }

    // Primitives without a material share one default entry.
    let mut default_material = None;
    let mut resolve_material = |scene: &mut Scene, index: Option<usize>| match index {
        Some(i) if i < scene.materials().len() => Ok(MaterialId(i)),
        Some(i) => Err(SceneError::MissingMaterial(i)),
        None => Ok(*default_material
            .get_or_insert_with(|| scene.add_material(Material::default()))),
    };

    let vertices: Vec<Vec3> = file.vertices.iter().copied().map(Vec3::from_array).collect();
    for (face_index, face) in file.faces.iter().enumerate() {
        let mut corners = [Vec3::ZERO; 3];
        for (corner, &vertex) in corners.iter_mut().zip(face.vertices.iter()) {
            *corner = *vertices.get(vertex).ok_or(SceneError::MissingVertex {
                face: face_index,
                vertex,
            })?;
        }

        let material = resolve_material(&mut scene, face.material)?;
        // Zero-area faces can never be hit
        let Some(mut triangle) = Triangle::new(corners[0], corners[1], corners[2], material) else {
            log::warn!("Skipping degenerate face {face_index}");
            continue;
        };

        if let Some(uv) = face.uv {
            let scale = scene
                .material(material)
                .texture
                .as_ref()
                .map(|t| t.uv_scale())
                .unwrap_or(Vec2::ONE);
            triangle = triangle.with_uvs(
                Vec2::from_array(uv[0]) * scale,
                Vec2::from_array(uv[1]) * scale,
                Vec2::from_array(uv[2]) * scale,
            );
        }

        scene.add_triangle(triangle)?;
    }

    for (index, def) in file.spheres.iter().enumerate() {
        let material = resolve_material(&mut scene, def.material)?;
        let sphere = Sphere::new(Vec3::from_array(def.center), def.radius, material).ok_or(
            SceneError::InvalidRadius {
                index,
                radius: def.radius,
            },
        )?;
        scene.add_sphere(sphere)?;
    }

    for def in &file.lamps {
        scene.add_lamp(Lamp::new(Vec3::from_array(def.pos), def.intensity, def.distance));
    }

    if scene.lamps().is_empty() && !scene.is_empty() {
        log::warn!("Scene has geometry but no lamps; only ambient terms will contribute");
    }

    Ok(scene)
}
