//! The GPU backend must report the same hits as the CPU backend.
//!
//! Every test returns early when no GPU adapter is available.

use std::sync::Arc;

use lumen_core::{Material, MaterialId, Scene, Sphere, Triangle};
use lumen_renderer::{CpuIntersector, GpuIntersector, Intersector, PrimitiveHit, Ray, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vec(rng: &mut StdRng, extent: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
        rng.gen_range(-extent..extent),
    )
}

fn random_scene(rng: &mut StdRng, triangles: usize, spheres: usize) -> Scene {
    let mut scene = Scene::new();
    let id = scene.add_material(Material::default());

    while scene.triangles().len() < triangles {
        let base = random_vec(rng, 10.0);
        let tri = Triangle::new(
            base,
            base + random_vec(rng, 2.0),
            base + random_vec(rng, 2.0),
            id,
        );
        if let Some(tri) = tri.filter(|t| t.e1.cross(t.e2).length() > 0.1) {
            scene.add_triangle(tri).unwrap();
        }
    }
    for _ in 0..spheres {
        let radius = rng.gen_range(0.2..1.5);
        let sphere = Sphere::new(random_vec(rng, 10.0), radius, MaterialId(0)).unwrap();
        scene.add_sphere(sphere).unwrap();
    }
    scene
}

/// Rays aimed at primitive centers plus rays in random directions.
fn random_rays(rng: &mut StdRng, scene: &Scene, count: usize) -> Vec<Ray> {
    let mut targets: Vec<Vec3> = scene.triangles().iter().map(|t| t.centroid()).collect();
    targets.extend(scene.spheres().iter().map(|s| s.center));

    (0..count)
        .map(|i| {
            let origin = random_vec(rng, 15.0);
            let direction = if i % 3 == 2 || targets.is_empty() {
                random_vec(rng, 1.0)
            } else {
                targets[rng.gen_range(0..targets.len())] - origin
            };
            Ray::new(origin, direction)
        })
        .collect()
}

fn gpu_for(scene: &Scene) -> Option<GpuIntersector> {
    match GpuIntersector::new(scene) {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

#[test]
fn test_closest_hits_match_cpu() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(2024);

    for round in 0..4 {
        let scene = Arc::new(random_scene(&mut rng, 12 + round * 10, 5 + round * 3));
        let Some(gpu) = gpu_for(&scene) else {
            return;
        };
        let cpu = CpuIntersector::new(scene.clone());
        let rays = random_rays(&mut rng, &scene, 600);

        let expected = cpu.closest_hits(&rays).unwrap();
        let actual = gpu.closest_hits(&rays).unwrap();
        assert_eq!(expected.len(), actual.len());

        for (i, (e, a)) in expected.iter().zip(&actual).enumerate() {
            match (e, a) {
                (None, None) => {}
                (Some(e), Some(a)) => {
                    let tol = 1e-3 * e.t.max(1.0);
                    assert!((e.t - a.t).abs() < tol, "ray {i}: t {} vs {}", e.t, a.t);
                    assert!((e.point - a.point).length() < tol, "ray {i}: point");
                    assert!((e.normal - a.normal).length() < 1e-3, "ray {i}: normal");
                }
                _ => panic!("ray {i}: cpu {e:?} vs gpu {a:?}"),
            }
        }
    }
}

#[test]
fn test_any_hits_match_cpu() {
    let mut rng = StdRng::seed_from_u64(77);
    let scene = Arc::new(random_scene(&mut rng, 30, 10));
    let Some(gpu) = gpu_for(&scene) else {
        return;
    };
    let cpu = CpuIntersector::new(scene.clone());
    let rays = random_rays(&mut rng, &scene, 1000);

    assert_eq!(cpu.any_hits(&rays).unwrap(), gpu.any_hits(&rays).unwrap());
}

#[test]
fn test_per_kind_operations() {
    let mut scene = Scene::new();
    let id = scene.add_material(Material::default());
    scene
        .add_triangle(
            Triangle::new(
                Vec3::new(-1.0, -1.0, -2.0),
                Vec3::new(1.0, -1.0, -2.0),
                Vec3::new(0.0, 1.0, -2.0),
                id,
            )
            .unwrap(),
        )
        .unwrap();
    scene
        .add_sphere(Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0, id).unwrap())
        .unwrap();
    let Some(gpu) = gpu_for(&scene) else {
        return;
    };

    let rays = [
        Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)),
        Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)),
    ];

    let triangles = gpu.closest_hit_triangles(&rays).unwrap();
    let (index, hit) = triangles[0].unwrap();
    assert_eq!(index, 0);
    assert!((hit.t - 2.0).abs() < 1e-4);
    assert!(triangles[1].is_none());

    let spheres = gpu.closest_hit_spheres(&rays).unwrap();
    assert!((spheres[0].unwrap().1.t - 4.0).abs() < 1e-4);
    assert!(spheres[1].is_none());

    assert_eq!(gpu.any_hit_triangles(&rays).unwrap(), vec![true, false]);
    assert_eq!(gpu.any_hit_spheres(&rays).unwrap(), vec![true, false]);
    assert!(gpu.any_hit_spheres(&[]).unwrap().is_empty());
}

#[test]
fn test_large_batch_is_split() {
    let mut rng = StdRng::seed_from_u64(5);
    let scene = Arc::new(random_scene(&mut rng, 8, 4));
    let Some(gpu) = gpu_for(&scene) else {
        return;
    };
    let cpu = CpuIntersector::new(scene.clone());

    // More rays than one dispatch row allows
    let rays = random_rays(&mut rng, &scene, 70_000);
    let hit_mask = |hits: Vec<Option<PrimitiveHit>>| -> Vec<bool> {
        hits.iter().map(Option::is_some).collect()
    };
    let expected = hit_mask(cpu.closest_hits(&rays).unwrap());
    let actual = hit_mask(gpu.closest_hits(&rays).unwrap());

    let mismatches = expected.iter().zip(&actual).filter(|(e, a)| e != a).count();
    assert!(mismatches <= 2, "{mismatches} rays disagree");
}
