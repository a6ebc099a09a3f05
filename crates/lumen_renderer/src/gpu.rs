//! Batched intersection on the GPU via wgpu compute shaders.
//!
//! Each dispatch tests every (primitive, ray) pair of one primitive kind and
//! writes a hit flag plus hit parameters per pair. The host then reduces
//! each ray's row with the same tie-break as the CPU backend, so both
//! backends report the same closest hit.

use std::sync::{mpsc, Mutex};

use bytemuck::{Pod, Zeroable};
use lumen_core::{Scene, Sphere, Triangle};
use lumen_math::{Ray, Vec3};
use rayon::prelude::*;
use wgpu::util::DeviceExt;

use crate::error::{RenderError, RenderResult};
use crate::intersect::{closest_of, Intersector, PrimitiveHit, SphereHit, TriangleHit};

const WORKGROUP_SIZE: u32 = 64;

/// Floats written per triangle hit: t, u, v, point, normal.
const TRIANGLE_HIT_STRIDE: usize = 9;

/// Floats written per sphere hit: t, point, normal.
const SPHERE_HIT_STRIDE: usize = 7;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuTriangle {
    p: [f32; 3],
    e1: [f32; 3],
    e2: [f32; 3],
    normal: [f32; 3],
}

impl From<&Triangle> for GpuTriangle {
    fn from(t: &Triangle) -> Self {
        Self {
            p: t.p.to_array(),
            e1: t.e1.to_array(),
            e2: t.e2.to_array(),
            normal: t.normal.to_array(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct GpuSphere {
    center: [f32; 3],
    radius: f32,
}

impl From<&Sphere> for GpuSphere {
    fn from(s: &Sphere) -> Self {
        Self {
            center: s.center.to_array(),
            radius: s.radius,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DispatchParams {
    primitive_count: u32,
    ray_count: u32,
    _pad: [u32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kernel {
    TriangleHit,
    TriangleOccluded,
    SphereHit,
    SphereOccluded,
}

impl Kernel {
    const ALL: [Kernel; 4] = [
        Kernel::TriangleHit,
        Kernel::TriangleOccluded,
        Kernel::SphereHit,
        Kernel::SphereOccluded,
    ];

    fn entry_point(self) -> &'static str {
        match self {
            Kernel::TriangleHit => "triangle_hit",
            Kernel::TriangleOccluded => "triangle_occluded",
            Kernel::SphereHit => "sphere_hit",
            Kernel::SphereOccluded => "sphere_occluded",
        }
    }

    /// Floats of hit parameters per pair, zero for occlusion kernels.
    fn hit_stride(self) -> usize {
        match self {
            Kernel::TriangleHit => TRIANGLE_HIT_STRIDE,
            Kernel::SphereHit => SPHERE_HIT_STRIDE,
            Kernel::TriangleOccluded | Kernel::SphereOccluded => 0,
        }
    }
}

/// Primitive data uploaded once at construction.
struct PrimitiveBuffer {
    buffer: wgpu::Buffer,
    count: u32,
    /// Largest number of rays per dispatch for this primitive count
    max_rays: usize,
}

/// Raw per-pair output of one dispatch.
struct ChunkOutput {
    flags: Vec<u32>,
    params: Vec<f32>,
}

/// GPU intersection backend.
pub struct GpuIntersector {
    device: wgpu::Device,
    queue: wgpu::Queue,
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<(Kernel, wgpu::ComputePipeline)>,
    triangles: Option<PrimitiveBuffer>,
    spheres: Option<PrimitiveBuffer>,
    /// Bound at binding 4 by the occlusion kernels, which never write it
    placeholder: wgpu::Buffer,
    adapter_name: String,
    // Error scopes are per device, so batches must not interleave.
    lock: Mutex<()>,
}

impl GpuIntersector {
    /// Select an adapter, compile the kernels and upload the scene geometry.
    ///
    /// Fails with [`RenderError::GpuInit`] when no adapter is available or
    /// the kernels do not validate on it.
    pub fn new(scene: &Scene) -> RenderResult<Self> {
        pollster::block_on(Self::new_async(scene))
    }

    async fn new_async(scene: &Scene) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::GpuInit("no compatible GPU adapter".into()))?;

        let info = adapter.get_info();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Lumen Intersect Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let limits = device.limits();

        // Covers kernel compilation and the geometry uploads
        push_scopes(&device);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Intersect Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/intersect.wgsl").into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Intersect Bind Group Layout"),
            entries: &[
                storage(0, true),
                storage(1, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(3, false),
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Intersect Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipelines = Kernel::ALL
            .iter()
            .map(|&kernel| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.entry_point()),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: kernel.entry_point(),
                    compilation_options: Default::default(),
                    cache: None,
                });
                (kernel, pipeline)
            })
            .collect();

        let max_binding =
            u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let max_groups = limits.max_compute_workgroups_per_dimension;

        let triangles = upload(
            &device,
            "Triangle Buffer",
            scene.triangles().iter().map(GpuTriangle::from).collect::<Vec<_>>(),
            TRIANGLE_HIT_STRIDE,
            max_binding,
            max_groups,
        )?;
        let spheres = upload(
            &device,
            "Sphere Buffer",
            scene.spheres().iter().map(GpuSphere::from).collect::<Vec<_>>(),
            SPHERE_HIT_STRIDE,
            max_binding,
            max_groups,
        )?;

        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Placeholder Hit Params"),
            size: 64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        if let Some(error) = pop_scopes(&device).await {
            return Err(RenderError::GpuInit(format!(
                "intersection kernels or geometry buffers failed: {error}"
            )));
        }

        log::info!(
            "GPU intersector on {} ({:?}): {} triangles, {} spheres",
            info.name,
            info.backend,
            scene.triangles().len(),
            scene.spheres().len()
        );

        Ok(Self {
            device,
            queue,
            layout,
            pipelines,
            triangles,
            spheres,
            placeholder,
            adapter_name: info.name,
            lock: Mutex::new(()),
        })
    }

    /// Name of the adapter the kernels run on.
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Closest triangle per ray, `None` where no triangle is hit.
    pub fn closest_hit_triangles(
        &self,
        rays: &[Ray],
    ) -> RenderResult<Vec<Option<(usize, TriangleHit)>>> {
        let Some(prims) = &self.triangles else {
            return Ok(vec![None; rays.len()]);
        };

        self.run_batched(Kernel::TriangleHit, prims, rays, |out, count| {
            out.flags
                .par_chunks(count)
                .zip(out.params.par_chunks(count * TRIANGLE_HIT_STRIDE))
                .map(|(flags, params)| {
                    closest_in_row(flags, params, TRIANGLE_HIT_STRIDE, triangle_hit, |hit| hit.t)
                })
                .collect()
        })
    }

    /// Closest sphere per ray, `None` where no sphere is hit.
    pub fn closest_hit_spheres(
        &self,
        rays: &[Ray],
    ) -> RenderResult<Vec<Option<(usize, SphereHit)>>> {
        let Some(prims) = &self.spheres else {
            return Ok(vec![None; rays.len()]);
        };

        self.run_batched(Kernel::SphereHit, prims, rays, |out, count| {
            out.flags
                .par_chunks(count)
                .zip(out.params.par_chunks(count * SPHERE_HIT_STRIDE))
                .map(|(flags, params)| {
                    closest_in_row(flags, params, SPHERE_HIT_STRIDE, sphere_hit, |hit| hit.t)
                })
                .collect()
        })
    }

    /// Per ray: does it hit any triangle?
    pub fn any_hit_triangles(&self, rays: &[Ray]) -> RenderResult<Vec<bool>> {
        match &self.triangles {
            Some(prims) => self.run_batched(Kernel::TriangleOccluded, prims, rays, any_in_rows),
            None => Ok(vec![false; rays.len()]),
        }
    }

    /// Per ray: does it hit any sphere?
    pub fn any_hit_spheres(&self, rays: &[Ray]) -> RenderResult<Vec<bool>> {
        match &self.spheres {
            Some(prims) => self.run_batched(Kernel::SphereOccluded, prims, rays, any_in_rows),
            None => Ok(vec![false; rays.len()]),
        }
    }

    /// Split `rays` into dispatch-sized chunks and reduce each chunk's rows.
    fn run_batched<T, F>(
        &self,
        kernel: Kernel,
        prims: &PrimitiveBuffer,
        rays: &[Ray],
        reduce: F,
    ) -> RenderResult<Vec<T>>
    where
        F: Fn(&ChunkOutput, usize) -> Vec<T>,
    {
        let mut results = Vec::with_capacity(rays.len());
        for chunk in rays.chunks(prims.max_rays) {
            let output = self.dispatch(kernel, prims, chunk)?;
            results.extend(reduce(&output, prims.count as usize));
        }
        Ok(results)
    }

    fn pipeline(&self, kernel: Kernel) -> RenderResult<&wgpu::ComputePipeline> {
        self.pipelines
            .iter()
            .find(|(k, _)| *k == kernel)
            .map(|(_, p)| p)
            .ok_or_else(|| {
                RenderError::GpuBatch(format!("missing pipeline {}", kernel.entry_point()))
            })
    }

    fn dispatch(
        &self,
        kernel: Kernel,
        prims: &PrimitiveBuffer,
        rays: &[Ray],
    ) -> RenderResult<ChunkOutput> {
        let pipeline = self.pipeline(kernel)?;
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let device = &self.device;

        let pairs = prims.count as u64 * rays.len() as u64;
        let stride = kernel.hit_stride() as u64;

        push_scopes(device);

        let ray_data: Vec<f32> = rays.iter().flat_map(|r| r.to_array()).collect();
        let ray_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Ray Buffer"),
            contents: bytemuck::cast_slice(&ray_data),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let params = DispatchParams {
            primitive_count: prims.count,
            ray_count: rays.len() as u32,
            _pad: [0; 2],
        };
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Dispatch Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let flags_size = pairs * 4;
        let flags_buffer = storage_output(device, "Hit Flags", flags_size);
        let flags_staging = staging(device, "Hit Flags Staging", flags_size);

        let hit_params = (stride > 0).then(|| {
            let size = pairs * stride * 4;
            (
                storage_output(device, "Hit Params", size),
                staging(device, "Hit Params Staging", size),
                size,
            )
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Intersect Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: prims.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: ray_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: flags_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: hit_params
                        .as_ref()
                        .map_or(&self.placeholder, |(buffer, _, _)| buffer)
                        .as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Intersect Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(prims.count.div_ceil(WORKGROUP_SIZE), rays.len() as u32, 1);
        }
        encoder.copy_buffer_to_buffer(&flags_buffer, 0, &flags_staging, 0, flags_size);
        if let Some((buffer, staging, size)) = &hit_params {
            encoder.copy_buffer_to_buffer(buffer, 0, staging, 0, *size);
        }
        self.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(pop_scopes(device)) {
            return Err(RenderError::GpuBatch(format!(
                "{} over {} rays failed: {error}",
                kernel.entry_point(),
                rays.len()
            )));
        }

        let flags: Vec<u32> = self.read_back(&flags_staging)?;
        let params = match &hit_params {
            Some((_, staging, _)) => self.read_back(staging)?,
            None => Vec::new(),
        };

        Ok(ChunkOutput { flags, params })
    }

    fn read_back<T: Pod>(&self, buffer: &wgpu::Buffer) -> RenderResult<Vec<T>> {
        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|_| RenderError::GpuBatch("map_async channel closed".into()))?
            .map_err(|e| RenderError::GpuBatch(format!("buffer map failed: {e:?}")))?;

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, T>(&data).to_vec()
        };
        buffer.unmap();
        Ok(values)
    }
}

impl Intersector for GpuIntersector {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn closest_hits(&self, rays: &[Ray]) -> RenderResult<Vec<Option<PrimitiveHit>>> {
        let triangles = self.closest_hit_triangles(rays)?;
        let spheres = self.closest_hit_spheres(rays)?;
        Ok(triangles
            .into_iter()
            .zip(spheres)
            .map(|(t, s)| closest_of(t, s))
            .collect())
    }

    fn any_hits(&self, rays: &[Ray]) -> RenderResult<Vec<bool>> {
        let triangles = self.any_hit_triangles(rays)?;
        let spheres = self.any_hit_spheres(rays)?;
        Ok(triangles.into_iter().zip(spheres).map(|(t, s)| t || s).collect())
    }
}

/// Capture out-of-memory and validation errors until [`pop_scopes`].
fn push_scopes(device: &wgpu::Device) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
}

/// Close the scopes opened by [`push_scopes`], returning the first error.
async fn pop_scopes(device: &wgpu::Device) -> Option<wgpu::Error> {
    let validation = device.pop_error_scope().await;
    let oom = device.pop_error_scope().await;
    validation.or(oom)
}

fn triangle_hit(p: &[f32]) -> TriangleHit {
    TriangleHit {
        t: p[0],
        u: p[1],
        v: p[2],
        point: Vec3::new(p[3], p[4], p[5]),
        normal: Vec3::new(p[6], p[7], p[8]),
    }
}

fn sphere_hit(p: &[f32]) -> SphereHit {
    SphereHit {
        t: p[0],
        point: Vec3::new(p[1], p[2], p[3]),
        normal: Vec3::new(p[4], p[5], p[6]),
    }
}

/// Upload one primitive list. Returns `None` for an empty list, which
/// lets every operation on that kind skip the dispatch.
fn upload<P: Pod>(
    device: &wgpu::Device,
    label: &str,
    data: Vec<P>,
    hit_stride: usize,
    max_binding: u64,
    max_groups: u32,
) -> RenderResult<Option<PrimitiveBuffer>> {
    if data.is_empty() {
        return Ok(None);
    }

    let count = u32::try_from(data.len())
        .ok()
        .filter(|count| count.div_ceil(WORKGROUP_SIZE) <= max_groups)
        .ok_or_else(|| {
            RenderError::GpuInit(format!(
                "{label}: {} primitives exceed dispatch limits",
                data.len()
            ))
        })?;

    // The hit parameter buffer is the largest per-dispatch binding.
    let bytes_per_ray = count as u64 * hit_stride as u64 * 4;
    let max_rays = (max_binding / bytes_per_ray).min(u64::from(max_groups)) as usize;
    if max_rays == 0 {
        return Err(RenderError::GpuInit(format!(
            "{label}: {count} primitives exceed the storage binding limit"
        )));
    }

    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&data),
        usage: wgpu::BufferUsages::STORAGE,
    });

    log::debug!("{label}: {count} primitives, up to {max_rays} rays per dispatch");

    Ok(Some(PrimitiveBuffer {
        buffer,
        count,
        max_rays,
    }))
}

fn storage_output(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    })
}

fn staging(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Minimum-t hit in one ray's row; the first minimum wins.
fn closest_in_row<H: Copy>(
    flags: &[u32],
    params: &[f32],
    stride: usize,
    decode: impl Fn(&[f32]) -> H,
    t_of: impl Fn(&H) -> f32,
) -> Option<(usize, H)> {
    let mut best: Option<(usize, H)> = None;
    for (index, _) in flags.iter().enumerate().filter(|&(_, &flag)| flag != 0) {
        let hit = decode(&params[index * stride..(index + 1) * stride]);
        if best.as_ref().map_or(true, |(_, b)| t_of(&hit) < t_of(b)) {
            best = Some((index, hit));
        }
    }
    best
}

fn any_in_rows(output: &ChunkOutput, count: usize) -> Vec<bool> {
    output
        .flags
        .par_chunks(count)
        .map(|row| row.iter().any(|&flag| flag != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layouts_match_kernel_strides() {
        assert_eq!(std::mem::size_of::<GpuTriangle>(), 12 * 4);
        assert_eq!(std::mem::size_of::<GpuSphere>(), 4 * 4);
        assert_eq!(std::mem::size_of::<DispatchParams>(), 16);
    }

    #[test]
    fn test_closest_in_row_prefers_first_minimum() {
        let flags = [0, 1, 1, 1];
        let params = [9.0, 5.0, 2.0, 2.0];
        let best = closest_in_row(&flags, &params, 1, |p| p[0], |t| *t);
        assert_eq!(best, Some((2, 2.0)));
    }

    #[test]
    fn test_closest_in_row_empty() {
        let best = closest_in_row(&[0, 0], &[1.0, 1.0], 1, |p| p[0], |t| *t);
        assert_eq!(best, None);
    }

    #[test]
    fn test_any_in_rows() {
        let output = ChunkOutput {
            flags: vec![0, 0, 0, 1, 0, 0],
            params: Vec::new(),
        };
        assert_eq!(any_in_rows(&output, 3), vec![false, true]);
    }

    #[test]
    fn test_empty_scene_skips_dispatch() {
        // Only meaningful where an adapter exists
        let Ok(gpu) = GpuIntersector::new(&Scene::new()) else {
            return;
        };
        let rays = [Ray::new(Vec3::ZERO, Vec3::NEG_Z); 3];
        assert_eq!(gpu.closest_hits(&rays).unwrap(), vec![None; 3]);
        assert_eq!(gpu.any_hits(&rays).unwrap(), vec![false; 3]);
        assert!(gpu.closest_hits(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_errors_inside_scopes_are_returned() {
        let Ok(gpu) = GpuIntersector::new(&Scene::new()) else {
            return;
        };

        push_scopes(&gpu.device);
        // Mappable storage buffers need a feature the device never requests
        let _invalid = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mappable Storage"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        assert!(pollster::block_on(pop_scopes(&gpu.device)).is_some());

        // Scopes are balanced again, so the backend still works
        push_scopes(&gpu.device);
        assert!(pollster::block_on(pop_scopes(&gpu.device)).is_none());
    }

    #[test]
    fn test_construction_with_geometry_leaves_device_usable() {
        let mut scene = Scene::new();
        let id = scene.add_material(lumen_core::Material::default());
        let tri = Triangle::new(
            Vec3::new(-1.0, -1.0, -2.0),
            Vec3::new(1.0, -1.0, -2.0),
            Vec3::new(0.0, 1.0, -2.0),
            id,
        );
        scene.add_triangle(tri.unwrap()).unwrap();
        let Ok(gpu) = GpuIntersector::new(&scene) else {
            return;
        };

        let rays = [Ray::new(Vec3::ZERO, Vec3::NEG_Z), Ray::new(Vec3::ZERO, Vec3::Z)];
        assert_eq!(gpu.any_hits(&rays).unwrap(), vec![true, false]);
    }
}
