//! GPU compute backend
//!
//! This module provides a GPU implementation of the `ComputeBackend` trait
//! using wgpu compute shaders and storage buffers. This backend is only
//! available when the `gpu` feature is enabled.
//!
//! # Shader Files
//!
//! GPU compute shaders are located in `shaders/`:
//! - `droplet.wgsl` - Droplet integrator for erosion, flow and color modes
//! - `relax.wgsl` - Request/grant relaxation over a neighbor table
//! - `pipe.wgsl` - Pipe-model stages (rain, flux, depth, capacity, erosion, advection)
//!
//! # Implementation
//!
//! Fields stay host-resident. Each job uploads the fields it needs into
//! storage buffers, submits one command buffer per iteration (per round
//! chunk for droplets), and reads the results back before returning.
//! Jobs too large for the device's binding limits run on the CPU instead.

use std::mem::size_of;

use bytemuck::Pod;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::cpu::CpuBackend;
use super::params::{
    DropletJob, DropletParams, PipeJob, PipeParams, RelaxJob, RelaxStep, DROPLET_COLOR, DROPLET_ERODE,
};
use super::ComputeBackend;
use crate::error::{ErosionError, Result};
use crate::field::Field;

/// Droplet rounds per submitted dispatch
const ROUNDS_PER_DISPATCH: u32 = 8;

/// Linear workgroup sizes (must match the WGSL declarations)
const DROPLET_WORKGROUP: u32 = 64;
const RELAX_WORKGROUP: u32 = 256;
/// Pipe kernels use 16x16 workgroups
const PIPE_WORKGROUP: u32 = 16;

/// Maximum workgroups along one dispatch axis
const MAX_GROUPS_PER_AXIS: u32 = 65535;

struct PipePipelines {
    rain: wgpu::ComputePipeline,
    flux: wgpu::ComputePipeline,
    depth: wgpu::ComputePipeline,
    capacity: wgpu::ComputePipeline,
    erode: wgpu::ComputePipeline,
    advect: wgpu::ComputePipeline,
}

struct TableBuffers {
    targets: wgpu::Buffer,
    backs: wgpu::Buffer,
    distances: wgpu::Buffer,
}

/// GPU backend with one pipeline per kernel entry point
pub struct GpuBackend {
    context: GpuContext,
    name: String,
    droplet: wgpu::ComputePipeline,
    relax_post: wgpu::ComputePipeline,
    relax_grant: wgpu::ComputePipeline,
    pipe: PipePipelines,
    fallback: CpuBackend,
}

impl GpuBackend {
    /// Compile all kernels on the given context
    pub fn new(context: GpuContext) -> Self {
        let device = context.device();
        let droplet_shader = device.create_shader_module(wgpu::include_wgsl!("shaders/droplet.wgsl"));
        let relax_shader = device.create_shader_module(wgpu::include_wgsl!("shaders/relax.wgsl"));
        let pipe_shader = device.create_shader_module(wgpu::include_wgsl!("shaders/pipe.wgsl"));

        let pipeline = |label: &str, module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module,
                entry_point: entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        let droplet = pipeline("Droplet Pipeline", &droplet_shader, "main");
        let relax_post = pipeline("Relax Post Pipeline", &relax_shader, "post");
        let relax_grant = pipeline("Relax Grant Pipeline", &relax_shader, "grant");
        let pipe = PipePipelines {
            rain: pipeline("Pipe Rain Pipeline", &pipe_shader, "rain_evaporate"),
            flux: pipeline("Pipe Flux Pipeline", &pipe_shader, "update_flux"),
            depth: pipeline("Pipe Depth Pipeline", &pipe_shader, "update_depth"),
            capacity: pipeline("Pipe Capacity Pipeline", &pipe_shader, "update_capacity"),
            erode: pipeline("Pipe Erosion Pipeline", &pipe_shader, "erode_deposit"),
            advect: pipeline("Pipe Advection Pipeline", &pipe_shader, "advect"),
        };

        let name = format!("GPU ({})", context.adapter_name());
        Self {
            context,
            name,
            droplet,
            relax_post,
            relax_grant,
            pipe,
            fallback: CpuBackend::new(),
        }
    }

    fn storage(&self, label: &str, data: &[f32]) -> wgpu::Buffer {
        self.storage_bytes(label, bytemuck::cast_slice(data))
    }

    fn storage_bytes(&self, label: &str, contents: &[u8]) -> wgpu::Buffer {
        self.context
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            })
    }

    /// Placeholder bound where an optional field is absent
    fn placeholder(&self, label: &str) -> wgpu::Buffer {
        self.storage(label, &[0.0; 4])
    }

    fn optional(&self, label: &str, field: Option<&Field>) -> wgpu::Buffer {
        field.map_or_else(|| self.placeholder(label), |f| self.storage(label, f.as_slice()))
    }

    fn uniform<T: Pod>(&self, label: &str, value: &T) -> wgpu::Buffer {
        self.context
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(value),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    /// Bind group matching the auto-derived layout of `pipeline`
    fn bind(&self, label: &str, pipeline: &wgpu::ComputePipeline, buffers: &[(u32, &wgpu::Buffer)]) -> wgpu::BindGroup {
        let layout = pipeline.get_bind_group_layout(0);
        let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        self.context.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &layout,
            entries: &entries,
        })
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.context.queue().submit(std::iter::once(encoder.finish()));
    }

    /// Copy a storage buffer back into host memory
    fn read_back(&self, buffer: &wgpu::Buffer, out: &mut [f32]) -> Result<()> {
        let device = self.context.device();
        let size = (out.len() * size_of::<f32>()) as u64;
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("Readback Encoder");
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.submit(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| ErosionError::Backend(format!("readback channel closed: {e}")))?
            .map_err(|e| ErosionError::Backend(format!("buffer map failed: {e}")))?;

        {
            let data = slice.get_mapped_range();
            out.copy_from_slice(bytemuck::cast_slice(&data));
        }
        staging.unmap();
        Ok(())
    }

    fn fits(&self, largest_bytes: u64, what: &str) -> bool {
        if self.context.can_allocate(largest_bytes) {
            return true;
        }
        warn!(
            "GPU cannot bind {} bytes for {}, running on CPU instead",
            largest_bytes, what
        );
        false
    }
}

/// Split a linear dispatch over two axes to respect per-axis limits
fn linear_groups(items: u32, workgroup: u32) -> (u32, u32) {
    let groups = items.div_ceil(workgroup).max(1);
    if groups <= MAX_GROUPS_PER_AXIS {
        (groups, 1)
    } else {
        (MAX_GROUPS_PER_AXIS, groups.div_ceil(MAX_GROUPS_PER_AXIS))
    }
}

fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_group: &wgpu::BindGroup,
    groups: (u32, u32),
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(groups.0, groups.1, 1);
}

impl ComputeBackend for GpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }

    fn run_droplets(&mut self, job: DropletJob<'_>) -> Result<()> {
        let params = job.params;
        let cells = u64::from(params.width) * u64::from(params.height);
        let largest = if job.color.is_some() { cells * 16 } else { cells * 4 };
        if !self.fits(largest, "droplets") {
            return self.fallback.run_droplets(job);
        }

        let DropletJob {
            height,
            hardness,
            sediment,
            depth,
            color,
            flow,
            ..
        } = job;

        let height_buf = self.storage("Droplet Height", height.as_slice());
        let hardness_buf = self.optional("Droplet Hardness", hardness.filter(|_| params.use_hardness != 0));
        let sediment_buf = self.optional("Droplet Sediment", sediment.as_deref());
        let depth_buf = self.optional("Droplet Depth", depth.as_deref());
        let color_buf = self.optional("Droplet Color", color.as_deref());
        let flow_buf = self.optional("Droplet Flow", flow.as_deref());
        let params_buf = self.uniform("Droplet Params", &params);

        let bind_group = self.bind(
            "Droplet Bind Group",
            &self.droplet,
            &[
                (0, &params_buf),
                (1, &height_buf),
                (2, &hardness_buf),
                (3, &sediment_buf),
                (4, &depth_buf),
                (5, &color_buf),
                (6, &flow_buf),
            ],
        );
        let groups = linear_groups(params.lane_count(), DROPLET_WORKGROUP);

        let mut round = 0;
        while round < params.rounds {
            let chunk = (params.rounds - round).min(ROUNDS_PER_DISPATCH);
            let chunk_params = DropletParams {
                rounds: chunk,
                round_offset: params.round_offset + round,
                ..params
            };
            self.context
                .queue()
                .write_buffer(&params_buf, 0, bytemuck::bytes_of(&chunk_params));
            let mut encoder = self.encoder("Droplet Encoder");
            dispatch(&mut encoder, "Droplet Pass", &self.droplet, &bind_group, groups);
            self.submit(encoder);
            round += chunk;
        }
        debug!("Dispatched {} droplet rounds over {} lanes", params.rounds, params.lane_count());

        if params.mode == DROPLET_ERODE {
            self.read_back(&height_buf, height.as_mut_slice())?;
        }
        if let Some(field) = sediment {
            self.read_back(&sediment_buf, field.as_mut_slice())?;
        }
        if let Some(field) = depth {
            self.read_back(&depth_buf, field.as_mut_slice())?;
        }
        if let Some(field) = color {
            if params.mode == DROPLET_COLOR || params.use_color != 0 {
                self.read_back(&color_buf, field.as_mut_slice())?;
            }
        }
        if let Some(field) = flow {
            self.read_back(&flow_buf, field.as_mut_slice())?;
        }
        Ok(())
    }

    fn relax(&mut self, job: RelaxJob<'_>) -> Result<()> {
        let cells = job.topology.cell_count() as u64;
        if !self.fits(cells * 16, "relaxation") {
            return self.fallback.relax(job);
        }

        let buffers = [
            self.storage("Relax Material A", job.material.current().as_slice()),
            self.storage("Relax Material B", job.material.current().as_slice()),
        ];
        let offset_buf = self.optional("Relax Offset", job.offset.filter(|_| job.params.use_offset != 0));
        let requests_buf = self.storage_bytes("Relax Requests", &vec![0u8; (cells * 16) as usize]);
        let params_buf = self.uniform("Relax Params", &job.params);
        let groups = linear_groups(cells as u32, RELAX_WORKGROUP);

        let mut tables: FxHashMap<RelaxStep, TableBuffers> = FxHashMap::default();
        let mut front = 0;
        for step in job.schedule {
            if !tables.contains_key(step) {
                debug!(
                    "Uploading neighbor table (diagonal: {}, stride: {})",
                    step.diagonal, step.stride
                );
                let table = job.topology.table(step.diagonal, step.stride);
                let targets: Vec<u32> = table.targets().iter().flatten().copied().collect();
                let distances: Vec<f32> = table.distances().iter().flatten().copied().collect();
                tables.insert(
                    *step,
                    TableBuffers {
                        targets: self.storage_bytes("Relax Targets", bytemuck::cast_slice(&targets)),
                        backs: self.storage_bytes("Relax Backs", bytemuck::cast_slice(&table.packed_backs())),
                        distances: self.storage("Relax Distances", &distances),
                    },
                );
            }
            let table = &tables[step];
            let (src, dst) = (&buffers[front], &buffers[1 - front]);

            let post = self.bind(
                "Relax Post Bind Group",
                &self.relax_post,
                &[
                    (0, &params_buf),
                    (1, src),
                    (2, &offset_buf),
                    (3, &requests_buf),
                    (4, &table.targets),
                    (6, &table.distances),
                ],
            );
            let grant = self.bind(
                "Relax Grant Bind Group",
                &self.relax_grant,
                &[
                    (1, src),
                    (3, &requests_buf),
                    (4, &table.targets),
                    (5, &table.backs),
                    (7, dst),
                ],
            );

            let mut encoder = self.encoder("Relax Encoder");
            dispatch(&mut encoder, "Relax Post Pass", &self.relax_post, &post, groups);
            dispatch(&mut encoder, "Relax Grant Pass", &self.relax_grant, &grant, groups);
            self.submit(encoder);
            front = 1 - front;
        }

        self.read_back(&buffers[front], job.material.current_mut().as_mut_slice())
    }

    fn run_pipe(&mut self, job: PipeJob<'_>) -> Result<()> {
        let params: PipeParams = job.params;
        let cells = u64::from(params.width) * u64::from(params.height);
        if !self.fits(cells * 16, "pipe model") {
            return self.fallback.run_pipe(job);
        }

        let state = job.state;
        let terrain = self.storage("Pipe Terrain", state.height.as_slice());
        let flux = self.storage("Pipe Flux", state.flux.as_slice());
        let velocity = self.storage("Pipe Velocity", state.velocity.as_slice());
        let water = self.storage("Pipe Water", state.water.as_slice());
        let sediment = [
            self.storage("Pipe Sediment A", state.sediment.current().as_slice()),
            self.storage("Pipe Sediment B", state.sediment.current().as_slice()),
        ];
        let mean_depth = self.storage("Pipe Mean Depth", state.mean_depth.as_slice());
        let capacity = self.storage("Pipe Capacity", state.capacity.as_slice());
        let source = self.optional("Pipe Water Source", job.water_source.filter(|_| params.use_source != 0));
        let hardness = self.optional("Pipe Hardness", job.hardness.filter(|_| params.use_hardness != 0));
        let color = match state.color.as_ref() {
            Some(c) => [
                self.storage("Pipe Color A", c.current().as_slice()),
                self.storage("Pipe Color B", c.current().as_slice()),
            ],
            None => [self.placeholder("Pipe Color A"), self.placeholder("Pipe Color B")],
        };
        let params_buf = self.uniform("Pipe Params", &params);

        let rain = self.bind(
            "Pipe Rain Bind Group",
            &self.pipe.rain,
            &[(0, &params_buf), (4, &water), (9, &source)],
        );
        let flux_group = self.bind(
            "Pipe Flux Bind Group",
            &self.pipe.flux,
            &[(0, &params_buf), (1, &terrain), (2, &flux), (4, &water)],
        );
        let depth = self.bind(
            "Pipe Depth Bind Group",
            &self.pipe.depth,
            &[
                (0, &params_buf),
                (2, &flux),
                (3, &velocity),
                (4, &water),
                (7, &mean_depth),
                (8, &capacity),
            ],
        );
        let capacity_group = self.bind(
            "Pipe Capacity Bind Group",
            &self.pipe.capacity,
            &[(0, &params_buf), (1, &terrain), (3, &velocity), (8, &capacity)],
        );
        let erode: Vec<wgpu::BindGroup> = (0..2)
            .map(|front| {
                self.bind(
                    "Pipe Erosion Bind Group",
                    &self.pipe.erode,
                    &[
                        (0, &params_buf),
                        (1, &terrain),
                        (5, &sediment[front]),
                        (8, &capacity),
                        (10, &hardness),
                    ],
                )
            })
            .collect();
        let advect: Vec<wgpu::BindGroup> = (0..2)
            .map(|front| {
                self.bind(
                    "Pipe Advection Bind Group",
                    &self.pipe.advect,
                    &[
                        (0, &params_buf),
                        (3, &velocity),
                        (5, &sediment[front]),
                        (6, &sediment[1 - front]),
                        (11, &color[front]),
                        (12, &color[1 - front]),
                    ],
                )
            })
            .collect();

        let groups = (
            params.width.div_ceil(PIPE_WORKGROUP),
            params.height.div_ceil(PIPE_WORKGROUP),
        );
        let water_bytes = cells * size_of::<f32>() as u64;
        let mut front = 0;

        for (i, step) in job.schedule.iter().enumerate() {
            let step_params = PipeParams {
                iteration: i as u32,
                diagonal: u32::from(step.diagonal),
                ..params
            };
            self.context
                .queue()
                .write_buffer(&params_buf, 0, bytemuck::bytes_of(&step_params));

            let mut encoder = self.encoder("Pipe Encoder");
            if step.erase_flux {
                encoder.clear_buffer(&flux, 0, None);
            }
            dispatch(&mut encoder, "Pipe Rain Pass", &self.pipe.rain, &rain, groups);
            dispatch(&mut encoder, "Pipe Flux Pass", &self.pipe.flux, &flux_group, groups);
            dispatch(&mut encoder, "Pipe Depth Pass", &self.pipe.depth, &depth, groups);
            encoder.copy_buffer_to_buffer(&capacity, 0, &water, 0, water_bytes);
            dispatch(&mut encoder, "Pipe Capacity Pass", &self.pipe.capacity, &capacity_group, groups);
            dispatch(&mut encoder, "Pipe Erosion Pass", &self.pipe.erode, &erode[front], groups);
            dispatch(&mut encoder, "Pipe Advection Pass", &self.pipe.advect, &advect[front], groups);
            self.submit(encoder);
            front = 1 - front;
        }

        self.read_back(&terrain, state.height.as_mut_slice())?;
        self.read_back(&flux, state.flux.as_mut_slice())?;
        self.read_back(&velocity, state.velocity.as_mut_slice())?;
        self.read_back(&water, state.water.as_mut_slice())?;
        self.read_back(&mean_depth, state.mean_depth.as_mut_slice())?;
        self.read_back(&capacity, state.capacity.as_mut_slice())?;
        self.read_back(&sediment[front], state.sediment.current_mut().as_mut_slice())?;
        if let Some(c) = state.color.as_mut() {
            if params.advect_color != 0 {
                self.read_back(&color[front], c.current_mut().as_mut_slice())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_groups_split_large_dispatches() {
        assert_eq!(linear_groups(100, 64), (2, 1));
        assert_eq!(linear_groups(0, 64), (1, 1));
        let (x, y) = linear_groups(4096 * 4096, 256);
        assert!(x <= MAX_GROUPS_PER_AXIS);
        assert!(u64::from(x) * u64::from(y) * 256 >= 4096 * 4096);
    }
}
