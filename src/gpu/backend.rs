// gpu/backend.rs — `accel::Backend` on wgpu compute shaders.
//
// Storage is one `wgpu::Buffer` of f32 words per allocation. A program is
// one compute pipeline plus its bind group layout, built from a WGSL source
// with its placeholders substituted:
//
//   {{BLOCK}}          workgroup side (block extent)
//   {{FILTER_LENGTH}}  taps per filter
//   {{FILTER_COUNT}}   filters per launch
//   {{SWAP_MASK}}      per-filter tree swap bits (decimation only)
//   {{COLUMN}}         `true` for column kernels, `false` for row kernels
//
// BINDINGS (group 0, in order):
//   filter / decimate  0 input (read)  1 output (rw)  2 taps (read)  3 params
//   pad                0 data (rw)     1 params
//   q2c                0 quad (read)   1 output (rw)  2 params
//   cornerness         0 subbands (read)  1 map (rw)  2 params
//
// EXECUTION:
// A batch becomes ONE command encoder and ONE `queue.submit`. Host writes
// are staged through a `COPY_SRC` buffer and copied in place, so they take
// their position in the batch. Each launch gets its own compute pass; wgpu
// inserts the storage barriers between passes. The batch arrives already
// ordered, so no further synchronisation is needed here.
//
// NEW RUST CONCEPTS:
// - `push_error_scope` / `pop_error_scope` — wgpu reports validation errors
//   asynchronously through the device. Wrapping a call in a scope turns
//   them into a value we can map to `Error::ProgramBuild` or
//   `Error::Execution` instead of the default panic handler.
// - `chunks_exact(4)` + `f32::from_le_bytes` — decode mapped bytes without
//   assuming the mapping is 4-byte aligned for a `cast_slice`.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::accel::{Axis, Backend, Command, KernelKind, Launch, ProgramOptions};
use crate::config::DtcwtConfig;
use crate::error::{Error, Result};
use crate::gpu::device::{DeviceProfile, GpuDevice};

const FILTER_SRC: &str = include_str!("../shaders/filter.wgsl");
const DECIMATE_SRC: &str = include_str!("../shaders/decimate.wgsl");
const PAD_SRC: &str = include_str!("../shaders/pad.wgsl");
const Q2C_SRC: &str = include_str!("../shaders/q2c.wgsl");
const CORNERNESS_SRC: &str = include_str!("../shaders/cornerness.wgsl");

/// A compiled compute pipeline and the layout its bind groups follow.
pub struct GpuProgram {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    options: ProgramOptions,
}

impl GpuProgram {
    pub fn options(&self) -> &ProgramOptions {
        &self.options
    }
}

/// The wgpu implementation of the transform backend.
pub struct WgpuBackend {
    gpu: GpuDevice,
}

impl WgpuBackend {
    /// Open the preferred adapter under `profile` with a `block`-sided
    /// workgroup.
    pub fn new(profile: DeviceProfile, block: u32) -> Result<Self> {
        let mut gpu = GpuDevice::new_with_profile(profile)?;
        gpu.set_block_extent(block)?;
        log::info!("wgpu backend ready: {gpu}");
        Ok(WgpuBackend { gpu })
    }

    pub fn from_config(config: &DtcwtConfig) -> Result<Self> {
        Self::new(config.profile, config.block_extent as u32)
    }

    pub fn gpu(&self) -> &GpuDevice {
        &self.gpu
    }

    fn source_for(options: &ProgramOptions) -> String {
        let template = match options.kind {
            KernelKind::Filter => FILTER_SRC,
            KernelKind::Decimate => DECIMATE_SRC,
            KernelKind::Pad => PAD_SRC,
            KernelKind::QuadToComplex => Q2C_SRC,
            KernelKind::Cornerness => CORNERNESS_SRC,
        };
        template
            .replace("{{BLOCK}}", &options.block.to_string())
            .replace("{{FILTER_LENGTH}}", &options.filter_length.to_string())
            .replace("{{FILTER_COUNT}}", &options.filter_count.to_string())
            .replace("{{SWAP_MASK}}", &options.swap_mask().to_string())
            .replace("{{COLUMN}}", if options.axis == Axis::Column { "true" } else { "false" })
    }

    fn bind_group_layout(&self, kind: KernelKind, label: &str) -> wgpu::BindGroupLayout {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = match kind {
            KernelKind::Filter | KernelKind::Decimate => vec![
                storage_entry(0, true),
                storage_entry(1, false),
                storage_entry(2, true),
                uniform_entry(3),
            ],
            KernelKind::Pad => vec![storage_entry(0, false), uniform_entry(1)],
            KernelKind::QuadToComplex | KernelKind::Cornerness => {
                vec![storage_entry(0, true), storage_entry(1, false), uniform_entry(2)]
            }
        };
        self.gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        })
    }

    /// Record one launch as its own compute pass.
    fn encode_launch(&self, encoder: &mut wgpu::CommandEncoder, launch: &Launch<Self>) {
        let program = &launch.program;
        let params_buf = self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dtcwt::params"),
            contents: launch.params.as_bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries: Vec<wgpu::BindGroupEntry> = launch
            .bindings
            .iter()
            .enumerate()
            .map(|(i, alloc)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: alloc.raw().as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: launch.bindings.len() as u32,
            resource: params_buf.as_entire_binding(),
        });
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("dtcwt::bind_group"),
            layout: &program.bind_group_layout,
            entries: &entries,
        });

        let (groups_x, groups_y) = self.gpu.dispatch_size(launch.grid[0], launch.grid[1]);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(program.options.kind.entry_point()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups_x, groups_y, launch.grid[2]);
    }
}

// ---------------------------------------------------------------------------
// Backend implementation
// ---------------------------------------------------------------------------

impl Backend for WgpuBackend {
    type Storage = wgpu::Buffer;
    type Program = GpuProgram;

    fn name(&self) -> String {
        format!("wgpu ({})", self.gpu.adapter_info)
    }

    fn max_workgroup_invocations(&self) -> u32 {
        self.gpu.device.limits().max_compute_invocations_per_workgroup
    }

    fn allocate(&self, words: usize, label: &str) -> Result<wgpu::Buffer> {
        if words == 0 {
            return Err(Error::Configuration(format!("allocation `{label}` is empty")));
        }
        let size = (words * std::mem::size_of::<f32>()) as u64;
        let limit = self.gpu.device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(Error::Configuration(format!(
                "allocation `{label}` needs {size} bytes, the device binds at most {limit}"
            )));
        }
        // wgpu zero-initialises new buffers.
        Ok(self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    fn compile(&self, options: &ProgramOptions) -> Result<GpuProgram> {
        let label = options.label();
        if options.block != self.gpu.workgroup_size.x {
            return Err(Error::ProgramBuild {
                program: label,
                log: format!(
                    "block extent {} differs from the device workgroup {}",
                    options.block, self.gpu.workgroup_size
                ),
            });
        }
        let source = Self::source_for(options);
        let device = &self.gpu.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let bind_group_layout = self.bind_group_layout(options.kind, &label);
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: Some(&layout),
            module: &module,
            entry_point: options.kind.entry_point(),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            let info = pollster::block_on(module.get_compilation_info());
            let mut log = err.to_string();
            for message in &info.messages {
                log.push('\n');
                log.push_str(&message.message);
            }
            return Err(Error::ProgramBuild { program: label, log });
        }

        log::debug!("compiled `{label}` for {}", self.gpu.adapter_info.name);
        Ok(GpuProgram { pipeline, bind_group_layout, options: options.clone() })
    }

    fn upload_taps(&self, taps: &[f32], label: &str) -> Result<wgpu::Buffer> {
        if taps.is_empty() {
            return Err(Error::Configuration(format!("tap buffer `{label}` is empty")));
        }
        Ok(self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(taps),
            usage: wgpu::BufferUsages::STORAGE,
        }))
    }

    fn execute(&self, commands: &[Command<Self>]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("dtcwt::batch"),
        });
        for command in commands {
            match command {
                Command::Write { data, .. } if data.is_empty() => {}
                Command::Write { target, offset, data } => {
                    let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("dtcwt::staging"),
                        contents: bytemuck::cast_slice(data),
                        usage: wgpu::BufferUsages::COPY_SRC,
                    });
                    let word = std::mem::size_of::<f32>() as u64;
                    encoder.copy_buffer_to_buffer(
                        &staging,
                        0,
                        target.raw(),
                        *offset as u64 * word,
                        data.len() as u64 * word,
                    );
                }
                Command::Launch(launch) => self.encode_launch(&mut encoder, launch),
            }
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());
        if let Some(err) = validation.or(oom) {
            return Err(Error::Execution(format!("batch of {} commands: {err}", commands.len())));
        }
        log::trace!("submitted {} commands", commands.len());
        Ok(())
    }

    fn read(&self, storage: &wgpu::Buffer, offset: usize, words: usize) -> Result<Vec<f32>> {
        if words == 0 {
            return Ok(Vec::new());
        }
        let word = std::mem::size_of::<f32>() as u64;
        let size = words as u64 * word;
        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("dtcwt::readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("dtcwt::readback"),
        });
        encoder.copy_buffer_to_buffer(storage, offset as u64 * word, &readback, 0, size);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| Error::Execution("readback map callback never fired".into()))?
            .map_err(|e| Error::Execution(format!("readback map failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let values = mapped
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        drop(mapped);
        readback.unmap();
        Ok(values)
    }

    fn wait_idle(&self) -> Result<()> {
        self.gpu.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// ============================================================
// Tests
// ============================================================
