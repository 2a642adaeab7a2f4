// gpu/device.rs — Adapter, device and workgroup selection for the wgpu
// backend.
//
// The transform only needs compute: no surface, no textures. What matters
// here is picking a real Vulkan adapter, requesting limits that match the
// target board, and fixing the square workgroup every kernel is compiled
// with. The workgroup side is the block extent, which also bounds the
// filter halo, so it is checked against the profile before any pipeline is
// built.
//
// ADAPTER SELECTION
// ─────────────────
// Adapters are enumerated explicitly. Hardware adapters (discrete,
// integrated, virtual, or "other" such as dzn on WSL2) win over software
// rasterisers like llvmpipe, which only serve as a last resort.
//
// PROFILES
// ────────
// `RaspberryPi` requests the VideoCore limits even on a desktop GPU. wgpu
// validates pipelines and dispatches against the requested limits, so a
// block extent the board cannot run fails on the development machine too.
//
// NEW RUST CONCEPTS:
// - `pollster::block_on` drives wgpu's async adapter/device requests to
//   completion on the calling thread.
// - `#[serde(rename_all = "snake_case")]` names the profile `"native"` or
//   `"raspberry_pi"` in a JSON config.

use std::fmt;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Device limits to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProfile {
    /// wgpu's default limits.
    #[default]
    Native,
    /// VideoCore VI/VII (V3DV) limits, on any adapter.
    /// Caps `max_compute_invocations_per_workgroup` to 256.
    RaspberryPi,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

/// A 2D workgroup size. The transform kernels always use a square one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub x: u32,
    pub y: u32,
}

impl WorkgroupSize {
    /// Total invocations per workgroup (x * y).
    pub fn total(&self) -> u32 {
        self.x * self.y
    }

    /// `block × block`, checked against the profile's invocation limit.
    pub fn square(block: u32, profile: DeviceProfile) -> Result<Self> {
        let size = WorkgroupSize { x: block, y: block };
        let max = max_invocations_for_profile(profile);
        if block == 0 || size.total() > max {
            return Err(Error::Configuration(format!(
                "workgroup {block}×{block} exceeds the {profile} limit of {max} invocations"
            )));
        }
        Ok(size)
    }
}

impl Default for WorkgroupSize {
    /// 16×16 = 256 invocations: the default block extent, and within the
    /// limit of every profile.
    fn default() -> Self {
        WorkgroupSize { x: 16, y: 16 }
    }
}

impl fmt::Display for WorkgroupSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} ({} invocations)", self.x, self.y, self.total())
    }
}

/// The selected adapter, as reported in logs and `Display`.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

/// An opened device with its queue, profile and transform workgroup.
///
/// # Field drop order
/// Rust drops struct fields in declaration order (top → bottom).
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`. dzn (the D3D12-to-Vulkan layer on WSL2) crashes when the
/// Vulkan instance is destroyed before device-level objects.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    pub workgroup_size: WorkgroupSize,
    /// Only here to control drop order.
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// First suitable Vulkan adapter with `DeviceProfile::Native` limits.
    pub fn new() -> Result<Self> {
        Self::new_with_profile(DeviceProfile::Native)
    }

    /// Create a `GpuDevice` with an explicit hardware profile.
    pub fn new_with_profile(profile: DeviceProfile) -> Result<Self> {
        pollster::block_on(Self::init_async(profile))
    }

    async fn init_async(profile: DeviceProfile) -> Result<Self> {
        // dzn on WSL2 declares itself non-conformant and would be dropped by
        // default; we only run compute, so let it through.
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
                | wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        } else {
            wgpu::InstanceFlags::ALLOW_UNDERLYING_NONCOMPLIANT_ADAPTER
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            flags,
            ..Default::default()
        });

        // Tiered selection:
        //   1. DiscreteGpu / IntegratedGpu / VirtualGpu / Other (dzn)
        //   2. anything at all, software included — logged as a warning.
        let all_adapters: Vec<wgpu::Adapter> =
            instance.enumerate_adapters(wgpu::Backends::VULKAN).into_iter().collect();
        for a in &all_adapters {
            let info = a.get_info();
            log::debug!("Vulkan adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }

        let preferred = all_adapters.iter().position(|a| {
            matches!(
                a.get_info().device_type,
                wgpu::DeviceType::DiscreteGpu
                    | wgpu::DeviceType::IntegratedGpu
                    | wgpu::DeviceType::VirtualGpu
                    | wgpu::DeviceType::Other
            )
        });
        let adapter = all_adapters
            .into_iter()
            .nth(preferred.unwrap_or(0))
            .ok_or_else(|| {
                Error::Device(
                    "no Vulkan adapter found. On WSL2: ensure Vulkan is installed and \
                     `vulkaninfo` lists a real GPU"
                        .to_string(),
                )
            })?;

        let raw_info = adapter.get_info();
        if raw_info.device_type == wgpu::DeviceType::Cpu {
            log::warn!("only a software adapter is available: {}", raw_info.name);
        }
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // Auto-detect RPi when the caller passed Native but the adapter is V3D.
        let profile = match profile {
            DeviceProfile::Native if raw_info.name.to_ascii_lowercase().contains("v3d") => {
                log::info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("dtcwt-wgpu"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits_for_profile(profile),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        log::info!("using {adapter_info} with {profile} profile");
        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            workgroup_size: WorkgroupSize::default(),
            _instance: instance,
        })
    }

    /// Set the square workgroup side, validating against the active profile.
    pub fn set_block_extent(&mut self, block: u32) -> Result<()> {
        self.workgroup_size = WorkgroupSize::square(block, self.profile)?;
        Ok(())
    }

    /// Workgroups needed to cover `grid` invocations in x and y.
    ///
    /// Ceiling division, so the shader must guard out-of-range ids.
    pub fn dispatch_size(&self, grid_x: u32, grid_y: u32) -> (u32, u32) {
        (grid_x.div_ceil(self.workgroup_size.x), grid_y.div_ceil(self.workgroup_size.y))
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, workgroup: {} }}",
            self.adapter_info, self.profile, self.workgroup_size
        )
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Limits requested from the adapter under `profile`.
pub(crate) fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            // VideoCore VI/VII: vulkaninfo reports 256 max invocations.
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            // RPi 4 shares 4 GiB with the CPU; 128 MiB per binding covers
            // a 6-level context at 1080p.
            max_storage_buffer_binding_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

/// Workgroup invocation cap of `profile`, known without opening a device.
pub fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default().max_compute_invocations_per_workgroup,
        DeviceProfile::RaspberryPi => 256,
    }
}

// ============================================================
// Tests
// ============================================================
