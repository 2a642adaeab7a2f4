// accel/host.rs — Host-memory backend.
//
// Runs the five kernels on the CPU with exactly the index arithmetic of the
// WGSL shaders: the same parameter structs, the same reversed tap buffers,
// the same padded reads with no bounds logic beyond what the shader has.
// A result that differs from the reference here points at the orchestration
// or the layout, not at the GPU.
//
// Out-of-range accesses, which on a GPU would silently read garbage, are
// reported as `Error::Execution` instead.
//
// NEW RUST CONCEPTS:
// - `Mutex<Vec<f32>>` as the storage type — `Backend::Storage` must be
//   `Send + Sync`, and each launch locks its bindings for the duration of
//   one kernel.
// - `Arc::ptr_eq` — detects the same allocation bound twice, which would
//   otherwise deadlock on the second lock.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::accel::{
    Allocation, Axis, Backend, Command, CornernessParams, DecimateParams, FilterParams,
    KernelKind, Launch, PadParams, Params, ProgramOptions, QuadParams,
};
use crate::convolution::reflect;
use crate::error::{Error, Result};
use crate::quad::combine;

/// Default invocation limit, matching wgpu's default
/// `max_compute_invocations_per_workgroup`.
const DEFAULT_MAX_INVOCATIONS: u32 = 256;

/// Executes kernels on host memory.
#[derive(Debug, Clone)]
pub struct HostBackend {
    max_invocations: u32,
}

impl HostBackend {
    pub fn new() -> Self {
        HostBackend { max_invocations: DEFAULT_MAX_INVOCATIONS }
    }

    /// A host backend that enforces a different workgroup limit.
    pub fn with_max_invocations(max_invocations: u32) -> Self {
        HostBackend { max_invocations }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A "compiled" host program: the validated options.
#[derive(Debug, Clone)]
pub struct HostProgram {
    options: ProgramOptions,
}

impl HostProgram {
    pub fn options(&self) -> &ProgramOptions {
        &self.options
    }
}

impl Backend for HostBackend {
    type Storage = Mutex<Vec<f32>>;
    type Program = HostProgram;

    fn name(&self) -> String {
        "host".to_string()
    }

    fn max_workgroup_invocations(&self) -> u32 {
        self.max_invocations
    }

    fn allocate(&self, words: usize, _label: &str) -> Result<Self::Storage> {
        Ok(Mutex::new(vec![0.0; words]))
    }

    fn compile(&self, options: &ProgramOptions) -> Result<Self::Program> {
        let fail = |log: String| Error::ProgramBuild { program: options.label(), log };
        let tapped = matches!(options.kind, KernelKind::Filter | KernelKind::Decimate);

        if options.block == 0 || options.block * options.block > self.max_invocations {
            return Err(fail(format!(
                "workgroup {0}×{0} outside 1..={1} invocations",
                options.block, self.max_invocations
            )));
        }
        if tapped {
            if options.filter_length == 0 || options.filter_count == 0 {
                return Err(fail("filter kernel without taps".to_string()));
            }
            if options.orders.len() != options.filter_count {
                return Err(fail(format!(
                    "{} pair orders for {} filters",
                    options.orders.len(),
                    options.filter_count
                )));
            }
        }
        if options.kind == KernelKind::Decimate && options.filter_length % 2 != 0 {
            return Err(fail(format!("odd decimating length {}", options.filter_length)));
        }
        log::debug!("host program `{}` ready", options.label());
        Ok(HostProgram { options: options.clone() })
    }

    fn upload_taps(&self, taps: &[f32], _label: &str) -> Result<Self::Storage> {
        Ok(Mutex::new(taps.to_vec()))
    }

    fn execute(&self, commands: &[Command<Self>]) -> Result<()> {
        for command in commands {
            match command {
                Command::Write { target, offset, data } => {
                    let mut dst = lock(target)?;
                    let end = offset + data.len();
                    let slot = dst.get_mut(*offset..end).ok_or_else(|| {
                        Error::Execution(format!("write {offset}..{end} past `{}`", target.label()))
                    })?;
                    slot.copy_from_slice(data);
                }
                Command::Launch(launch) => run_launch(launch)?,
            }
        }
        Ok(())
    }

    fn read(&self, storage: &Self::Storage, offset: usize, words: usize) -> Result<Vec<f32>> {
        let src = storage
            .lock()
            .map_err(|_| Error::Execution("host storage lock poisoned".to_string()))?;
        src.get(offset..offset + words)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| Error::Execution(format!("read {offset}+{words} out of range")))
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }
}

fn lock<'a>(alloc: &'a Arc<Allocation<Mutex<Vec<f32>>>>) -> Result<MutexGuard<'a, Vec<f32>>> {
    alloc
        .raw()
        .lock()
        .map_err(|_| Error::Execution(format!("storage `{}` lock poisoned", alloc.label())))
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

fn run_launch(launch: &Launch<HostBackend>) -> Result<()> {
    let options = &launch.program.options;
    if launch.params.kind() != options.kind {
        return Err(Error::Execution(format!(
            "{:?} parameters passed to `{}`",
            launch.params.kind(),
            options.label()
        )));
    }
    let expected = match options.kind {
        KernelKind::Filter | KernelKind::Decimate => 3,
        KernelKind::Pad => 1,
        KernelKind::QuadToComplex | KernelKind::Cornerness => 2,
    };
    if launch.bindings.len() != expected {
        return Err(Error::Execution(format!(
            "`{}` expects {expected} bindings, got {}",
            options.label(),
            launch.bindings.len()
        )));
    }
    if expected > 1 && Arc::ptr_eq(&launch.bindings[0], &launch.bindings[1]) {
        return Err(Error::Execution(format!("`{}` binds one storage twice", options.label())));
    }

    match launch.params {
        Params::Filter(p) => {
            let input = lock(&launch.bindings[0])?;
            let mut output = lock(&launch.bindings[1])?;
            let taps = lock(&launch.bindings[2])?;
            filter(options, &p, launch.grid, &input, &mut output, &taps)
        }
        Params::Decimate(p) => {
            let input = lock(&launch.bindings[0])?;
            let mut output = lock(&launch.bindings[1])?;
            let taps = lock(&launch.bindings[2])?;
            decimate(options, &p, launch.grid, &input, &mut output, &taps)
        }
        Params::Pad(p) => {
            let mut data = lock(&launch.bindings[0])?;
            pad(options.axis, &p, launch.grid, &mut data)
        }
        Params::Quad(p) => {
            let input = lock(&launch.bindings[0])?;
            let mut output = lock(&launch.bindings[1])?;
            quad_to_complex(&p, launch.grid, &input, &mut output)
        }
        Params::Cornerness(p) => {
            let input = lock(&launch.bindings[0])?;
            let mut output = lock(&launch.bindings[1])?;
            cornerness(&p, launch.grid, &input, &mut output)
        }
    }
}

#[inline]
fn fetch(buf: &[f32], index: i64) -> Result<f32> {
    usize::try_from(index)
        .ok()
        .and_then(|i| buf.get(i).copied())
        .ok_or_else(|| Error::Execution(format!("read at {index} outside {} words", buf.len())))
}

#[inline]
fn store(buf: &mut [f32], index: i64, value: f32) -> Result<()> {
    let len = buf.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| buf.get_mut(i))
        .ok_or_else(|| Error::Execution(format!("write at {index} outside {len} words")))?;
    *slot = value;
    Ok(())
}

/// Every global invocation id of `grid`, as the shader would see them.
fn invocations(grid: [u32; 3]) -> impl Iterator<Item = (u32, u32, u32)> {
    (0..grid[2]).flat_map(move |z| {
        (0..grid[1]).flat_map(move |y| (0..grid[0]).map(move |x| (x, y, z)))
    })
}

/// Split a 2D id into (along, cross) for the program's axis.
#[inline]
fn along_cross(axis: Axis, x: u32, y: u32) -> (i64, i64) {
    match axis {
        Axis::Row => (x as i64, y as i64),
        Axis::Column => (y as i64, x as i64),
    }
}

fn filter(
    options: &ProgramOptions,
    p: &FilterParams,
    grid: [u32; 3],
    input: &[f32],
    output: &mut [f32],
    taps: &[f32],
) -> Result<()> {
    let len = options.filter_length as i64;
    for (x, y, z) in invocations(grid) {
        if x >= p.out_width || y >= p.out_height || z >= p.slices {
            continue;
        }
        let (along, cross) = along_cross(options.axis, x, y);
        let base = p.in_origin as i64 + z as i64 * p.in_pitch as i64 + cross * p.in_cross as i64;
        let first = along - len / 2;
        let mut acc = 0.0f32;
        for j in 0..len {
            let tap = fetch(taps, z as i64 * len + j)?;
            acc += tap * fetch(input, base + (first + j) * p.in_step as i64)?;
        }
        let dst = p.out_origin as i64
            + z as i64 * p.out_pitch as i64
            + cross * p.out_cross as i64
            + along * p.out_step as i64;
        store(output, dst, acc)?;
    }
    Ok(())
}

fn decimate(
    options: &ProgramOptions,
    p: &DecimateParams,
    grid: [u32; 3],
    input: &[f32],
    output: &mut [f32],
    taps: &[f32],
) -> Result<()> {
    let len = options.filter_length as i64;
    let swap_mask = options.swap_mask();
    for (x, y, z) in invocations(grid) {
        if x >= p.out_width || y >= p.out_height || z >= p.slices {
            continue;
        }
        let (along, cross) = along_cross(options.axis, x, y);
        let tree = (along as u32 & 1) ^ ((swap_mask >> z) & 1);
        let pair = along / 2;
        let base = p.in_origin as i64 + z as i64 * p.in_pitch as i64 + cross * p.in_cross as i64;
        let tap_base = z as i64 * len;

        let mut acc = 0.0f32;
        for j in 0..len {
            let (tap, offset) = if tree == 0 {
                (fetch(taps, tap_base + j)?, 4 * pair - len + 2 + 2 * j)
            } else {
                (fetch(taps, tap_base + len - 1 - j)?, 4 * pair - len + 3 + 2 * j)
            };
            acc += tap * fetch(input, base + offset * p.in_step as i64)?;
        }
        let dst = p.out_origin as i64
            + z as i64 * p.out_pitch as i64
            + cross * p.out_cross as i64
            + along * p.out_step as i64;
        store(output, dst, acc)?;
    }
    Ok(())
}

fn pad(axis: Axis, p: &PadParams, grid: [u32; 3], data: &mut [f32]) -> Result<()> {
    let n = p.length as i64;
    let start = p.ext_start as i64;
    let extended = (p.length + p.ext_start + p.ext_end) as usize;
    for (x, y, z) in invocations(grid) {
        let (i, cross) = along_cross(axis, x, y);
        if i >= 2 * p.padding as i64 || cross >= p.cross_length as i64 || z >= p.slices {
            continue;
        }
        let pos = if i < p.padding as i64 { i - p.padding as i64 } else { n + i - p.padding as i64 };
        let src = (reflect((pos + start) as isize, extended) as i64 - start).clamp(0, n - 1);

        let base = p.origin as i64 + z as i64 * p.pitch as i64 + cross * p.cross as i64;
        let value = fetch(data, base + src * p.step as i64)?;
        store(data, base + pos * p.step as i64, value)?;
    }
    Ok(())
}

fn quad_to_complex(p: &QuadParams, grid: [u32; 3], input: &[f32], output: &mut [f32]) -> Result<()> {
    for (x, y, _) in invocations(grid) {
        if x >= p.out_width || y >= p.out_height {
            continue;
        }
        let stride = p.in_stride as i64;
        let top = p.in_origin as i64 + 2 * y as i64 * stride + 2 * x as i64;
        let a = fetch(input, top)?;
        let b = fetch(input, top + 1)?;
        let c = fetch(input, top + stride)?;
        let d = fetch(input, top + stride + 1)?;
        let (z1, z2) = combine(a, b, c, d);

        let pixel = p.out_origin as i64 + y as i64 * p.out_stride as i64 + x as i64;
        for (slot, z) in [(p.first_slot, z1), (p.second_slot, z2)] {
            let elem = pixel + slot as i64 * p.out_pitch as i64;
            store(output, 2 * elem, z.re)?;
            store(output, 2 * elem + 1, z.im)?;
        }
    }
    Ok(())
}

fn cornerness(
    p: &CornernessParams,
    grid: [u32; 3],
    input: &[f32],
    output: &mut [f32],
) -> Result<()> {
    for (x, y, _) in invocations(grid) {
        if x >= p.width || y >= p.height {
            continue;
        }
        let pixel = p.in_origin as i64 + y as i64 * p.in_stride as i64 + x as i64;
        let mut product = 1.0f32;
        for slot in 0..6i64 {
            let elem = 2 * (pixel + slot * p.in_pitch as i64);
            let re = fetch(input, elem)?;
            let im = fetch(input, elem + 1)?;
            product *= (re * re + im * im).sqrt();
        }
        let value = if product > 0.0 { product.powf(p.exponent) } else { 0.0 };
        let dst = p.out_origin as i64 + y as i64 * p.out_stride as i64 + x as i64;
        store(output, dst, value)?;
    }
    Ok(())
}
