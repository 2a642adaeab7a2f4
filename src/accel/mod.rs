// accel/mod.rs — Accelerator execution substrate.
//
// Everything the transform needs from a compute device fits in one trait:
//
//   allocate     → linear f32 storage
//   compile      → a program for one kernel kind, specialised by
//                  `ProgramOptions` (axis, workgroup, filter length, count,
//                  pair orders)
//   upload_taps  → read-only filter coefficients
//   execute      → run an ordered batch of writes and launches
//   read         → copy storage back to the host
//
// Ordering lives one layer up, in `queue::CommandQueue`. A backend only ever
// sees a batch that is already topologically sorted, so it may execute it
// strictly in order.
//
// Two backends implement the trait:
//   - `gpu::WgpuBackend` — WGSL compute shaders on Vulkan.
//   - `host::HostBackend` — the same kernels and index arithmetic on host
//     memory, used to validate orchestration without a GPU.
//
// NEW RUST CONCEPTS:
// - Associated types (`type Storage`, `type Program`) — each backend picks
//   its own handle types while generic code stays backend-agnostic.
// - `AtomicU64` for process-wide unique ids without a lock.
// - `#[repr(C)]` parameter structs with `bytemuck::Pod` — they are copied
//   verbatim into a uniform buffer, so field order must match the WGSL
//   struct declaration exactly.

pub mod buffer;
pub mod host;
pub mod queue;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::filters::PairOrder;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A compute device able to run the transform kernels.
pub trait Backend {
    /// Linear storage of `f32` words.
    type Storage: Send + Sync;
    /// A compiled kernel.
    type Program: Send + Sync;

    /// Human-readable backend name, for logging.
    fn name(&self) -> String;

    /// Largest workgroup (block × block) the device accepts.
    fn max_workgroup_invocations(&self) -> u32;

    /// Allocate zero-initialised storage of `words` f32 values.
    fn allocate(&self, words: usize, label: &str) -> Result<Self::Storage>;

    /// Build a program. Failures surface as `Error::ProgramBuild`.
    fn compile(&self, options: &ProgramOptions) -> Result<Self::Program>;

    /// Allocate read-only storage holding `taps`.
    fn upload_taps(&self, taps: &[f32], label: &str) -> Result<Self::Storage>;

    /// Run `commands` in slice order.
    fn execute(&self, commands: &[Command<Self>]) -> Result<()>
    where
        Self: Sized;

    /// Copy `words` values starting at word `offset` back to the host.
    /// Blocks until all previously executed work has completed.
    fn read(&self, storage: &Self::Storage, offset: usize, words: usize) -> Result<Vec<f32>>;

    /// Block until all executed work has completed.
    fn wait_idle(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Allocations
// ---------------------------------------------------------------------------

/// Process-unique identity of one allocation. Hazard tracking keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageId(u64);

impl StorageId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StorageId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Backend storage tagged with an id, a size and a label.
///
/// Shared through `Arc`: image buffers own one reference, and every pending
/// command that touches the storage holds another until it is submitted.
pub struct Allocation<S> {
    id: StorageId,
    words: usize,
    label: String,
    raw: S,
}

impl<S> Allocation<S> {
    pub fn new(raw: S, words: usize, label: &str) -> Arc<Self> {
        Arc::new(Allocation { id: StorageId::next(), words, label: label.to_string(), raw })
    }

    #[inline]
    pub fn id(&self) -> StorageId {
        self.id
    }

    #[inline]
    pub fn words(&self) -> usize {
        self.words
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn raw(&self) -> &S {
        &self.raw
    }
}

impl<S> fmt::Debug for Allocation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocation({} `{}`, {} words)", self.id, self.label, self.words)
    }
}

// ---------------------------------------------------------------------------
// Program options
// ---------------------------------------------------------------------------

/// Axis a 1D kernel runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Along a row (x).
    Row,
    /// Along a column (y).
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Column => write!(f, "column"),
        }
    }
}

/// Which kernel a program implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// 1D convolution, output extent = input extent (+1 extension sample).
    Filter,
    /// 1D convolution with decimation by 2 and two interleaved trees.
    Decimate,
    /// Materialise symmetric padding along one axis.
    Pad,
    /// 2×2 real block to two complex samples.
    QuadToComplex,
    /// Six complex subbands to one real cornerness sample.
    Cornerness,
}

impl KernelKind {
    /// Entry point name in the WGSL source.
    pub fn entry_point(self) -> &'static str {
        match self {
            KernelKind::Filter => "filter_main",
            KernelKind::Decimate => "decimate_main",
            KernelKind::Pad => "pad_main",
            KernelKind::QuadToComplex => "q2c_main",
            KernelKind::Cornerness => "cornerness_main",
        }
    }
}

/// Compile-time specialisation of a program.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramOptions {
    pub kind: KernelKind,
    pub axis: Axis,
    /// Square workgroup side (block extent).
    pub block: u32,
    /// Taps per filter (0 for kernels without filters).
    pub filter_length: usize,
    /// Filters bound in one launch (output slices).
    pub filter_count: usize,
    /// Pair order per filter. Only meaningful for `Decimate`.
    pub orders: Vec<PairOrder>,
}

impl ProgramOptions {
    /// Options for a kernel that takes no filter taps.
    pub fn untapped(kind: KernelKind, axis: Axis, block: u32) -> Self {
        ProgramOptions { kind, axis, block, filter_length: 0, filter_count: 0, orders: Vec::new() }
    }

    /// Bit `i` set when filter `i` uses `PairOrder::Swapped`.
    pub fn swap_mask(&self) -> u32 {
        self.orders
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == PairOrder::Swapped)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    /// Short name used for shader labels and build errors.
    pub fn label(&self) -> String {
        match self.kind {
            KernelKind::Filter | KernelKind::Decimate => format!(
                "{}_{}_x{}_len{}_swap{:#b}",
                self.kind.entry_point().trim_end_matches("_main"),
                self.axis,
                self.filter_count,
                self.filter_length,
                self.swap_mask(),
            ),
            KernelKind::Pad => format!("pad_{}", self.axis),
            KernelKind::QuadToComplex => "q2c".to_string(),
            KernelKind::Cornerness => "cornerness".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Kernel parameters (must match the WGSL structs field for field)
// ---------------------------------------------------------------------------
//
// All offsets, steps and pitches are in f32 words. `step` moves one sample
// along the kernel axis, `cross` moves one sample across it. A zero
// `in_pitch` means every output slice reads the same input slice.

/// Parameters of the plain filter kernel (`filter.wgsl`). 48 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FilterParams {
    pub in_origin: u32,
    pub in_step: u32,
    pub in_cross: u32,
    pub in_pitch: u32,
    pub out_origin: u32,
    pub out_step: u32,
    pub out_cross: u32,
    pub out_pitch: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub slices: u32,
    pub _pad: u32,
}

/// Parameters of the decimating filter kernel (`decimate.wgsl`). 48 bytes.
///
/// `in_origin` already includes the read-origin shift for a leading
/// extension sample.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DecimateParams {
    pub in_origin: u32,
    pub in_step: u32,
    pub in_cross: u32,
    pub in_pitch: u32,
    pub out_origin: u32,
    pub out_step: u32,
    pub out_cross: u32,
    pub out_pitch: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub slices: u32,
    pub _pad: u32,
}

/// Parameters of the symmetric padding kernel (`pad.wgsl`). 48 bytes.
///
/// The dispatch covers `2 * padding` positions along the axis: the first
/// `padding` fill the leading margin, the rest the trailing one.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PadParams {
    pub origin: u32,
    pub step: u32,
    pub cross: u32,
    pub pitch: u32,
    /// Logical extent along the axis.
    pub length: u32,
    /// Logical extent across the axis.
    pub cross_length: u32,
    pub slices: u32,
    pub padding: u32,
    pub ext_start: u32,
    pub ext_end: u32,
    pub _pad: [u32; 2],
}

/// Parameters of the quad-to-complex kernel (`q2c.wgsl`). 48 bytes.
///
/// Output offsets are in complex elements; the kernel doubles them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct QuadParams {
    pub in_origin: u32,
    pub in_stride: u32,
    pub out_origin: u32,
    pub out_stride: u32,
    pub out_pitch: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub first_slot: u32,
    pub second_slot: u32,
    pub _pad: [u32; 3],
}

/// Parameters of the cornerness kernel (`cornerness.wgsl`). 48 bytes.
///
/// Input offsets are in complex elements; the kernel doubles them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CornernessParams {
    pub in_origin: u32,
    pub in_stride: u32,
    pub in_pitch: u32,
    pub out_origin: u32,
    pub out_stride: u32,
    pub width: u32,
    pub height: u32,
    pub exponent: f32,
    pub _pad: [u32; 4],
}

/// Named parameters of one launch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Params {
    Filter(FilterParams),
    Decimate(DecimateParams),
    Pad(PadParams),
    Quad(QuadParams),
    Cornerness(CornernessParams),
}

impl Params {
    pub fn kind(&self) -> KernelKind {
        match self {
            Params::Filter(_) => KernelKind::Filter,
            Params::Decimate(_) => KernelKind::Decimate,
            Params::Pad(_) => KernelKind::Pad,
            Params::Quad(_) => KernelKind::QuadToComplex,
            Params::Cornerness(_) => KernelKind::Cornerness,
        }
    }

    /// Raw bytes for the uniform buffer.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Params::Filter(p) => bytemuck::bytes_of(p),
            Params::Decimate(p) => bytemuck::bytes_of(p),
            Params::Pad(p) => bytemuck::bytes_of(p),
            Params::Quad(p) => bytemuck::bytes_of(p),
            Params::Cornerness(p) => bytemuck::bytes_of(p),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Storage bound to a launch, in binding order.
///
/// - `Filter`/`Decimate`: input, output, taps
/// - `Pad`: the padded buffer (read and written in place)
/// - `QuadToComplex`: quad input, complex output
/// - `Cornerness`: complex subbands, real output
pub type Bindings<S> = Vec<Arc<Allocation<S>>>;

/// One kernel launch.
pub struct Launch<B: Backend> {
    pub program: Arc<B::Program>,
    pub params: Params,
    pub bindings: Bindings<B::Storage>,
    /// Global invocation counts (x, y, z). The backend divides by the
    /// workgroup size.
    pub grid: [u32; 3],
}

/// A unit of device work.
pub enum Command<B: Backend> {
    /// Copy host words into storage at word `offset`.
    Write { target: Arc<Allocation<B::Storage>>, offset: usize, data: Vec<f32> },
    Launch(Launch<B>),
}

impl<B: Backend> Command<B> {
    /// Short description for trace logging.
    pub fn describe(&self) -> String {
        match self {
            Command::Write { target, data, .. } => {
                format!("write {} words to `{}`", data.len(), target.label())
            }
            Command::Launch(l) => format!(
                "{:?} grid {}×{}×{}",
                l.params.kind(),
                l.grid[0],
                l.grid[1],
                l.grid[2]
            ),
        }
    }
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub fn align_to(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}
