// ops/filter.rs — Separable 1D filter operators.
//
// Two operators share one skeleton:
//
//   SeparableFilter   y[n] = Σ_j r[j] · x[n − L/2 + j]
//   DecimatingFilter  tree 0 at 2n+p: Σ_j r[j]     · x[4n − L + 2 + 2j]
//                     tree 1:         Σ_j r[L−1−j] · x[4n − L + 3 + 2j]
//
// where r is the time-reversed filter. Both run along one axis, bind one or
// three filters, and launch once for all of them. A triple either shares one
// input (row pass) or reads slice i of a 3-slice input with filter i
// (column pass). Output slice i always receives filter i.
//
// CONSTRUCTION-TIME CHECKS
// ────────────────────────
//   both        padding ≥ block, block² ≤ device workgroup limit
//   plain       L/2 + 1 ≤ block; odd lengths are centre-padded to the
//               longest, unequal even lengths are rejected
//   decimating  all lengths equal and even, L − 1 ≤ block
//
// The read origin for a decimating pass moves back one step when the input
// has a leading extension sample; that is inferred from the extents.

use std::sync::Arc;

use crate::accel::buffer::View;
use crate::accel::queue::{Access, CommandQueue, Event};
use crate::accel::{
    Allocation, Axis, Backend, DecimateParams, FilterParams, KernelKind, Launch, Params,
    ProgramOptions,
};
use crate::error::{ensure_config, ensure_shape, Error, Result};
use crate::filters::{FilterSpec, PairOrder};

/// Compiled program plus uploaded taps shared by both operators.
struct FilterCore<B: Backend> {
    program: Arc<B::Program>,
    taps: Arc<Allocation<B::Storage>>,
    axis: Axis,
    length: usize,
    count: usize,
    padding: usize,
    label: String,
}

impl<B: Backend> FilterCore<B> {
    fn build(
        backend: &B,
        kind: KernelKind,
        axis: Axis,
        taps: Vec<Vec<f32>>,
        orders: Vec<PairOrder>,
        block: usize,
        padding: usize,
    ) -> Result<Self> {
        let length = taps[0].len();
        let count = taps.len();
        let options = ProgramOptions {
            kind,
            axis,
            block: block as u32,
            filter_length: length,
            filter_count: count,
            orders,
        };
        let label = options.label();
        let program = backend.compile(&options)?;
        // Reversed: the kernels correlate.
        let flat: Vec<f32> = taps.iter().flat_map(|t| t.iter().rev().copied()).collect();
        let raw = backend.upload_taps(&flat, &label)?;
        log::debug!("built `{label}` on {}", backend.name());
        Ok(FilterCore {
            program: Arc::new(program),
            taps: Allocation::new(raw, flat.len(), &label),
            axis,
            length,
            count,
            padding,
            label,
        })
    }

    /// Checks common to both operators. Returns the input pitch to bind.
    fn check_views(&self, input: &View<'_, B, f32>, output: &View<'_, B, f32>) -> Result<u32> {
        ensure_shape!(
            input.padding() == self.padding,
            "`{}`: input `{}` has padding {}, expected {}",
            self.label,
            input.buffer().label(),
            input.padding(),
            self.padding,
        );
        ensure_shape!(
            input.storage_id() != output.storage_id(),
            "`{}`: input and output share `{}`",
            self.label,
            input.buffer().label(),
        );
        ensure_shape!(
            input.cross_extent(self.axis) == output.cross_extent(self.axis),
            "`{}`: cross extent {} != {}",
            self.label,
            input.cross_extent(self.axis),
            output.cross_extent(self.axis),
        );
        ensure_shape!(
            output.slices() == self.count,
            "`{}`: output has {} slices for {} filters",
            self.label,
            output.slices(),
            self.count,
        );
        ensure_shape!(
            input.slices() == 1 || input.slices() == self.count,
            "`{}`: input has {} slices, expected 1 or {}",
            self.label,
            input.slices(),
            self.count,
        );
        Ok(if input.slices() == 1 { 0 } else { input.pitch() as u32 })
    }

    fn launch(
        &self,
        queue: &mut CommandQueue<'_, B>,
        params: Params,
        input: &View<'_, B, f32>,
        output: &View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        let launch = Launch {
            program: Arc::clone(&self.program),
            params,
            bindings: vec![
                Arc::clone(input.allocation()),
                Arc::clone(output.allocation()),
                Arc::clone(&self.taps),
            ],
            grid: [output.width() as u32, output.height() as u32, self.count as u32],
        };
        let access = Access::new().read(input.region()).write(output.region());
        queue.launch(&self.label, launch, access, wait)
    }
}

/// Validation shared by both constructors.
fn check_common<B: Backend>(
    backend: &B,
    filters: &[FilterSpec],
    block: usize,
    padding: usize,
) -> Result<()> {
    ensure_config!(!filters.is_empty(), "a filter operator needs at least one filter");
    ensure_config!(filters.len() <= 32, "at most 32 filters per launch (got {})", filters.len());
    ensure_config!(block > 0, "block extent must be positive");
    ensure_config!(
        padding >= block,
        "padding ({padding}) must be at least the block extent ({block})"
    );
    let invocations = (block * block) as u64;
    let max = backend.max_workgroup_invocations() as u64;
    ensure_config!(
        invocations <= max,
        "block {block}×{block} needs {invocations} invocations, {} allows {max}",
        backend.name(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// SeparableFilter
// ---------------------------------------------------------------------------

/// Non-decimating 1D filter along one axis, single or triple.
pub struct SeparableFilter<B: Backend> {
    core: FilterCore<B>,
}

impl<B: Backend> SeparableFilter<B> {
    pub fn new(
        backend: &B,
        axis: Axis,
        filters: &[FilterSpec],
        block: usize,
        padding: usize,
    ) -> Result<Self> {
        check_common(backend, filters, block, padding)?;

        let length = filters.iter().map(FilterSpec::len).max().unwrap_or(0);
        let mut taps = Vec::with_capacity(filters.len());
        for f in filters {
            ensure_config!(!f.is_empty(), "empty filter");
            ensure_config!(
                f.len() == length || f.len() % 2 == 1,
                "even filter lengths must match ({} vs {length})",
                f.len(),
            );
            let Some(padded) = f.centre_padded(length) else {
                return Err(Error::Configuration(format!(
                    "cannot centre a {}-tap filter in {length} taps",
                    f.len()
                )));
            };
            taps.push(padded);
        }
        ensure_config!(
            length / 2 + 1 <= block,
            "{length}-tap filter needs a halo of {} but the block extent is {block}",
            length / 2 + 1,
        );

        let orders = vec![PairOrder::Natural; filters.len()];
        let core = FilterCore::build(backend, KernelKind::Filter, axis, taps, orders, block, padding)?;
        Ok(SeparableFilter { core })
    }

    /// Filter `input` into `output`.
    ///
    /// `output.extent(axis)` may exceed `input.extent(axis)` by one when the
    /// input's far edge was padded with an extension sample, which only
    /// happens for odd input extents.
    pub fn apply(
        &self,
        queue: &mut CommandQueue<'_, B>,
        input: View<'_, B, f32>,
        output: View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        let core = &self.core;
        let in_pitch = core.check_views(&input, &output)?;
        let (n_in, n_out) = (input.extent(core.axis), output.extent(core.axis));
        ensure_shape!(
            n_out == n_in || n_out == n_in + 1,
            "`{}`: output extent {n_out} for input extent {n_in}",
            core.label,
        );
        ensure_shape!(
            n_out == n_in || n_in % 2 == 1,
            "`{}`: extension sample requested for even input extent {n_in}",
            core.label,
        );

        let params = FilterParams {
            in_origin: input.origin() as u32,
            in_step: input.step(core.axis) as u32,
            in_cross: input.cross_step(core.axis) as u32,
            in_pitch,
            out_origin: output.origin() as u32,
            out_step: output.step(core.axis) as u32,
            out_cross: output.cross_step(core.axis) as u32,
            out_pitch: output.pitch() as u32,
            out_width: output.width() as u32,
            out_height: output.height() as u32,
            slices: core.count as u32,
            _pad: 0,
        };
        core.launch(queue, Params::Filter(params), &input, &output, wait)
    }

    pub fn axis(&self) -> Axis {
        self.core.axis
    }

    /// Taps per filter after centre padding.
    pub fn length(&self) -> usize {
        self.core.length
    }

    pub fn count(&self) -> usize {
        self.core.count
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }
}

// ---------------------------------------------------------------------------
// DecimatingFilter
// ---------------------------------------------------------------------------

/// Decimate-by-2 1D filter with two interleaved trees, single or triple.
pub struct DecimatingFilter<B: Backend> {
    core: FilterCore<B>,
}

impl<B: Backend> DecimatingFilter<B> {
    pub fn new(
        backend: &B,
        axis: Axis,
        filters: &[FilterSpec],
        block: usize,
        padding: usize,
    ) -> Result<Self> {
        check_common(backend, filters, block, padding)?;

        let length = filters[0].len();
        ensure_config!(
            filters.iter().all(|f| f.len() == length),
            "decimating filters must share one length (got {:?})",
            filters.iter().map(FilterSpec::len).collect::<Vec<_>>(),
        );
        ensure_config!(
            length > 0 && length % 2 == 0,
            "decimating filter length must be even (got {length})"
        );
        ensure_config!(
            length - 1 <= block,
            "{length}-tap decimating filter needs a halo of {} but the block extent is {block}",
            length - 1,
        );

        let taps = filters.iter().map(|f| f.taps().to_vec()).collect();
        let orders = filters.iter().map(FilterSpec::order).collect();
        let core =
            FilterCore::build(backend, KernelKind::Decimate, axis, taps, orders, block, padding)?;
        Ok(DecimatingFilter { core })
    }

    /// Filter and decimate `input` into `output`.
    ///
    /// `input.extent(axis) + 2e == 2 · output.extent(axis)`, where `e` is 1
    /// when the input carries extension samples at both ends.
    pub fn apply(
        &self,
        queue: &mut CommandQueue<'_, B>,
        input: View<'_, B, f32>,
        output: View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        let core = &self.core;
        let in_pitch = core.check_views(&input, &output)?;
        let (n_in, n_out) = (input.extent(core.axis), output.extent(core.axis));
        let e = usize::from(2 * n_out > n_in);
        ensure_shape!(
            n_in + 2 * e == 2 * n_out,
            "`{}`: input extent {n_in} cannot decimate to {n_out}",
            core.label,
        );

        let step = input.step(core.axis);
        let params = DecimateParams {
            in_origin: (input.origin() - e * step) as u32,
            in_step: step as u32,
            in_cross: input.cross_step(core.axis) as u32,
            in_pitch,
            out_origin: output.origin() as u32,
            out_step: output.step(core.axis) as u32,
            out_cross: output.cross_step(core.axis) as u32,
            out_pitch: output.pitch() as u32,
            out_width: output.width() as u32,
            out_height: output.height() as u32,
            slices: core.count as u32,
            _pad: 0,
        };
        core.launch(queue, Params::Decimate(params), &input, &output, wait)
    }

    pub fn axis(&self) -> Axis {
        self.core.axis
    }

    pub fn length(&self) -> usize {
        self.core.length
    }

    pub fn count(&self) -> usize {
        self.core.count
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }
}
