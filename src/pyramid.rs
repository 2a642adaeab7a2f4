// pyramid.rs — Multi-level DTCWT orchestration.
//
// Builds the per-level temporaries once (`PyramidContext`) and records the
// pad → filter → pad → filter → quad-to-complex sequence for every level on
// a `CommandQueue`, wiring each launch to exactly the events it depends on.
//
//   level 1 (plain filters, far-end extension of odd extents)
//
//     input ─pad X─► row triple (h0,h1,hbp) ─► rows[3] ─pad Y─┬► column triple ─► quads[3] ─► q2c ×3 ─► subbands[6]
//                                                            └► column h0 on rows[0] ─► lolo
//
//   level n ≥ 2: the same graph on the previous lolo, with decimating
//   filters and both-end extension whenever an extent is not a multiple
//   of 4.
//
// The column triple and the lowpass column pass only read `rows`, so they
// are issued back to back with no mutual wait. The three q2c launches write
// disjoint subband slots and are likewise independent. Each produced level
// gets a marker event joining its terminal launches; the pyramid's `done`
// marker joins every level.
//
// Levels below `start_level` only run the lowpass chain (single filters),
// with no quad or subband storage.
//
// PIPELINE LIFETIME
// ─────────────────
// `Dtcwt` compiles every program up front and is reused across frames.
// `PyramidContext` is tied to one image size and is also reusable; a new
// transform on the same context must wait on the previous `done` event,
// otherwise the queue reports `Error::UnorderedAccess` on the input upload.
//
// NEW RUST CONCEPTS:
// - An enum over two operator types (`Pass`) instead of a trait object,
//   since the set of pass kinds is closed and both share one `apply` shape.
// - Returning borrows tied to the context (`SubbandPyramid<'c, B>`), so a
//   pyramid can never outlive the buffers it points into.

use std::fmt;

use crate::accel::buffer::{ImageBuffer, View};
use crate::accel::queue::{CommandQueue, Event};
use crate::accel::{Axis, Backend};
use crate::config::DtcwtConfig;
use crate::error::{ensure_config, ensure_shape, Result};
use crate::filters::{DualTreeFilters, FilterBank, FilterSpec};
use crate::image::{Complex, Image};
use crate::ops::cornerness::Cornerness;
use crate::ops::extend::{BorderPad, Extension};
use crate::ops::filter::{DecimatingFilter, SeparableFilter};
use crate::ops::quad::{QuadToComplex, SubbandSlots};

/// Number of oriented subbands per level.
pub const SUBBANDS: usize = 6;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Progress of one `transform` call, as reported in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Building,
    /// All launches of this 1-based DTCWT level have been recorded.
    LevelComplete(usize),
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Building => write!(f, "building"),
            Stage::LevelComplete(n) => write!(f, "level {n} complete"),
            Stage::Ready => write!(f, "ready"),
        }
    }
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

enum Pass<B: Backend> {
    Plain(SeparableFilter<B>),
    Decimating(DecimatingFilter<B>),
}

impl<B: Backend> Pass<B> {
    fn build(
        backend: &B,
        decimating: bool,
        axis: Axis,
        filters: &[FilterSpec],
        block: usize,
        padding: usize,
    ) -> Result<Self> {
        Ok(if decimating {
            Pass::Decimating(DecimatingFilter::new(backend, axis, filters, block, padding)?)
        } else {
            Pass::Plain(SeparableFilter::new(backend, axis, filters, block, padding)?)
        })
    }

    fn apply(
        &self,
        queue: &mut CommandQueue<'_, B>,
        input: View<'_, B, f32>,
        output: View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        match self {
            Pass::Plain(op) => op.apply(queue, input, output, wait),
            Pass::Decimating(op) => op.apply(queue, input, output, wait),
        }
    }
}

/// The four passes of one level shape.
struct LevelPasses<B: Backend> {
    row_triple: Pass<B>,
    column_triple: Pass<B>,
    row_lowpass: Pass<B>,
    column_lowpass: Pass<B>,
}

impl<B: Backend> LevelPasses<B> {
    fn new(
        backend: &B,
        bank: &FilterBank,
        decimating: bool,
        block: usize,
        padding: usize,
    ) -> Result<Self> {
        let lowpass = [bank.h0.clone()];
        Ok(LevelPasses {
            row_triple: Pass::build(backend, decimating, Axis::Row, &bank.row_triple(), block, padding)?,
            column_triple: Pass::build(
                backend,
                decimating,
                Axis::Column,
                &bank.column_triple(),
                block,
                padding,
            )?,
            row_lowpass: Pass::build(backend, decimating, Axis::Row, &lowpass, block, padding)?,
            column_lowpass: Pass::build(backend, decimating, Axis::Column, &lowpass, block, padding)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Device buffers of one level.
pub struct LevelBuffers<B: Backend> {
    /// 1-based DTCWT level.
    level: usize,
    /// Row-pass output: 3 slices (lo, hi, bp), or 1 for skipped levels.
    rows: ImageBuffer<B, f32>,
    /// Column-pass output (lohi, hilo, bpbp). Absent for skipped levels.
    quads: Option<ImageBuffer<B, f32>>,
    subbands: Option<ImageBuffer<B, Complex>>,
    lolo: ImageBuffer<B, f32>,
}

impl<B: Backend> LevelBuffers<B> {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_produced(&self) -> bool {
        self.subbands.is_some()
    }

    pub fn rows(&self) -> &ImageBuffer<B, f32> {
        &self.rows
    }

    pub fn quads(&self) -> Option<&ImageBuffer<B, f32>> {
        self.quads.as_ref()
    }

    pub fn subbands(&self) -> Option<&ImageBuffer<B, Complex>> {
        self.subbands.as_ref()
    }

    pub fn lolo(&self) -> &ImageBuffer<B, f32> {
        &self.lolo
    }
}

/// Every buffer needed to transform images of one size.
pub struct PyramidContext<B: Backend> {
    width: usize,
    height: usize,
    start_level: usize,
    input: ImageBuffer<B, f32>,
    levels: Vec<LevelBuffers<B>>,
}

impl<B: Backend> PyramidContext<B> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn start_level(&self) -> usize {
        self.start_level
    }

    pub fn input(&self) -> &ImageBuffer<B, f32> {
        &self.input
    }

    /// All levels, skipped ones included.
    pub fn levels(&self) -> &[LevelBuffers<B>] {
        &self.levels
    }
}

/// Output extents of a level given its input extents.
fn level_output(level: usize, width: usize, height: usize) -> (usize, usize) {
    if level == 1 {
        (
            Extension::level_one(width).extended_len(width),
            Extension::level_one(height).extended_len(height),
        )
    } else {
        (
            Extension::coarse(width).extended_len(width) / 2,
            Extension::coarse(height).extended_len(height) / 2,
        )
    }
}

// ---------------------------------------------------------------------------
// Pyramid
// ---------------------------------------------------------------------------

/// One produced level of a [`SubbandPyramid`].
pub struct PyramidLevel<'c, B: Backend> {
    /// 1-based DTCWT level.
    pub level: usize,
    /// Six complex subbands, one per slice, in slot order.
    pub subbands: &'c ImageBuffer<B, Complex>,
    pub lolo: &'c ImageBuffer<B, f32>,
    /// Completes when this level's subbands and lolo are written.
    pub ready: Event,
}

/// The produced levels of one transform, finest first.
///
/// Subbands may be read once `done` (or the level's `ready`) has completed.
pub struct SubbandPyramid<'c, B: Backend> {
    pub levels: Vec<PyramidLevel<'c, B>>,
    pub done: Event,
}

impl<'c, B: Backend> SubbandPyramid<'c, B> {
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Produced level `index`, or `ShapeMismatch` when there is none.
    pub fn level(&self, index: usize) -> Result<&PyramidLevel<'c, B>> {
        ensure_shape!(
            index < self.levels.len(),
            "level index {index} out of range for {} produced levels",
            self.levels.len()
        );
        Ok(&self.levels[index])
    }

    /// Download subband `slot` of produced level `index`.
    pub fn subband(
        &self,
        queue: &mut CommandQueue<'_, B>,
        index: usize,
        slot: usize,
    ) -> Result<Image<Complex>> {
        let level = self.level(index)?;
        ensure_shape!(slot < SUBBANDS, "subband slot {slot} out of range (0..{SUBBANDS})");
        level.subbands.slice(slot).download(queue, &[level.ready])
    }

    /// Download all six subbands of produced level `index`.
    pub fn download_level(
        &self,
        queue: &mut CommandQueue<'_, B>,
        index: usize,
    ) -> Result<Vec<Image<Complex>>> {
        (0..SUBBANDS).map(|slot| self.subband(queue, index, slot)).collect()
    }

    /// Download the lowpass image of produced level `index`.
    pub fn lolo(&self, queue: &mut CommandQueue<'_, B>, index: usize) -> Result<Image<f32>> {
        let level = self.level(index)?;
        level.lolo.download(queue, &[level.ready])
    }
}

// ---------------------------------------------------------------------------
// Dtcwt
// ---------------------------------------------------------------------------

/// Compiled DTCWT pipeline for one backend.
pub struct Dtcwt<'d, B: Backend> {
    backend: &'d B,
    config: DtcwtConfig,
    level_one: LevelPasses<B>,
    coarse: LevelPasses<B>,
    pad: BorderPad<B>,
    quad: QuadToComplex<B>,
    cornerness: Cornerness<B>,
}

impl<'d, B: Backend> Dtcwt<'d, B> {
    /// Validate `config` and compile every program with the standard
    /// dual-tree filters.
    pub fn new(backend: &'d B, config: &DtcwtConfig) -> Result<Self> {
        Self::with_filters(backend, config, &DualTreeFilters::standard())
    }

    pub fn with_filters(
        backend: &'d B,
        config: &DtcwtConfig,
        filters: &DualTreeFilters,
    ) -> Result<Self> {
        config.validate()?;
        let (block, padding) = (config.block_extent, config.padding);

        let level_one = LevelPasses::new(backend, &filters.level1, false, block, padding)?;
        let coarse = LevelPasses::new(backend, &filters.level2, true, block, padding)?;
        let pad = BorderPad::new(backend, block, padding)?;
        let quad = QuadToComplex::new(backend, block)?;
        let cornerness = Cornerness::new(backend, block, config.cornerness_exponent)?;
        log::info!(
            "DTCWT pipeline ready on {} (block {block}, padding {padding})",
            backend.name()
        );
        Ok(Dtcwt { backend, config: config.clone(), level_one, coarse, pad, quad, cornerness })
    }

    pub fn config(&self) -> &DtcwtConfig {
        &self.config
    }

    /// Allocate a single-slice map matching the subbands of `level`.
    pub fn cornerness_target(&self, level: &PyramidLevel<'_, B>) -> Result<ImageBuffer<B, f32>> {
        ImageBuffer::new(
            self.backend,
            level.subbands.width(),
            level.subbands.height(),
            0,
            1,
            1,
            &format!("L{} cornerness", level.level),
        )
    }

    /// Record the cornerness map of `level` into `output`, after the level
    /// is ready and everything in `wait` has completed.
    pub fn cornerness(
        &self,
        queue: &mut CommandQueue<'_, B>,
        level: &PyramidLevel<'_, B>,
        output: View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        let mut deps = Vec::with_capacity(wait.len() + 1);
        deps.push(level.ready);
        deps.extend_from_slice(wait);
        self.cornerness.compute(queue, level.subbands, output, &deps)
    }

    /// Context sized for `width × height` using the configured level counts.
    pub fn context_for(&self, width: usize, height: usize) -> Result<PyramidContext<B>> {
        self.create_context(width, height, self.config.num_levels, self.config.start_level)
    }

    /// Allocate every buffer a `width × height` transform needs.
    pub fn create_context(
        &self,
        width: usize,
        height: usize,
        num_levels: usize,
        start_level: usize,
    ) -> Result<PyramidContext<B>> {
        ensure_config!(num_levels >= 1, "at least one level is required");
        ensure_config!(
            start_level < num_levels,
            "start level {start_level} leaves nothing of {num_levels} levels"
        );
        ensure_config!(width > 0 && height > 0, "image extent {width}×{height} is empty");

        let (padding, alignment) = (self.config.padding, self.config.alignment);
        let input = ImageBuffer::new(self.backend, width, height, padding, alignment, 1, "input")?;

        let mut levels = Vec::with_capacity(num_levels);
        let (mut w, mut h) = (width, height);
        for level in 1..=num_levels {
            let produced = level > start_level;
            let (ow, oh) = level_output(level, w, h);
            let row_slices = if produced { 3 } else { 1 };

            let rows = ImageBuffer::new(
                self.backend,
                ow,
                h,
                padding,
                alignment,
                row_slices,
                &format!("L{level} rows"),
            )?;
            let lolo = ImageBuffer::new(
                self.backend,
                ow,
                oh,
                padding,
                alignment,
                1,
                &format!("L{level} lolo"),
            )?;
            let (quads, subbands) = if produced {
                let quads = ImageBuffer::new(
                    self.backend,
                    ow,
                    oh,
                    padding,
                    alignment,
                    3,
                    &format!("L{level} quads"),
                )?;
                let subbands = ImageBuffer::new(
                    self.backend,
                    ow / 2,
                    oh / 2,
                    0,
                    1,
                    SUBBANDS,
                    &format!("L{level} subbands"),
                )?;
                (Some(quads), Some(subbands))
            } else {
                (None, None)
            };
            log::debug!(
                "level {level}: {w}×{h} → {ow}×{oh}{}",
                if produced { "" } else { " (lowpass only)" }
            );

            levels.push(LevelBuffers { level, rows, quads, subbands, lolo });
            (w, h) = (ow, oh);
        }

        log::info!(
            "context {width}×{height}: {num_levels} levels, {} produced",
            num_levels - start_level
        );
        Ok(PyramidContext { width, height, start_level, input, levels })
    }

    /// Upload `image` and record the full transform on `queue`.
    ///
    /// Nothing is submitted until the queue is flushed, finished, or a
    /// download forces it.
    pub fn transform<'c>(
        &self,
        queue: &mut CommandQueue<'_, B>,
        image: &Image<f32>,
        context: &'c PyramidContext<B>,
        wait: &[Event],
    ) -> Result<SubbandPyramid<'c, B>> {
        ensure_shape!(
            image.width() == context.width && image.height() == context.height,
            "image {}×{} does not fit a {}×{} context",
            image.width(),
            image.height(),
            context.width,
            context.height,
        );
        log::debug!("transform: {}", Stage::Building);

        let mut source = context.input.upload(queue, image, wait)?;
        let mut input = context.input.view();
        let mut levels = Vec::with_capacity(context.levels.len() - context.start_level);

        for buffers in &context.levels {
            let passes = if buffers.level == 1 { &self.level_one } else { &self.coarse };
            let (ext_x, ext_y) = if buffers.level == 1 {
                (Extension::level_one(input.width()), Extension::level_one(input.height()))
            } else {
                (Extension::coarse(input.width()), Extension::coarse(input.height()))
            };

            let padded_x = self.pad.pad(queue, input, Axis::Row, ext_x, &[source])?;
            let rows = buffers.rows.view();
            match (&buffers.quads, &buffers.subbands) {
                (Some(quads), Some(subbands)) => {
                    let filtered = passes.row_triple.apply(queue, input, rows, &[padded_x])?;
                    let padded_y = self.pad.pad(queue, rows, Axis::Column, ext_y, &[filtered])?;
                    let columns =
                        passes.column_triple.apply(queue, rows, quads.view(), &[padded_y])?;
                    let lolo = passes.column_lowpass.apply(
                        queue,
                        rows.slice(0),
                        buffers.lolo.view(),
                        &[padded_y],
                    )?;

                    let mut terminal = vec![lolo];
                    for (i, slots) in SubbandSlots::ALL.into_iter().enumerate() {
                        terminal.push(self.quad.convert(
                            queue,
                            quads.slice(i),
                            subbands,
                            slots,
                            &[columns],
                        )?);
                    }
                    let ready = queue.marker(&terminal)?;
                    levels.push(PyramidLevel {
                        level: buffers.level,
                        subbands,
                        lolo: &buffers.lolo,
                        ready,
                    });
                    source = lolo;
                }
                _ => {
                    let filtered = passes.row_lowpass.apply(queue, input, rows, &[padded_x])?;
                    let padded_y = self.pad.pad(queue, rows, Axis::Column, ext_y, &[filtered])?;
                    source = passes.column_lowpass.apply(
                        queue,
                        rows,
                        buffers.lolo.view(),
                        &[padded_y],
                    )?;
                }
            }
            input = buffers.lolo.view();
            log::debug!("transform: {}", Stage::LevelComplete(buffers.level));
        }

        let ready: Vec<Event> = levels.iter().map(|l| l.ready).collect();
        let done = queue.marker(&ready)?;
        log::debug!("transform: {} ({} commands pending)", Stage::Ready, queue.pending_len());
        Ok(SubbandPyramid { levels, done })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::host::HostBackend;

    #[test]
    fn test_level_output_extents() {
        assert_eq!(level_output(1, 16, 5), (16, 6));
        assert_eq!(level_output(2, 16, 6), (8, 4));
        assert_eq!(level_output(2, 8, 4), (4, 2));
        assert_eq!(level_output(3, 2, 2), (2, 2));
    }

    #[test]
    fn test_context_skips_storage_for_skipped_levels() {
        let host = HostBackend::new();
        let dtcwt = Dtcwt::new(&host, &DtcwtConfig::default()).unwrap();
        let ctx = dtcwt.create_context(40, 30, 3, 1).unwrap();
        assert_eq!(ctx.num_levels(), 3);
        let first = &ctx.levels()[0];
        assert!(!first.is_produced());
        assert!(first.quads().is_none());
        assert_eq!(first.rows().slices(), 1);
        let second = &ctx.levels()[1];
        assert!(second.is_produced());
        assert_eq!(second.rows().slices(), 3);
        let sub = second.subbands().unwrap();
        assert_eq!((sub.slices(), sub.layout().padding()), (SUBBANDS, 0));
    }

    #[test]
    fn test_context_rejects_bad_levels() {
        let host = HostBackend::new();
        let dtcwt = Dtcwt::new(&host, &DtcwtConfig::default()).unwrap();
        assert!(dtcwt.create_context(16, 16, 0, 0).is_err());
        assert!(dtcwt.create_context(16, 16, 2, 2).is_err());
        assert!(dtcwt.create_context(0, 16, 2, 0).is_err());
    }

    #[test]
    fn test_transform_shape_mismatch() {
        let host = HostBackend::new();
        let dtcwt = Dtcwt::new(&host, &DtcwtConfig::default()).unwrap();
        let ctx = dtcwt.create_context(16, 16, 1, 0).unwrap();
        let mut queue = CommandQueue::new(&host, Default::default());
        let err = dtcwt.transform(&mut queue, &Image::new(16, 15), &ctx, &[]);
        assert!(matches!(err, Err(crate::error::Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_single_level_matches_reference() {
        use crate::reference::Dtcwt2d;

        let host = HostBackend::new();
        let dtcwt = Dtcwt::new(&host, &DtcwtConfig::default()).unwrap();
        let img = Image::from_fn(9, 7, |x, y| ((x * 5 + y * 3) % 7) as f32 - 3.0);
        let ctx = dtcwt.create_context(9, 7, 1, 0).unwrap();
        let mut queue = CommandQueue::new(&host, Default::default());
        let pyr = dtcwt.transform(&mut queue, &img, &ctx, &[]).unwrap();

        let want = Dtcwt2d::default().forward(&img, 1, 0).unwrap();
        let got = pyr.download_level(&mut queue, 0).unwrap();
        for (slot, (g, w)) in got.iter().zip(&want.levels[0].subbands).enumerate() {
            assert!(g.max_abs_diff(w) < 1e-5, "slot {slot}: {}", g.max_abs_diff(w));
        }
        let lolo = pyr.lolo(&mut queue, 0).unwrap();
        assert!(lolo.max_abs_diff(&want.levels[0].lolo) < 1e-5);
    }
}
