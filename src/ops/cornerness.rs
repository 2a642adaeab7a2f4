// ops/cornerness.rs — Keypoint energy map from the six subbands of a level.
//
// One invocation per subband pixel multiplies the six orientation
// magnitudes and raises the product to a fixed exponent:
//
//   c(x, y) = (Π_s |z_s(x, y)|) ^ exponent
//
// The product is only large where every orientation responds at once,
// i.e. at corners and blobs rather than along straight edges (Fauqueur,
// Kingsbury & Anderson, "Multiscale keypoint detection using the dual-tree
// complex wavelet transform", ICIP 2006). The default exponent of 1/4
// follows that paper.
//
// The map has the extent of one subband. It reads the unpadded 6-slice
// subband buffer and writes a single real slice, so it can be issued as
// soon as the level's q2c launches have completed.

use std::sync::Arc;

use crate::accel::buffer::{ImageBuffer, View};
use crate::accel::queue::{Access, CommandQueue, Event};
use crate::accel::{Axis, Backend, CornernessParams, KernelKind, Launch, Params, ProgramOptions};
use crate::error::{ensure_config, ensure_shape, Result};
use crate::image::Complex;

/// Default product exponent.
pub const DEFAULT_EXPONENT: f32 = 0.25;

/// Orientation slots a cornerness map combines.
const SLOTS: usize = 6;

/// The compiled cornerness program.
pub struct Cornerness<B: Backend> {
    program: Arc<B::Program>,
    exponent: f32,
}

impl<B: Backend> Cornerness<B> {
    pub fn new(backend: &B, block: usize, exponent: f32) -> Result<Self> {
        ensure_config!(
            exponent.is_finite() && exponent > 0.0,
            "cornerness exponent must be positive and finite (got {exponent})"
        );
        let options = ProgramOptions::untapped(KernelKind::Cornerness, Axis::Row, block as u32);
        let program = backend.compile(&options)?;
        Ok(Cornerness { program: Arc::new(program), exponent })
    }

    pub fn exponent(&self) -> f32 {
        self.exponent
    }

    /// Combine the six slices of `subbands` into the single slice `output`.
    pub fn compute(
        &self,
        queue: &mut CommandQueue<'_, B>,
        subbands: &ImageBuffer<B, Complex>,
        output: View<'_, B, f32>,
        wait: &[Event],
    ) -> Result<Event> {
        ensure_shape!(
            subbands.slices() == SLOTS,
            "`{}` holds {} subbands, cornerness needs {SLOTS}",
            subbands.label(),
            subbands.slices(),
        );
        ensure_shape!(output.slices() == 1, "cornerness output spans {} slices", output.slices());
        ensure_shape!(
            output.width() == subbands.width() && output.height() == subbands.height(),
            "cornerness map `{}` is {}×{}, subbands are {}×{}",
            output.buffer().label(),
            output.width(),
            output.height(),
            subbands.width(),
            subbands.height(),
        );

        let layout = subbands.layout();
        let params = CornernessParams {
            in_origin: layout.origin(0) as u32,
            in_stride: layout.stride() as u32,
            in_pitch: layout.pitch() as u32,
            out_origin: output.origin() as u32,
            out_stride: output.stride() as u32,
            width: output.width() as u32,
            height: output.height() as u32,
            exponent: self.exponent,
            _pad: [0; 4],
        };
        let launch = Launch {
            program: Arc::clone(&self.program),
            params: Params::Cornerness(params),
            bindings: vec![Arc::clone(subbands.allocation()), Arc::clone(output.allocation())],
            grid: [output.width() as u32, output.height() as u32, 1],
        };
        let access = Access::new().read(subbands.view().region()).write(output.region());
        let label = format!("cornerness `{}` → `{}`", subbands.label(), output.buffer().label());
        queue.launch(&label, launch, access, wait)
    }
}
