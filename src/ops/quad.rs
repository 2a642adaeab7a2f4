// ops/quad.rs — Quad-to-complex recombination on the device.
//
// One invocation per output pixel reads a 2×2 block of the real quad image
// and writes one complex sample into each of two slots of the 6-slice
// subband buffer. Which slots a quad fills depends on the quad:
//
//   lohi → slots (2, 3)   ≈ ±75°
//   hilo → slots (0, 5)   ≈ ±15°
//   bpbp → slots (1, 4)   ≈ ±45°
//
// The complex buffer is unpadded (padding 0, alignment 1), so it can be
// downloaded slot by slot with no extra copy.

use std::sync::Arc;

use crate::accel::buffer::{ImageBuffer, View};
use crate::accel::queue::{Access, CommandQueue, Event};
use crate::accel::{Axis, Backend, KernelKind, Launch, Params, ProgramOptions, QuadParams};
use crate::error::{ensure_shape, Result};
use crate::image::Complex;

/// Pair of subband slots receiving (z1, z2) from one quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubbandSlots {
    pub first: usize,
    pub second: usize,
}

impl SubbandSlots {
    pub const LOHI: SubbandSlots = SubbandSlots { first: 2, second: 3 };
    pub const HILO: SubbandSlots = SubbandSlots { first: 0, second: 5 };
    pub const BPBP: SubbandSlots = SubbandSlots { first: 1, second: 4 };

    /// Slots for the three column-pass outputs, in slice order.
    pub const ALL: [SubbandSlots; 3] = [Self::LOHI, Self::HILO, Self::BPBP];
}

/// The compiled quad-to-complex program.
pub struct QuadToComplex<B: Backend> {
    program: Arc<B::Program>,
}

impl<B: Backend> QuadToComplex<B> {
    pub fn new(backend: &B, block: usize) -> Result<Self> {
        let options = ProgramOptions::untapped(KernelKind::QuadToComplex, Axis::Row, block as u32);
        let program = backend.compile(&options)?;
        Ok(QuadToComplex { program: Arc::new(program) })
    }

    /// Convert the single-slice real `quad` into `slots` of `output`.
    pub fn convert(
        &self,
        queue: &mut CommandQueue<'_, B>,
        quad: View<'_, B, f32>,
        output: &ImageBuffer<B, Complex>,
        slots: SubbandSlots,
        wait: &[Event],
    ) -> Result<Event> {
        ensure_shape!(quad.slices() == 1, "quad view spans {} slices", quad.slices());
        ensure_shape!(
            quad.width() % 2 == 0 && quad.height() % 2 == 0,
            "quad `{}` is {}×{}, both extents must be even",
            quad.buffer().label(),
            quad.width(),
            quad.height(),
        );
        ensure_shape!(
            output.width() * 2 == quad.width() && output.height() * 2 == quad.height(),
            "subbands `{}` are {}×{}, quad is {}×{}",
            output.label(),
            output.width(),
            output.height(),
            quad.width(),
            quad.height(),
        );
        ensure_shape!(
            slots.first != slots.second
                && slots.first < output.slices()
                && slots.second < output.slices(),
            "slots ({}, {}) invalid for {} subbands",
            slots.first,
            slots.second,
            output.slices(),
        );

        let layout = output.layout();
        let params = QuadParams {
            in_origin: quad.origin() as u32,
            in_stride: quad.stride() as u32,
            out_origin: layout.origin(0) as u32,
            out_stride: layout.stride() as u32,
            out_pitch: layout.pitch() as u32,
            out_width: output.width() as u32,
            out_height: output.height() as u32,
            first_slot: slots.first as u32,
            second_slot: slots.second as u32,
            _pad: [0; 3],
        };
        let launch = Launch {
            program: Arc::clone(&self.program),
            params: Params::Quad(params),
            bindings: vec![Arc::clone(quad.allocation()), Arc::clone(output.allocation())],
            grid: [output.width() as u32, output.height() as u32, 1],
        };
        let access = Access::new()
            .read(quad.region())
            .write(output.slice(slots.first).region())
            .write(output.slice(slots.second).region());
        let label = format!("q2c `{}` → {}/{}", quad.buffer().label(), slots.first, slots.second);
        queue.launch(&label, launch, access, wait)
    }
}
