// ops/extend.rs — Symmetric border extension.
//
// Odd-sized levels are handled by virtually extending the signal by one
// duplicated edge sample, never by branching inside the filters. The pad
// kernel writes the extension into the buffer's padding, and a filter that
// needs a leading extension sample simply starts reading one step earlier.
//
// For a buffer position p outside [0, n):
//
//   L = n + start + end
//   i = reflect(p + start, L)       (half-sample symmetric, period 2L)
//   v = x[clamp(i − start, 0, n − 1)]
//
// Level 1 extends only the far end of an odd extent. Coarser levels extend
// both ends whenever the extent is not a multiple of 4, so that the
// decimated output pairs up.

use std::sync::Arc;

use crate::accel::buffer::View;
use crate::accel::queue::{Access, CommandQueue, Event};
use crate::accel::{Axis, Backend, KernelKind, Launch, PadParams, Params, ProgramOptions};
use crate::error::{ensure_shape, Result};

/// Which ends of a 1D signal get one duplicated sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extension {
    pub start: bool,
    pub end: bool,
}

impl Extension {
    pub const NONE: Extension = Extension { start: false, end: false };
    pub const END: Extension = Extension { start: false, end: true };
    pub const BOTH: Extension = Extension { start: true, end: true };

    /// Level 1: extend the far end of an odd extent.
    pub fn level_one(n: usize) -> Self {
        Extension { start: false, end: n % 2 == 1 }
    }

    /// Levels ≥ 2: extend both ends unless the extent is a multiple of 4.
    pub fn coarse(n: usize) -> Self {
        let e = n % 4 != 0;
        Extension { start: e, end: e }
    }

    /// Length of the extended signal.
    #[inline]
    pub fn extended_len(self, n: usize) -> usize {
        n + self.start as usize + self.end as usize
    }
}

/// The X and Y pad programs.
pub struct BorderPad<B: Backend> {
    row: Arc<B::Program>,
    column: Arc<B::Program>,
    block: u32,
    padding: usize,
}

impl<B: Backend> BorderPad<B> {
    pub fn new(backend: &B, block: usize, padding: usize) -> Result<Self> {
        let block = block as u32;
        let row = backend.compile(&ProgramOptions::untapped(KernelKind::Pad, Axis::Row, block))?;
        let column =
            backend.compile(&ProgramOptions::untapped(KernelKind::Pad, Axis::Column, block))?;
        Ok(BorderPad { row: Arc::new(row), column: Arc::new(column), block, padding })
    }

    #[inline]
    pub fn block(&self) -> u32 {
        self.block
    }

    /// Fill the padding of every slice of `view` along `axis`.
    pub fn pad(
        &self,
        queue: &mut CommandQueue<'_, B>,
        view: View<'_, B, f32>,
        axis: Axis,
        extension: Extension,
        wait: &[Event],
    ) -> Result<Event> {
        ensure_shape!(
            view.padding() == self.padding,
            "`{}` has padding {}, pad expects {}",
            view.buffer().label(),
            view.padding(),
            self.padding,
        );

        let params = PadParams {
            origin: view.origin() as u32,
            step: view.step(axis) as u32,
            cross: view.cross_step(axis) as u32,
            pitch: view.pitch() as u32,
            length: view.extent(axis) as u32,
            cross_length: view.cross_extent(axis) as u32,
            slices: view.slices() as u32,
            padding: self.padding as u32,
            ext_start: extension.start as u32,
            ext_end: extension.end as u32,
            _pad: [0; 2],
        };
        let margin = 2 * self.padding as u32;
        let cross = view.cross_extent(axis) as u32;
        let grid = match axis {
            Axis::Row => [margin, cross, view.slices() as u32],
            Axis::Column => [cross, margin, view.slices() as u32],
        };
        let program = match axis {
            Axis::Row => Arc::clone(&self.row),
            Axis::Column => Arc::clone(&self.column),
        };

        let launch = Launch {
            program,
            params: Params::Pad(params),
            bindings: vec![Arc::clone(view.allocation())],
            grid,
        };
        let label = format!("pad {axis} `{}`", view.buffer().label());
        let region = view.region();
        queue.launch(&label, launch, Access::new().read(region).write(region), wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::buffer::ImageBuffer;
    use crate::accel::host::HostBackend;
    use crate::convolution::padded_value;
    use crate::image::Image;

    #[test]
    fn test_extension_rules() {
        assert_eq!(Extension::level_one(5), Extension::END);
        assert_eq!(Extension::level_one(6), Extension::NONE);
        assert_eq!(Extension::coarse(8), Extension::NONE);
        assert_eq!(Extension::coarse(6), Extension::BOTH);
        assert_eq!(Extension::coarse(6).extended_len(6), 8);
    }

    fn padded_rows(ext: Extension, axis: Axis) {
        let backend = HostBackend::new();
        let mut queue = CommandQueue::new(&backend, Default::default());
        let (w, h, p) = (5usize, 3usize, 4usize);
        let buf = ImageBuffer::<_, f32>::new(&backend, w, h, p, 8, 2, "pad").unwrap();
        let img = Image::from_fn(w, h, |x, y| (1 + x + 10 * y) as f32);
        let up = buf.slice(1).upload(&mut queue, &img, &[]).unwrap();
        let pad = BorderPad::new(&backend, 4, p).unwrap();
        pad.pad(&mut queue, buf.slice(1), axis, ext, &[up]).unwrap();
        queue.finish().unwrap();

        let l = *buf.layout();
        let words = backend.read(buf.allocation().raw(), 0, l.elements()).unwrap();
        let pi = p as isize;
        match axis {
            Axis::Row => {
                for y in 0..h {
                    let row = img.row(y);
                    for x in (-pi..0).chain(w as isize..w as isize + pi) {
                        let got = words[l.index(1, x, y as isize)];
                        assert_eq!(got, padded_value(row, x, ext), "row {y} x {x}");
                    }
                }
            }
            Axis::Column => {
                for x in 0..w {
                    let col = img.column(x);
                    for y in (-pi..0).chain(h as isize..h as isize + pi) {
                        let got = words[l.index(1, x as isize, y)];
                        assert_eq!(got, padded_value(&col, y, ext), "col {x} y {y}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_pad_rows_matches_padded_value() {
        for ext in [Extension::NONE, Extension::END, Extension::BOTH] {
            padded_rows(ext, Axis::Row);
        }
    }

    #[test]
    fn test_pad_columns_matches_padded_value() {
        for ext in [Extension::NONE, Extension::END, Extension::BOTH] {
            padded_rows(ext, Axis::Column);
        }
    }

    #[test]
    fn test_pad_rejects_wrong_padding() {
        let backend = HostBackend::new();
        let mut queue = CommandQueue::new(&backend, Default::default());
        let buf = ImageBuffer::<_, f32>::new(&backend, 4, 4, 2, 4, 1, "thin").unwrap();
        let pad = BorderPad::new(&backend, 4, 4).unwrap();
        let err = pad.pad(&mut queue, buf.view(), Axis::Row, Extension::NONE, &[]).unwrap_err();
        assert!(matches!(err, crate::error::Error::ShapeMismatch(_)));
    }
}
