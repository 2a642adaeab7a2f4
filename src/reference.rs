// reference.rs — Whole-transform CPU reference.
//
// Chains `convolution` and `quad` into the full multi-level forward
// transform, following the same level rules as the device pipeline:
//
//   level 1   plain filters, far-end extension of odd extents
//             rows:    X → lo (h0), hi (h1), bp (hbp)
//             columns: lo·h1 → lohi, hi·h0 → hilo, bp·hbp → bpbp, lo·h0 → lolo
//   level ≥ 2 the same shape with decimating filters, both-end extension
//             whenever an extent is not a multiple of 4
//
// Each quad becomes two complex subbands in fixed slots (see
// `ops::quad::SubbandSlots`). Skipped leading levels only run the lowpass
// chain. `cornerness_map` folds a level's six subbands into one real map.

use crate::convolution::{decimate_columns, decimate_rows, filter_columns, filter_rows};
use crate::error::{ensure_config, Result};
use crate::filters::{DualTreeFilters, FilterBank};
use crate::image::{Complex, Image};
use crate::ops::extend::Extension;
use crate::ops::quad::SubbandSlots;
use crate::quad::q2c;

/// One produced level of the reference transform.
#[derive(Debug, Clone)]
pub struct ReferenceLevel {
    /// Six oriented subbands in slot order.
    pub subbands: [Image<Complex>; 6],
    /// Lowpass image feeding the next level.
    pub lolo: Image<f32>,
}

impl ReferenceLevel {
    /// Cornerness map of this level's subbands.
    pub fn cornerness(&self, exponent: f32) -> Image<f32> {
        cornerness_map(&self.subbands, exponent)
    }
}

/// Produced levels, finest first.
#[derive(Debug, Clone)]
pub struct ReferencePyramid {
    pub levels: Vec<ReferenceLevel>,
}

/// The forward transform on the host.
#[derive(Debug, Clone, Default)]
pub struct Dtcwt2d {
    filters: DualTreeFilters,
}

impl Dtcwt2d {
    pub fn new(filters: DualTreeFilters) -> Self {
        Dtcwt2d { filters }
    }

    pub fn filters(&self) -> &DualTreeFilters {
        &self.filters
    }

    /// Run `num_levels` levels, skipping the subbands of the first
    /// `start_level`.
    pub fn forward(
        &self,
        image: &Image<f32>,
        num_levels: usize,
        start_level: usize,
    ) -> Result<ReferencePyramid> {
        ensure_config!(num_levels >= 1, "at least one level is required");
        ensure_config!(
            start_level < num_levels,
            "start level {start_level} leaves nothing of {num_levels} levels"
        );
        ensure_config!(
            image.width() > 0 && image.height() > 0,
            "input image is empty"
        );

        let mut levels = Vec::with_capacity(num_levels - start_level);
        let mut current = image.clone();
        for level in 0..num_levels {
            let produce = level >= start_level;
            let (lolo, subbands) = if level == 0 {
                self.level_one(&current, produce)
            } else {
                self.coarse_level(&current, produce)?
            };
            if let Some(subbands) = subbands {
                levels.push(ReferenceLevel { subbands, lolo: lolo.clone() });
            }
            current = lolo;
        }
        Ok(ReferencePyramid { levels })
    }

    fn level_one(&self, x: &Image<f32>, produce: bool) -> (Image<f32>, Option<[Image<Complex>; 6]>) {
        let bank = &self.filters.level1;
        let ext_x = Extension::level_one(x.width());
        let ext_y = Extension::level_one(x.height());

        let lo = filter_rows(x, bank.h0.taps(), ext_x);
        let lolo = filter_columns(&lo, bank.h0.taps(), ext_y);
        if !produce {
            return (lolo, None);
        }
        let hi = filter_rows(x, bank.h1.taps(), ext_x);
        let bp = filter_rows(x, bank.hbp.taps(), ext_x);
        let quads = [
            filter_columns(&lo, bank.h1.taps(), ext_y),
            filter_columns(&hi, bank.h0.taps(), ext_y),
            filter_columns(&bp, bank.hbp.taps(), ext_y),
        ];
        (lolo, Some(assemble(&quads)))
    }

    fn coarse_level(
        &self,
        x: &Image<f32>,
        produce: bool,
    ) -> Result<(Image<f32>, Option<[Image<Complex>; 6]>)> {
        let bank: &FilterBank = &self.filters.level2;
        ensure_config!(
            x.width() % 2 == 0 && x.height() % 2 == 0,
            "coarse level input {}×{} must have even extents",
            x.width(),
            x.height(),
        );
        let ext_x = Extension::coarse(x.width());
        let ext_y = Extension::coarse(x.height());

        let lo = decimate_rows(x, &bank.h0, ext_x);
        let lolo = decimate_columns(&lo, &bank.h0, ext_y);
        if !produce {
            return Ok((lolo, None));
        }
        let hi = decimate_rows(x, &bank.h1, ext_x);
        let bp = decimate_rows(x, &bank.hbp, ext_x);
        let quads = [
            decimate_columns(&lo, &bank.h1, ext_y),
            decimate_columns(&hi, &bank.h0, ext_y),
            decimate_columns(&bp, &bank.hbp, ext_y),
        ];
        Ok((lolo, Some(assemble(&quads))))
    }
}

/// `(Π_s |z_s|)^exponent` per pixel, zero where any subband vanishes.
///
/// # Panics
/// Panics if the subbands differ in size.
pub fn cornerness_map(subbands: &[Image<Complex>; 6], exponent: f32) -> Image<f32> {
    let (w, h) = (subbands[0].width(), subbands[0].height());
    assert!(
        subbands.iter().all(|s| s.width() == w && s.height() == h),
        "subband sizes differ"
    );
    Image::from_fn(w, h, |x, y| {
        let product: f32 = subbands.iter().map(|s| s.get(x, y).norm()).product();
        if product > 0.0 {
            product.powf(exponent)
        } else {
            0.0
        }
    })
}

/// Spread three quads (lohi, hilo, bpbp) over the six subband slots.
fn assemble(quads: &[Image<f32>; 3]) -> [Image<Complex>; 6] {
    let mut subbands: [Image<Complex>; 6] = Default::default();
    for (quad, slots) in quads.iter().zip(SubbandSlots::ALL) {
        let (z1, z2) = q2c(quad);
        subbands[slots.first] = z1;
        subbands[slots.second] = z2;
    }
    subbands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(w: usize, h: usize, x0: usize, y0: usize) -> Image<f32> {
        Image::from_fn(w, h, |x, y| if (x, y) == (x0, y0) { 1.0 } else { 0.0 })
    }

    #[test]
    fn test_extents_16x5() {
        let pyr = Dtcwt2d::default().forward(&impulse(16, 5, 7, 2), 2, 0).unwrap();
        assert_eq!(pyr.levels.len(), 2);
        let l1 = &pyr.levels[0];
        assert_eq!((l1.lolo.width(), l1.lolo.height()), (16, 6));
        for s in &l1.subbands {
            assert_eq!((s.width(), s.height()), (8, 3));
        }
        for s in &pyr.levels[1].subbands {
            assert_eq!((s.width(), s.height()), (4, 2));
        }
        assert_eq!((pyr.levels[1].lolo.width(), pyr.levels[1].lolo.height()), (8, 4));
    }

    #[test]
    fn test_start_level_skips_subbands_only() {
        let img = Image::from_fn(24, 20, |x, y| ((x * 7 + y * 3) % 11) as f32);
        let full = Dtcwt2d::default().forward(&img, 3, 0).unwrap();
        let skip = Dtcwt2d::default().forward(&img, 3, 1).unwrap();
        assert_eq!(skip.levels.len(), 2);
        for (a, b) in full.levels[1..].iter().zip(&skip.levels) {
            assert_eq!(a.lolo, b.lolo);
            for (sa, sb) in a.subbands.iter().zip(&b.subbands) {
                assert_eq!(sa, sb);
            }
        }
    }

    #[test]
    fn test_constant_image_has_almost_no_detail() {
        let img = Image::from_fn(32, 32, |_, _| 3.0);
        let pyr = Dtcwt2d::default().forward(&img, 2, 0).unwrap();
        // The tabulated taps are rounded to 4 digits, so highpass DC gain
        // is small but not zero.
        for level in &pyr.levels {
            for s in &level.subbands {
                assert!(s.magnitude().pixels().all(|(_, _, m)| m < 1e-2), "{s:?}");
            }
            assert!(level.lolo.pixels().all(|(_, _, v)| v > 2.9));
        }
    }

    #[test]
    fn test_invalid_levels() {
        let img = Image::new(8, 8);
        assert!(Dtcwt2d::default().forward(&img, 0, 0).is_err());
        assert!(Dtcwt2d::default().forward(&img, 2, 2).is_err());
    }

    #[test]
    fn test_cornerness_scales_with_sixth_power_of_contrast() {
        let img = Image::from_fn(24, 20, |x, y| ((x * 7 + y * 3) % 11) as f32 * 0.1);
        let brighter = img.map(|v| 2.0 * v);
        let a = Dtcwt2d::default().forward(&img, 2, 0).unwrap();
        let b = Dtcwt2d::default().forward(&brighter, 2, 0).unwrap();
        // 6 magnitudes doubled, then ^0.25: factor 2^1.5.
        let gain = 2f32.powf(1.5);
        for (la, lb) in a.levels.iter().zip(&b.levels) {
            let (ma, mb) = (la.cornerness(0.25), lb.cornerness(0.25));
            assert_eq!((ma.width(), ma.height()), (la.subbands[0].width(), la.subbands[0].height()));
            for (x, y, v) in ma.pixels() {
                let want = v * gain;
                assert!((mb.get(x, y) - want).abs() <= 1e-4 * want.max(1.0), "({x}, {y})");
            }
        }
        let flat = Dtcwt2d::default().forward(&Image::new(16, 16), 1, 0).unwrap();
        assert!(flat.levels[0].cornerness(0.25).pixels().all(|(_, _, v)| v == 0.0));
    }
}
