// quad.rs — CPU reference for quad-to-complex recombination.
//
// After separable decimation along both axes, each 2×2 block of a subband
// image holds one sample from each of the four trees:
//
//   (even row, even col) a    (even row, odd col) b
//   (odd row,  even col) c    (odd row,  odd col) d
//
// The two complex subbands for that block are
//
//   z1 = √½ · ((a − d) + i(b + c))
//   z2 = √½ · ((a + d) + i(b − c))
//
// `c2q` is the exact inverse and exists for round-trip validation.

use std::f32::consts::FRAC_1_SQRT_2;

use crate::image::{Complex, Image};

/// Combine one 2×2 block into the two complex samples.
#[inline]
pub fn combine(a: f32, b: f32, c: f32, d: f32) -> (Complex, Complex) {
    let z1 = Complex::new(a - d, b + c) * FRAC_1_SQRT_2;
    let z2 = Complex::new(a + d, b - c) * FRAC_1_SQRT_2;
    (z1, z2)
}

/// Convert a real quad image into its two complex subbands.
///
/// # Panics
/// Panics if either dimension is odd.
pub fn q2c(quad: &Image<f32>) -> (Image<Complex>, Image<Complex>) {
    assert!(
        quad.width() % 2 == 0 && quad.height() % 2 == 0,
        "quad image must have even dimensions (got {}×{})",
        quad.width(),
        quad.height(),
    );
    let w = quad.width() / 2;
    let h = quad.height() / 2;
    let mut first = Image::new(w, h);
    let mut second = Image::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (z1, z2) = combine(
                quad.get(2 * x, 2 * y),
                quad.get(2 * x + 1, 2 * y),
                quad.get(2 * x, 2 * y + 1),
                quad.get(2 * x + 1, 2 * y + 1),
            );
            first.set(x, y, z1);
            second.set(x, y, z2);
        }
    }
    (first, second)
}

/// Inverse of [`q2c`]: rebuild the real quad image from two subbands.
///
/// # Panics
/// Panics if the two subbands differ in size.
pub fn c2q(first: &Image<Complex>, second: &Image<Complex>) -> Image<f32> {
    assert_eq!(
        (first.width(), first.height()),
        (second.width(), second.height()),
        "subband sizes differ"
    );
    let scale = std::f32::consts::SQRT_2;
    let mut quad = Image::new(2 * first.width(), 2 * first.height());
    for (x, y, z1) in first.pixels() {
        let z2 = second.get(x, y);
        let p = (z1 + z2) * 0.5;
        let q = (z2 - z1) * 0.5;
        quad.set(2 * x, 2 * y, p.re * scale);
        quad.set(2 * x + 1, 2 * y, p.im * scale);
        quad.set(2 * x, 2 * y + 1, -q.im * scale);
        quad.set(2 * x + 1, 2 * y + 1, q.re * scale);
    }
    quad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_known_block() {
        let (z1, z2) = combine(1.0, 2.0, 3.0, 4.0);
        let s = FRAC_1_SQRT_2;
        assert!(z1.max_abs_diff(Complex::new(-3.0 * s, 5.0 * s)) < 1e-6);
        assert!(z2.max_abs_diff(Complex::new(5.0 * s, -1.0 * s)) < 1e-6);
    }

    #[test]
    fn test_q2c_c2q_roundtrip() {
        let quad = Image::from_fn(6, 4, |x, y| ((x * 13 + y * 7) % 11) as f32 - 5.0);
        let (z1, z2) = q2c(&quad);
        assert_eq!((z1.width(), z1.height()), (3, 2));
        let back = c2q(&z1, &z2);
        assert!(back.max_abs_diff(&quad) < 1e-5);
    }

    #[test]
    fn test_c2q_q2c_recovers_subbands() {
        let z1 = Image::from_fn(2, 2, |x, y| Complex::new(x as f32, y as f32 + 0.5));
        let z2 = Image::from_fn(2, 2, |x, y| Complex::new(-(y as f32), 2.0 * x as f32));
        let (r1, r2) = q2c(&c2q(&z1, &z2));
        assert!(r1.max_abs_diff(&z1) < 1e-5);
        assert!(r2.max_abs_diff(&z2) < 1e-5);
    }

    #[test]
    #[should_panic(expected = "even dimensions")]
    fn test_odd_quad_panics() {
        q2c(&Image::<f32>::new(3, 2));
    }
}
