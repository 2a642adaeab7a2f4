// image.rs — Host-side image container and sample types.
//
// `Image<T>` is the host representation of everything that crosses the
// device boundary: the real input frame handed to `transform`, the lolo
// images and complex subbands read back afterwards, and every intermediate
// of the CPU reference transform.
//
// Sample (x, y) lives at `data[y * stride + x]`. Host images are compact
// (stride == width) unless built with `from_vec_with_stride`, e.g. around a
// camera frame with row padding. The padded, aligned layout the kernels need
// lives in `accel::buffer::Layout`; uploads and downloads translate between
// the two row by row.
//
// NEW RUST CONCEPTS:
// - `#[repr(C)]` + `bytemuck::Pod` on `Complex` — the struct has the exact
//   layout of two consecutive f32, so a `&[f32]` read back from the device
//   can be reinterpreted as `&[Complex]` without copying or `unsafe`.
// - Operator overloading (`impl Add for Complex`) — lets the reference
//   implementation write `a + b` on complex samples.

use std::fmt;
use std::ops::{Add, Mul, Sub};

// ---------------------------------------------------------------------------
// Pixel trait
// ---------------------------------------------------------------------------

/// Real sample types that can be fed into the transform.
///
/// The transform itself always runs in `f32`; `Pixel` only exists so that
/// 8- and 16-bit frames can be converted at the host boundary.
pub trait Pixel: Copy + Default + Send + Sync + 'static {
    /// Convert this pixel value to f32 (raw value, not normalized).
    fn to_f32(self) -> f32;
}

impl Pixel for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Pixel for u16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Pixel for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

// ---------------------------------------------------------------------------
// Complex
// ---------------------------------------------------------------------------

/// A complex sample stored as two interleaved `f32` (real, imaginary).
///
/// Matches the device layout of complex subband buffers: element `i` of a
/// complex image occupies words `2i` and `2i + 1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

impl Complex {
    #[inline]
    pub const fn new(re: f32, im: f32) -> Self {
        Complex { re, im }
    }

    /// Magnitude |z|. Keypoint detectors consume subband energy, not phase.
    #[inline]
    pub fn norm(self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    /// Largest component-wise absolute difference to `other`.
    #[inline]
    pub fn max_abs_diff(self, other: Complex) -> f32 {
        (self.re - other.re).abs().max((self.im - other.im).abs())
    }
}

impl Add for Complex {
    type Output = Complex;
    #[inline]
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;
    #[inline]
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul<f32> for Complex {
    type Output = Complex;
    #[inline]
    fn mul(self, rhs: f32) -> Complex {
        Complex::new(self.re * rhs, self.im * rhs)
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.im < 0.0 {
            write!(f, "{}-{}i", self.re, -self.im)
        } else {
            write!(f, "{}+{}i", self.re, self.im)
        }
    }
}

// ---------------------------------------------------------------------------
// Image<T>
// ---------------------------------------------------------------------------

/// A 2D image with runtime dimensions, generic over sample type `T`.
#[derive(Clone, PartialEq, Default)]
pub struct Image<T> {
    /// Samples in row-major order. Length = height * stride.
    data: Vec<T>,
    width: usize,
    height: usize,
    /// Row stride in *elements* (not bytes). stride >= width.
    stride: usize,
}

impl<T: Copy + Default> Image<T> {
    /// Create a zero-initialized image. Stride equals width.
    pub fn new(width: usize, height: usize) -> Self {
        Image {
            data: vec![T::default(); width * height],
            width,
            height,
            stride: width,
        }
    }

    /// Create an image from an existing compact sample vector.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "data length ({}) must equal width * height ({})",
            data.len(),
            width * height,
        );
        Image { data, width, height, stride: width }
    }

    /// Create an image from raw data with explicit stride.
    ///
    /// # Panics
    /// Panics if `data.len() != height * stride` or `stride < width`.
    pub fn from_vec_with_stride(width: usize, height: usize, stride: usize, data: Vec<T>) -> Self {
        assert!(stride >= width, "stride ({stride}) must be >= width ({width})");
        assert_eq!(
            data.len(),
            height * stride,
            "data length ({}) must equal height * stride ({})",
            data.len(),
            height * stride,
        );
        Image { data, width, height, stride }
    }

    /// Build an image by evaluating `f(x, y)` at every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Image { data, width, height, stride: width }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Get the sample at (x, y). x is column, y is row.
    ///
    /// # Panics
    /// Panics if (x, y) is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        self.bounds_check(x, y);
        self.data[y * self.stride + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.bounds_check(x, y);
        let idx = y * self.stride + x;
        self.data[idx] = value;
    }

    /// Borrow a single row (valid samples only, no stride padding).
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    /// Extract column `x` as a compact vector.
    pub fn column(&self, x: usize) -> Vec<T> {
        (0..self.height).map(|y| self.get(x, y)).collect()
    }

    /// Overwrite column `x` from a slice of length `height`.
    pub fn set_column(&mut self, x: usize, values: &[T]) {
        assert_eq!(values.len(), self.height, "column length mismatch");
        for (y, &v) in values.iter().enumerate() {
            self.set(x, y, v);
        }
    }

    /// Iterate over all samples as `(x, y, value)` tuples, skipping padding.
    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.stride + x]))
        })
    }

    /// Copy the valid samples into a compact row-major vector.
    pub fn to_compact_vec(&self) -> Vec<T> {
        if self.stride == self.width {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    /// Apply `f` to every sample, producing a compact image.
    pub fn map<U: Copy + Default>(&self, mut f: impl FnMut(T) -> U) -> Image<U> {
        Image::from_fn(self.width, self.height, |x, y| f(self.get(x, y)))
    }

    /// Access the underlying data as a flat slice (includes stride padding).
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x},{y}) out of bounds for image {}×{}",
            self.width,
            self.height,
        );
    }
}

impl<T: Pixel> Image<T> {
    /// Convert to an `f32` image with raw (non-normalized) values.
    pub fn to_f32(&self) -> Image<f32> {
        self.map(Pixel::to_f32)
    }
}

impl Image<f32> {
    /// Largest absolute difference between two equally sized images.
    ///
    /// # Panics
    /// Panics if the dimensions differ.
    pub fn max_abs_diff(&self, other: &Image<f32>) -> f32 {
        assert_eq!((self.width, self.height), (other.width, other.height), "size mismatch");
        self.pixels()
            .map(|(x, y, v)| (v - other.get(x, y)).abs())
            .fold(0.0, f32::max)
    }
}

impl Image<Complex> {
    /// Largest component-wise absolute difference between two complex images.
    ///
    /// # Panics
    /// Panics if the dimensions differ.
    pub fn max_abs_diff(&self, other: &Image<Complex>) -> f32 {
        assert_eq!((self.width, self.height), (other.width, other.height), "size mismatch");
        self.pixels()
            .map(|(x, y, v)| v.max_abs_diff(other.get(x, y)))
            .fold(0.0, f32::max)
    }

    /// Per-pixel magnitude image.
    pub fn magnitude(&self) -> Image<f32> {
        self.map(Complex::norm)
    }
}

/// Summary plus the top-left corner, enough to spot a misplaced impulse.
impl<T: Copy + Default + fmt::Debug> fmt::Debug for Image<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const CORNER: usize = 8;
        writeln!(f, "Image {}×{} (stride {})", self.width, self.height, self.stride)?;
        for y in 0..self.height.min(CORNER) {
            let shown = self.width.min(CORNER);
            let cells: Vec<String> = (0..shown).map(|x| format!("{:?}", self.get(x, y))).collect();
            let more = if self.width > shown { " …" } else { "" };
            writeln!(f, "  {y:>3}: {}{more}", cells.join(" "))?;
        }
        if self.height > CORNER {
            writeln!(f, "  ({} more rows)", self.height - CORNER)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zeroed() {
        let img = Image::<f32>::new(4, 3);
        assert_eq!(img.width(), 4);
        assert_eq!(img.height(), 3);
        assert_eq!(img.stride(), 4);
        assert!(img.pixels().all(|(_, _, v)| v == 0.0));
    }

    #[test]
    fn test_stride_padding_skipped() {
        let img = Image::from_vec_with_stride(3, 2, 5, vec![1, 2, 3, 0, 0, 4, 5, 6, 0, 0]);
        assert_eq!(img.row(1), &[4, 5, 6]);
        assert_eq!(img.to_compact_vec(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(img.pixels().count(), 6);
    }

    #[test]
    fn test_column_roundtrip() {
        let mut img = Image::from_fn(3, 4, |x, y| (x + 10 * y) as f32);
        assert_eq!(img.column(2), vec![2.0, 12.0, 22.0, 32.0]);
        img.set_column(0, &[9.0, 9.0, 9.0, 9.0]);
        assert_eq!(img.get(0, 3), 9.0);
        assert_eq!(img.get(1, 3), 31.0);
    }

    #[test]
    fn test_u8_to_f32_raw() {
        let img = Image::from_vec(2, 1, vec![0u8, 255]);
        let f = img.to_f32();
        assert_eq!(f.get(1, 0), 255.0);
    }

    #[test]
    fn test_complex_arithmetic() {
        let a = Complex::new(1.0, 2.0);
        let b = Complex::new(0.5, -1.0);
        assert_eq!(a + b, Complex::new(1.5, 1.0));
        assert_eq!(a - b, Complex::new(0.5, 3.0));
        assert_eq!(a * 2.0, Complex::new(2.0, 4.0));
        assert!((Complex::new(3.0, 4.0).norm() - 5.0).abs() < 1e-6);
        assert_eq!(b.to_string(), "0.5-1i");
    }

    #[test]
    fn test_complex_is_two_words() {
        assert_eq!(std::mem::size_of::<Complex>(), 8);
        let words = [1.0f32, 2.0, 3.0, 4.0];
        let zs: &[Complex] = bytemuck::cast_slice(&words);
        assert_eq!(zs, &[Complex::new(1.0, 2.0), Complex::new(3.0, 4.0)]);
    }

    #[test]
    fn test_max_abs_diff() {
        let a = Image::from_vec(2, 1, vec![1.0f32, 2.0]);
        let b = Image::from_vec(2, 1, vec![1.5f32, 1.0]);
        assert!((a.max_abs_diff(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_get_out_of_bounds() {
        let img = Image::<f32>::new(2, 2);
        img.get(2, 0);
    }
}
