// convolution.rs — CPU reference for the dual-tree 1D filters.
//
// These functions are the authoritative definition of what the accelerator
// kernels compute. They are written for clarity, not speed: every sample is
// fetched through `reflect()` on an explicitly extended signal, so there is
// no padding, no read-origin shift and no reversed tap buffer involved.
//
// BORDER HANDLING: half-sample symmetric.
// The signal is first extended by duplicating its edge samples where the
// level requires it (`extend()`), then indices outside the extended signal
// mirror back with period 2L:
//
//   index:   -3 -2 -1 | 0 1 2 3 | 4 5 6
//   sample:   c  b  a | a b c d | d c b
//
// Two filter shapes:
//   colfilter — no decimation, output length = input length.
//   coldfilt  — decimation by 2 with two trees. Input length must be a
//               multiple of 4; output length is half the input.
//
// NEW RUST CONCEPTS:
// - `isize` arithmetic for signed offsets, converted back to `usize` only
//   after reflection guarantees the index is in range.
// - Free functions over slices (`&[f32]`) with thin `Image` wrappers, so the
//   same 1D code runs along rows and columns.

use crate::filters::{FilterSpec, PairOrder};
use crate::image::Image;
use crate::ops::extend::Extension;

/// Map any integer position onto `[0, len)` by half-sample symmetric
/// reflection.
///
/// # Panics
/// Panics if `len == 0`.
#[inline]
pub fn reflect(p: isize, len: usize) -> usize {
    assert!(len > 0, "cannot reflect into an empty signal");
    let period = 2 * len as isize;
    let t = p.rem_euclid(period) as usize;
    if t >= len {
        2 * len - 1 - t
    } else {
        t
    }
}

/// Duplicate the first and/or last sample.
pub fn extend(x: &[f32], ext: Extension) -> Vec<f32> {
    assert!(!x.is_empty(), "cannot extend an empty signal");
    let mut out = Vec::with_capacity(ext.extended_len(x.len()));
    if ext.start {
        out.push(x[0]);
    }
    out.extend_from_slice(x);
    if ext.end {
        out.push(x[x.len() - 1]);
    }
    out
}

/// Value a padded buffer must hold at position `p` (outside `[0, n)`) so
/// that reading it is equivalent to reading the extended signal.
///
/// `p` is relative to the first real sample; the extended signal starts at
/// `-ext.start`.
pub fn padded_value(x: &[f32], p: isize, ext: Extension) -> f32 {
    let n = x.len();
    let start = ext.start as isize;
    let i = reflect(p + start, ext.extended_len(n)) as isize;
    x[(i - start).clamp(0, n as isize - 1) as usize]
}

/// Non-decimating symmetric convolution. Output length = input length.
///
/// `y[n] = Σ_k h[k] · x[refl(n + m − k)]` with `m = (L − 1) / 2`.
pub fn colfilter(x: &[f32], h: &[f32]) -> Vec<f32> {
    assert!(!h.is_empty(), "filter must not be empty");
    let n = x.len();
    let m = ((h.len() - 1) / 2) as isize;
    (0..n as isize)
        .map(|i| {
            h.iter()
                .enumerate()
                .map(|(k, &hk)| hk * x[reflect(i + m - k as isize, n)])
                .sum()
        })
        .collect()
}

/// Decimate-by-2 symmetric convolution with two trees.
///
/// ```text
/// Ya[n] = Σ_k h[k]       · x[refl(4n + L − 2k)]
/// Yb[n] = Σ_k h[L−1−k]   · x[refl(4n + L + 1 − 2k)]
/// ```
///
/// `order` decides whether `Ya` (tree 0) or `Yb` (tree 1) fills the even
/// output positions.
///
/// # Panics
/// Panics if the filter length is odd or the input length is not a
/// multiple of 4.
pub fn coldfilt(x: &[f32], h: &[f32], order: PairOrder) -> Vec<f32> {
    let n = x.len();
    let l = h.len();
    assert!(l % 2 == 0 && l > 0, "decimating filter length must be even (got {l})");
    assert!(n % 4 == 0, "input length must be a multiple of 4 (got {n})");

    let tree = |which: usize, pair: usize| -> f32 {
        let base = 4 * pair as isize + l as isize + which as isize;
        (0..l)
            .map(|k| {
                let tap = if which == 0 { h[k] } else { h[l - 1 - k] };
                tap * x[reflect(base - 2 * k as isize, n)]
            })
            .sum()
    };

    (0..n / 2)
        .map(|o| tree(order.tree_for_phase(o & 1), o / 2))
        .collect()
}

// ---------------------------------------------------------------------------
// Image wrappers
// ---------------------------------------------------------------------------

/// `colfilter` along every row after extending each row by `ext`.
pub fn filter_rows(src: &Image<f32>, h: &[f32], ext: Extension) -> Image<f32> {
    let rows: Vec<Vec<f32>> = (0..src.height())
        .map(|y| colfilter(&extend(src.row(y), ext), h))
        .collect();
    from_rows(rows)
}

/// `colfilter` along every column after extending each column by `ext`.
pub fn filter_columns(src: &Image<f32>, h: &[f32], ext: Extension) -> Image<f32> {
    let cols: Vec<Vec<f32>> = (0..src.width())
        .map(|x| colfilter(&extend(&src.column(x), ext), h))
        .collect();
    from_columns(cols)
}

/// `coldfilt` along every row after extending each row by `ext`.
pub fn decimate_rows(src: &Image<f32>, filter: &FilterSpec, ext: Extension) -> Image<f32> {
    let rows: Vec<Vec<f32>> = (0..src.height())
        .map(|y| coldfilt(&extend(src.row(y), ext), filter.taps(), filter.order()))
        .collect();
    from_rows(rows)
}

/// `coldfilt` along every column after extending each column by `ext`.
pub fn decimate_columns(src: &Image<f32>, filter: &FilterSpec, ext: Extension) -> Image<f32> {
    let cols: Vec<Vec<f32>> = (0..src.width())
        .map(|x| coldfilt(&extend(&src.column(x), ext), filter.taps(), filter.order()))
        .collect();
    from_columns(cols)
}

fn from_rows(rows: Vec<Vec<f32>>) -> Image<f32> {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    Image::from_vec(width, height, rows.concat())
}

fn from_columns(cols: Vec<Vec<f32>>) -> Image<f32> {
    let width = cols.len();
    let height = cols.first().map_or(0, Vec::len);
    Image::from_fn(width, height, |x, y| cols[x][y])
}
