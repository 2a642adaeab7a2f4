// filters.rs — The fixed dual-tree filter set.
//
// Level 1 uses near-symmetric odd-length biorthogonal filters (13/19/19
// taps) applied without decimation. Levels ≥ 2 use even-length
// quarter-shift filters (14 taps) applied with decimation by 2, one tree
// on each output phase.
//
// PAIR ORDER:
// A decimating filter produces two trees: tree 0 from the taps in natural
// order and tree 1 from the taps reversed. Which tree lands on the even
// output phase is the pair order. For the quarter-shift set the order
// follows the sign of the "mirror correlation" Σ h[k]·h[L−1−k]:
//
//   h0   +0.891  → Natural
//   h1   −0.891  → Swapped
//   hbp  −0.763  → Swapped
//
// `FilterSpec::implied_order()` computes this rule; the constants below are
// checked against it in the tests.

use std::fmt;

/// Interleave order of the two decimated trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PairOrder {
    /// Tree 0 on even outputs, tree 1 on odd outputs.
    #[default]
    Natural,
    /// Tree 1 on even outputs, tree 0 on odd outputs.
    Swapped,
}

impl PairOrder {
    /// Which tree produces output phase `phase` (0 = even, 1 = odd).
    #[inline]
    pub fn tree_for_phase(self, phase: usize) -> usize {
        match self {
            PairOrder::Natural => phase & 1,
            PairOrder::Swapped => (phase & 1) ^ 1,
        }
    }
}

impl fmt::Display for PairOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOrder::Natural => write!(f, "natural"),
            PairOrder::Swapped => write!(f, "swapped"),
        }
    }
}

/// A filter: taps in convolution order plus the decimated pair order.
///
/// Immutable once built. The pair order is ignored by non-decimating
/// operators.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    taps: Vec<f32>,
    order: PairOrder,
}

impl FilterSpec {
    pub fn new(taps: &[f32], order: PairOrder) -> Self {
        FilterSpec { taps: taps.to_vec(), order }
    }

    pub fn natural(taps: &[f32]) -> Self {
        Self::new(taps, PairOrder::Natural)
    }

    #[inline]
    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    #[inline]
    pub fn order(&self) -> PairOrder {
        self.order
    }

    /// Same taps, different pair order.
    pub fn with_order(&self, order: PairOrder) -> Self {
        FilterSpec { taps: self.taps.clone(), order }
    }

    /// Time-reversed taps. Kernels correlate with these, which is the same
    /// as convolving with the originals.
    pub fn reversed(&self) -> Vec<f32> {
        self.taps.iter().rev().copied().collect()
    }

    /// Taps embedded in the centre of a zero vector of length `len`.
    ///
    /// Only defined when `len - self.len()` is even, so that the filter
    /// centre does not move.
    pub fn centre_padded(&self, len: usize) -> Option<Vec<f32>> {
        if len < self.len() || (len - self.len()) % 2 != 0 {
            return None;
        }
        let lead = (len - self.len()) / 2;
        let mut out = vec![0.0; len];
        out[lead..lead + self.len()].copy_from_slice(&self.taps);
        Some(out)
    }

    /// Σ h[k]·h[L−1−k].
    pub fn mirror_correlation(&self) -> f64 {
        let n = self.taps.len();
        (0..n).map(|k| self.taps[k] as f64 * self.taps[n - 1 - k] as f64).sum()
    }

    /// Pair order predicted by the sign of the mirror correlation.
    pub fn implied_order(&self) -> PairOrder {
        if self.mirror_correlation() > 0.0 {
            PairOrder::Natural
        } else {
            PairOrder::Swapped
        }
    }
}

/// Lowpass, highpass and bandpass filters used at one level.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBank {
    pub h0: FilterSpec,
    pub h1: FilterSpec,
    pub hbp: FilterSpec,
}

impl FilterBank {
    /// Filters applied along rows: (lo, hi, bp) output slices.
    pub fn row_triple(&self) -> [FilterSpec; 3] {
        [self.h0.clone(), self.h1.clone(), self.hbp.clone()]
    }

    /// Filters applied along columns to (lo, hi, bp) rows, producing
    /// (lohi, hilo, bpbp).
    pub fn column_triple(&self) -> [FilterSpec; 3] {
        [self.h1.clone(), self.h0.clone(), self.hbp.clone()]
    }

    pub fn max_len(&self) -> usize {
        self.h0.len().max(self.h1.len()).max(self.hbp.len())
    }
}

/// The complete dual-tree filter set: level 1 and levels ≥ 2.
#[derive(Debug, Clone, PartialEq)]
pub struct DualTreeFilters {
    pub level1: FilterBank,
    pub level2: FilterBank,
}

impl DualTreeFilters {
    /// Near-symmetric 13/19 level-1 filters with the 14-tap quarter-shift
    /// filters for the coarser levels.
    pub fn standard() -> Self {
        DualTreeFilters {
            level1: FilterBank {
                h0: FilterSpec::natural(&LEVEL1_H0),
                h1: FilterSpec::natural(&LEVEL1_H1),
                hbp: FilterSpec::natural(&LEVEL1_HBP),
            },
            level2: FilterBank {
                h0: FilterSpec::new(&LEVEL2_H0, PairOrder::Natural),
                h1: FilterSpec::new(&LEVEL2_H1, PairOrder::Swapped),
                hbp: FilterSpec::new(&LEVEL2_HBP, PairOrder::Swapped),
            },
        }
    }

    /// Smallest block extent that satisfies both the plain level-1 halo
    /// (`L/2 + 1`) and the decimating halo (`L − 1`).
    pub fn required_block_extent(&self) -> usize {
        let plain = self.level1.max_len() / 2 + 1;
        let decimating = self.level2.max_len().saturating_sub(1);
        plain.max(decimating)
    }
}

impl Default for DualTreeFilters {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Coefficients
// ---------------------------------------------------------------------------

pub const LEVEL1_H0: [f32; 13] = [
    -0.0018, 0.0, 0.0223, -0.0469, -0.0482, 0.2969, 0.5555, 0.2969, -0.0482, -0.0469, 0.0223,
    0.0, -0.0018,
];

pub const LEVEL1_H1: [f32; 19] = [
    -0.0001, 0.0, 0.0013, -0.0019, -0.0072, 0.0239, 0.0556, -0.0517, -0.2998, 0.5594, -0.2998,
    -0.0517, 0.0556, 0.0239, -0.0072, -0.0019, 0.0013, 0.0, -0.0001,
];

pub const LEVEL1_HBP: [f32; 19] = [
    -0.0004, -0.0006, -0.0001, 0.0042, 0.0082, -0.0074, -0.0615, -0.1482, -0.1171, 0.6529,
    -0.1171, -0.1482, -0.0615, -0.0074, 0.0082, 0.0042, -0.0001, -0.0006, -0.0004,
];

pub const LEVEL2_H0: [f32; 14] = [
    -0.0046, -0.0054, 0.0170, 0.0238, -0.1067, 0.0119, 0.5688, 0.7561, 0.2753, -0.1172, -0.0389,
    0.0347, -0.0039, 0.0033,
];

pub const LEVEL2_H1: [f32; 14] = [
    -0.0033, -0.0039, -0.0347, -0.0389, 0.1172, 0.2753, -0.7561, 0.5688, -0.0119, -0.1067,
    -0.0238, 0.0170, 0.0054, -0.0046,
];

pub const LEVEL2_HBP: [f32; 14] = [
    -0.0028, -0.0004, 0.0210, 0.0614, 0.1732, -0.0448, -0.8381, 0.4368, 0.2627, -0.0076, -0.0264,
    -0.0255, -0.0096, -0.0000,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_shift_orders_follow_sign_rule() {
        let f = DualTreeFilters::standard();
        for spec in [&f.level2.h0, &f.level2.h1, &f.level2.hbp] {
            assert_eq!(spec.order(), spec.implied_order(), "{:?}", spec.taps());
        }
        assert!(f.level2.h0.mirror_correlation() > 0.8);
        assert!(f.level2.h1.mirror_correlation() < -0.8);
    }

    #[test]
    fn test_lengths() {
        let f = DualTreeFilters::standard();
        assert_eq!(f.level1.h0.len(), 13);
        assert_eq!(f.level1.h1.len(), 19);
        assert_eq!(f.level1.hbp.len(), 19);
        assert!(f.level2.row_triple().iter().all(|s| s.len() == 14));
        // max(19/2 + 1, 14 - 1)
        assert_eq!(f.required_block_extent(), 13);
    }

    #[test]
    fn test_lowpass_dc_gain() {
        let f = DualTreeFilters::standard();
        let g1: f32 = f.level1.h0.taps().iter().sum();
        let g2: f32 = f.level2.h0.taps().iter().sum();
        assert!((g1 - 1.0).abs() < 1e-3, "level-1 h0 DC gain {g1}");
        assert!((g2 - std::f32::consts::SQRT_2).abs() < 2e-3, "level-2 h0 DC gain {g2}");
    }

    #[test]
    fn test_reversed() {
        let s = FilterSpec::natural(&[1.0, 2.0, 3.0]);
        assert_eq!(s.reversed(), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_centre_padded() {
        let s = FilterSpec::natural(&[1.0, 2.0, 3.0]);
        assert_eq!(s.centre_padded(7).unwrap(), vec![0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(s.centre_padded(3).unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(s.centre_padded(4).is_none());
        assert!(s.centre_padded(1).is_none());
    }

    #[test]
    fn test_tree_for_phase() {
        assert_eq!(PairOrder::Natural.tree_for_phase(0), 0);
        assert_eq!(PairOrder::Natural.tree_for_phase(1), 1);
        assert_eq!(PairOrder::Swapped.tree_for_phase(0), 1);
        assert_eq!(PairOrder::Swapped.tree_for_phase(3), 0);
    }

    #[test]
    fn test_column_triple_order() {
        let f = DualTreeFilters::standard();
        let cols = f.level2.column_triple();
        assert_eq!(cols[0], f.level2.h1);
        assert_eq!(cols[1], f.level2.h0);
        assert_eq!(cols[2], f.level2.hbp);
    }
}
