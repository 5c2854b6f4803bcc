//! Axes for the momentum-transfer (q) and real-space distance (d) grids.

use serde::{Deserialize, Serialize};

/// Width of a distance bin in ångström.
pub const DEFAULT_BIN_WIDTH: f64 = 0.125;

/// Number of distance bins, covering `[0, 1000)` Å at the default width.
pub const DEFAULT_DISTANCE_BINS: usize = 8000;

/// Spacing of the q-axis samples.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum QSpacing {
    /// Logarithmically spaced samples.
    #[default]
    Log,
    /// Linearly spaced samples.
    Linear,
}

/// A simple binned axis `[min, max)` with `bins` equally sized bins.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Axis {
    /// Left edge of the first bin.
    pub min: f64,
    /// Right edge of the last bin.
    pub max: f64,
    /// Number of bins.
    pub bins: usize,
}

impl Axis {
    /// Constructor.
    #[must_use]
    pub const fn new(min: f64, max: f64, bins: usize) -> Self {
        Self { min, max, bins }
    }

    /// Returns the width of a single bin.
    #[must_use]
    pub fn width(&self) -> f64 {
        (self.max - self.min) / self.bins as f64
    }

    /// Returns the bin index for `value`, or `None` if the value over- or
    /// underflows the axis.
    #[must_use]
    pub fn index_of(&self, value: f64) -> Option<usize> {
        if value < self.min || value >= self.max {
            None
        } else {
            Some(((value - self.min) / self.width()) as usize)
        }
    }

    /// Returns the left edge of bin `i`.
    #[must_use]
    pub fn bin_value(&self, i: usize) -> f64 {
        (i as f64).mul_add(self.width(), self.min)
    }

    /// Returns all bin edges as a vector of length `bins + 1`.
    #[must_use]
    pub fn as_vec(&self) -> Vec<f64> {
        (0..=self.bins).map(|i| self.bin_value(i)).collect()
    }

    /// Returns `true` if the axis has no bins.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bins == 0
    }
}

/// Generates the q-axis: `bins` samples spanning `[q_min, q_max]` inclusive.
///
/// The default is logarithmic spacing, which concentrates samples at the small
/// angles where measured curves carry the most structure.
///
/// # Panics
///
/// Panics for inverted or non-positive limits, or fewer than two samples.
#[must_use]
pub fn q_axis(q_min: f64, q_max: f64, bins: usize, spacing: QSpacing) -> Vec<f64> {
    assert!(q_min > 0.0 && q_min < q_max);
    assert!(bins > 1);

    match spacing {
        QSpacing::Log => {
            let (lmin, lmax) = (q_min.ln(), q_max.ln());
            let step = (lmax - lmin) / (bins - 1) as f64;
            (0..bins)
                .map(|i| (i as f64).mul_add(step, lmin).exp())
                .collect()
        }
        QSpacing::Linear => {
            let step = (q_max - q_min) / (bins - 1) as f64;
            (0..bins)
                .map(|i| (i as f64).mul_add(step, q_min))
                .collect()
        }
    }
}

/// Generates the d-axis of nominal bin centers: `d_j = j·Δr`.
#[must_use]
pub fn d_axis(bin_width: f64, bins: usize) -> Vec<f64> {
    (0..bins).map(|j| j as f64 * bin_width).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn index_of_respects_edges() {
        let axis = Axis::new(0.0, 10.0, 10);
        assert_eq!(axis.index_of(-0.1), None);
        assert_eq!(axis.index_of(0.0), Some(0));
        assert_eq!(axis.index_of(9.999), Some(9));
        assert_eq!(axis.index_of(10.0), None);
    }

    #[test]
    fn log_axis_hits_both_endpoints() {
        let q = q_axis(1e-4, 0.5, 1000, QSpacing::Log);
        assert_eq!(q.len(), 1000);
        assert_approx_eq!(f64, q[0], 1e-4, ulps = 4);
        assert_approx_eq!(f64, q[999], 0.5, ulps = 4);
        assert!(q.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn linear_axis_is_equally_spaced() {
        let q = q_axis(0.1, 0.5, 5, QSpacing::Linear);
        let steps: Vec<_> = q.windows(2).map(|w| w[1] - w[0]).collect();
        for step in steps {
            assert_approx_eq!(f64, step, 0.1, epsilon = 1e-12);
        }
    }

    #[test]
    fn d_axis_starts_at_zero() {
        let d = d_axis(DEFAULT_BIN_WIDTH, DEFAULT_DISTANCE_BINS);
        assert_eq!(d.len(), 8000);
        assert_approx_eq!(f64, d[0], 0.0);
        assert_approx_eq!(f64, d[80], 10.0);
    }
}
