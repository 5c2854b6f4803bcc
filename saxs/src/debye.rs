//! The Debye transform and its sinc lookup table.
//!
//! The isotropic Fourier transform `I(q) = Σ_d p(d)·sin(qd)/(qd)` dominates
//! the cost of every profile evaluation after the histograms are built, so
//! the `sinc` factors are tabulated once per `(q-axis, d-axis)` pair and
//! shared across all partials.

use ndarray::Array2;

/// Threshold below which `sin(x)/x` switches to its Taylor expansion.
const TAYLOR_THRESHOLD: f64 = 1e-3;

/// `sin(x)/x` with a series fallback near zero.
#[inline]
#[must_use]
pub fn sinc(x: f64) -> f64 {
    if x.abs() < TAYLOR_THRESHOLD {
        let x2 = x * x;
        x2.mul_add(x2 / 120.0, 1.0 - x2 / 6.0)
    } else {
        x.sin() / x
    }
}

/// The Debye-Waller attenuation `exp(−B·q²/(8π²))`.
#[inline]
#[must_use]
pub fn debye_waller(q: f64, b: f64) -> f64 {
    (-b * q * q / (8.0 * std::f64::consts::PI * std::f64::consts::PI)).exp()
}

/// A precomputed table of `sinc(q_i·d_j)` values.
#[derive(Clone, Debug)]
pub struct DebyeTable {
    table: Array2<f64>,
}

impl DebyeTable {
    /// Tabulates `sinc(q_i·d_j)` for all combinations of the two axes.
    #[must_use]
    pub fn new(q_axis: &[f64], d_axis: &[f64]) -> Self {
        let mut table = Array2::zeros((q_axis.len(), d_axis.len()));
        for (i, &q) in q_axis.iter().enumerate() {
            for (j, &d) in d_axis.iter().enumerate() {
                table[[i, j]] = sinc(q * d);
            }
        }
        Self { table }
    }

    /// Number of q samples.
    #[must_use]
    pub fn size_q(&self) -> usize {
        self.table.dim().0
    }

    /// Number of d samples.
    #[must_use]
    pub fn size_d(&self) -> usize {
        self.table.dim().1
    }

    /// Looks up `sinc(q_i·d_j)`.
    #[must_use]
    pub fn lookup(&self, i: usize, j: usize) -> f64 {
        self.table[[i, j]]
    }

    /// The full `sinc` row of q-sample `i`, one entry per d-bin.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        self.table
            .row(i)
            .to_slice()
            .expect("table rows are stored contiguously")
    }

    /// Transforms a distance distribution into an intensity profile with a
    /// unit form-factor weight: `I(q_i) = Σ_j p[j]·sinc(q_i·d_j)`.
    #[must_use]
    pub fn transform(&self, p: &[f64]) -> Vec<f64> {
        debug_assert!(p.len() <= self.size_d());
        (0..self.size_q())
            .map(|i| {
                self.row(i)
                    .iter()
                    .zip(p)
                    .map(|(sinc_qd, &value)| sinc_qd * value)
                    .sum()
            })
            .collect()
    }
}
