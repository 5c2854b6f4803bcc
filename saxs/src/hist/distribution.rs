//! Binned pair-distance distributions.
//!
//! Distributions come in a plain flavor, which stores only the summed
//! weights, and a weighted flavor, which additionally tracks the weighted
//! center of every bin. The weighted flavor is required whenever many
//! contributions cluster near bin boundaries, in particular for the
//! grid-sampled excluded volume, whose dummies sit on a regular lattice.

use ndarray::{Array2, Array3};

/// A single histogram bin.
///
/// Implemented by `f64` (plain accumulation) and [`WeightedEntry`] (weighted
/// center tracking). The two implementations monomorphize the distribution
/// containers into plain and weighted variants without a boolean type
/// parameter on the public surface.
pub trait BinEntry: Clone + Default + Send + Sync + 'static {
    /// Adds a contribution of `value` at the exact distance `distance`.
    fn add(&mut self, distance: f32, value: f64);

    /// Folds another bin into this one.
    fn merge(&mut self, other: &Self);

    /// The accumulated weight of this bin.
    fn value(&self) -> f64;

    /// The reported center of the bin, given its nominal center.
    fn center(&self, nominal: f64) -> f64;
}

impl BinEntry for f64 {
    #[inline]
    fn add(&mut self, _distance: f32, value: f64) {
        *self += value;
    }

    fn merge(&mut self, other: &Self) {
        *self += other;
    }

    fn value(&self) -> f64 {
        *self
    }

    fn center(&self, nominal: f64) -> f64 {
        nominal
    }
}

/// A bin that tracks the weighted center of its contributions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightedEntry {
    /// Accumulated weight.
    pub value: f64,
    /// Number of contributions.
    pub count: u32,
    /// Sum of the contributing distances.
    pub d_sum: f64,
}

impl BinEntry for WeightedEntry {
    #[inline]
    fn add(&mut self, distance: f32, value: f64) {
        self.value += value;
        self.count += 1;
        self.d_sum += f64::from(distance);
    }

    fn merge(&mut self, other: &Self) {
        self.value += other.value;
        self.count += other.count;
        self.d_sum += other.d_sum;
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn center(&self, nominal: f64) -> f64 {
        if self.count == 0 {
            nominal
        } else {
            self.d_sum / f64::from(self.count)
        }
    }
}

/// A dense one-dimensional pair-distance distribution.
#[derive(Clone, Debug)]
pub struct Distribution1D<E: BinEntry = f64> {
    data: Vec<E>,
    inv_width: f32,
    width: f64,
}

impl<E: BinEntry> Distribution1D<E> {
    /// An empty distribution with `bins` bins of width `bin_width`.
    #[must_use]
    pub fn new(bins: usize, bin_width: f64) -> Self {
        Self {
            data: vec![E::default(); bins],
            inv_width: (1.0 / bin_width) as f32,
            width: bin_width,
        }
    }

    /// Number of bins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the distribution has no bins.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bin width in Å.
    #[must_use]
    pub const fn bin_width(&self) -> f64 {
        self.width
    }

    /// Adds `value` at `distance`. The bin is `round(d / Δr)`, ties away from
    /// zero; distances beyond the last bin are dropped silently.
    #[inline]
    pub fn add(&mut self, distance: f32, value: f64) {
        let bin = (distance * self.inv_width).round() as usize;
        if let Some(entry) = self.data.get_mut(bin) {
            entry.add(distance, value);
        }
    }

    /// Adds `value` directly into bin `i`.
    #[inline]
    pub fn add_index(&mut self, i: usize, value: f64) {
        self.data[i].add((i as f32) * self.width as f32, value);
    }

    /// The bin entries.
    #[must_use]
    pub fn entries(&self) -> &[E] {
        &self.data
    }

    /// The accumulated weight of every bin.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().map(BinEntry::value).collect()
    }

    /// The reported center of every bin: the nominal center for plain bins,
    /// the weighted mean of the contributing distances for weighted ones.
    #[must_use]
    pub fn centers(&self) -> Vec<f64> {
        self.data
            .iter()
            .enumerate()
            .map(|(i, entry)| entry.center(i as f64 * self.width))
            .collect()
    }

    /// Index of the last bin with non-zero content, if any.
    #[must_use]
    pub fn last_occupied(&self) -> Option<usize> {
        self.data.iter().rposition(|entry| entry.value() != 0.0)
    }

    /// Folds `other` into this distribution bin by bin.
    ///
    /// # Panics
    ///
    /// Panics if the lengths differ.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(self.data.len(), other.data.len());
        for (lhs, rhs) in self.data.iter_mut().zip(&other.data) {
            lhs.merge(rhs);
        }
    }
}

/// A plain distribution resolved along one type axis: `(type, bin)`.
#[derive(Clone, Debug)]
pub struct Distribution2D<E: BinEntry = f64> {
    data: Array2<E>,
    inv_width: f32,
    width: f64,
}

impl<E: BinEntry> Distribution2D<E> {
    /// An empty distribution for `types` types and `bins` bins.
    #[must_use]
    pub fn new(types: usize, bins: usize, bin_width: f64) -> Self {
        Self {
            data: Array2::from_elem((types, bins), E::default()),
            inv_width: (1.0 / bin_width) as f32,
            width: bin_width,
        }
    }

    /// Number of types along the type axis.
    #[must_use]
    pub fn types(&self) -> usize {
        self.data.dim().0
    }

    /// Number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.data.dim().1
    }

    /// Adds `value` at `distance` for type `t`.
    #[inline]
    pub fn add(&mut self, t: usize, distance: f32, value: f64) {
        let bin = (distance * self.inv_width).round() as usize;
        if bin < self.data.dim().1 {
            self.data[[t, bin]].add(distance, value);
        }
    }

    /// The entry of type `t` at bin `b`.
    #[must_use]
    pub fn entry(&self, t: usize, b: usize) -> &E {
        &self.data[[t, b]]
    }

    /// Mutable access to an entry.
    pub fn entry_mut(&mut self, t: usize, b: usize) -> &mut E {
        &mut self.data[[t, b]]
    }

    /// Sums over the type axis into a one-dimensional distribution of values.
    #[must_use]
    pub fn collapse(&self) -> Vec<f64> {
        let (types, bins) = self.data.dim();
        let mut out = vec![0.0; bins];
        for t in 0..types {
            for (b, slot) in out.iter_mut().enumerate() {
                *slot += self.data[[t, b]].value();
            }
        }
        out
    }

    /// The accumulated values as a dense array.
    #[must_use]
    pub fn values_array(&self) -> Array2<f64> {
        self.data.map(BinEntry::value)
    }

    /// The reported bin centers, aggregated over the type axis.
    #[must_use]
    pub fn centers(&self) -> Vec<f64> {
        let (types, bins) = self.data.dim();
        (0..bins)
            .map(|b| {
                let mut merged = E::default();
                for t in 0..types {
                    merged.merge(&self.data[[t, b]]);
                }
                merged.center(b as f64 * self.width)
            })
            .collect()
    }

    /// Folds `other` into this distribution.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(self.data.dim(), other.data.dim());
        for (lhs, rhs) in self.data.iter_mut().zip(other.data.iter()) {
            lhs.merge(rhs);
        }
    }
}

/// A distribution resolved along both type axes: `(type, type, bin)`. Dense
/// in all three axes; the type axes are small (≤ 15).
#[derive(Clone, Debug)]
pub struct Distribution3D<E: BinEntry = f64> {
    data: Array3<E>,
    inv_width: f32,
    width: f64,
}

impl<E: BinEntry> Distribution3D<E> {
    /// An empty distribution for `types × types` type pairs and `bins` bins.
    #[must_use]
    pub fn new(types: usize, bins: usize, bin_width: f64) -> Self {
        Self {
            data: Array3::from_elem((types, types, bins), E::default()),
            inv_width: (1.0 / bin_width) as f32,
            width: bin_width,
        }
    }

    /// Number of types along each type axis.
    #[must_use]
    pub fn types(&self) -> usize {
        self.data.dim().0
    }

    /// Number of bins.
    #[must_use]
    pub fn bins(&self) -> usize {
        self.data.dim().2
    }

    /// Adds `value` at `distance` into both `(t1, t2)` and `(t2, t1)`, which
    /// keeps the distribution symmetric under ordered-pair counting. For
    /// `t1 == t2` the single cell receives `2·value`.
    #[inline]
    pub fn add_symmetric(&mut self, t1: usize, t2: usize, distance: f32, value: f64) {
        let bin = (distance * self.inv_width).round() as usize;
        if bin < self.data.dim().2 {
            self.data[[t1, t2, bin]].add(distance, value);
            self.data[[t2, t1, bin]].add(distance, value);
        }
    }

    /// Adds `value` into the diagonal cell `(t, t)` at bin 0. Used for the
    /// self-correlation mass.
    #[inline]
    pub fn add_self(&mut self, t: usize, value: f64) {
        self.data[[t, t, 0]].add(0.0, value);
    }

    /// The entry of type pair `(t1, t2)` at bin `b`.
    #[must_use]
    pub fn entry(&self, t1: usize, t2: usize, b: usize) -> &E {
        &self.data[[t1, t2, b]]
    }

    /// The accumulated values as a dense array.
    #[must_use]
    pub fn values_array(&self) -> Array3<f64> {
        self.data.map(BinEntry::value)
    }

    /// Sums over both type axes into a one-dimensional vector of values.
    #[must_use]
    pub fn collapse(&self) -> Vec<f64> {
        let (t1s, t2s, bins) = self.data.dim();
        let mut out = vec![0.0; bins];
        for t1 in 0..t1s {
            for t2 in 0..t2s {
                for (b, slot) in out.iter_mut().enumerate() {
                    *slot += self.data[[t1, t2, b]].value();
                }
            }
        }
        out
    }

    /// The reported bin centers, aggregated over both type axes.
    #[must_use]
    pub fn centers(&self) -> Vec<f64> {
        let (t1s, t2s, bins) = self.data.dim();
        (0..bins)
            .map(|b| {
                let mut merged = E::default();
                for t1 in 0..t1s {
                    for t2 in 0..t2s {
                        merged.merge(&self.data[[t1, t2, b]]);
                    }
                }
                merged.center(b as f64 * self.width)
            })
            .collect()
    }

    /// Folds `other` into this distribution.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions differ.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(self.data.dim(), other.data.dim());
        for (lhs, rhs) in self.data.iter_mut().zip(other.data.iter()) {
            lhs.merge(rhs);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn binning_rounds_to_the_nearest_center() {
        let mut p: Distribution1D = Distribution1D::new(100, 0.125);
        p.add(10.0, 1.0);
        p.add(10.06, 1.0); // 80.48 rounds down
        p.add(10.07, 1.0); // 80.56 rounds up
        assert_approx_eq!(f64, p.values()[80], 2.0);
        assert_approx_eq!(f64, p.values()[81], 1.0);
    }

    #[test]
    fn out_of_range_distances_are_dropped() {
        let mut p: Distribution1D = Distribution1D::new(10, 0.125);
        p.add(100.0, 1.0);
        assert!(p.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn weighted_bins_report_the_weighted_center() {
        let mut p: Distribution1D<WeightedEntry> = Distribution1D::new(100, 0.125);
        p.add(10.0, 1.0);
        p.add(10.05, 3.0);
        let centers = p.centers();
        // both contributions land in bin 80; the center is the plain mean of
        // the distances, not weighted by the values
        assert_approx_eq!(f64, centers[80], 10.025, epsilon = 1e-6);
        assert_approx_eq!(f64, p.values()[80], 4.0);
        // untouched bins keep their nominal center
        assert_approx_eq!(f64, centers[40], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn symmetric_add_keeps_the_type_axes_symmetric() {
        let mut p: Distribution3D = Distribution3D::new(3, 100, 0.125);
        p.add_symmetric(0, 2, 1.0, 5.0);
        assert_approx_eq!(f64, p.entry(0, 2, 8).value(), 5.0);
        assert_approx_eq!(f64, p.entry(2, 0, 8).value(), 5.0);

        p.add_symmetric(1, 1, 1.0, 5.0);
        assert_approx_eq!(f64, p.entry(1, 1, 8).value(), 10.0);
    }

    #[test]
    fn collapse_sums_all_type_pairs() {
        let mut p: Distribution3D = Distribution3D::new(2, 10, 1.0);
        p.add_symmetric(0, 1, 2.0, 1.5);
        p.add_self(0, 4.0);
        let collapsed = p.collapse();
        assert_approx_eq!(f64, collapsed[2], 3.0);
        assert_approx_eq!(f64, collapsed[0], 4.0);
    }

    #[test]
    fn merge_adds_bin_by_bin() {
        let mut a: Distribution1D = Distribution1D::new(10, 1.0);
        let mut b: Distribution1D = Distribution1D::new(10, 1.0);
        a.add(1.0, 1.0);
        b.add(1.0, 2.0);
        b.add(3.0, 4.0);
        a.merge(&b);
        assert_approx_eq!(f64, a.values()[1], 3.0);
        assert_approx_eq!(f64, a.values()[3], 4.0);
    }
}
