//! Composite distance histograms: immutable distance-space partials plus a
//! cheaply re-scalable total and the intensity profiles derived from them.
//!
//! Scaling the hydration (`cw`), excluded volume (`cx`) or the Debye-Waller
//! factors (`cd`, `cx_dw`) never re-runs the O(N²) builders: the partials are
//! transformed to q-space once, and every parameter combination is an O(|Q|)
//! recombination of the per-partial profiles.

use super::distribution::{BinEntry, Distribution1D};
use crate::config::ExvFlavor;
use crate::debye::{debye_waller, DebyeTable};
use crate::form_factor::{FormFactorType, ProductTable, ATOMIC_TYPES};
use crate::profile::ScatteringProfile;
use enum_dispatch::enum_dispatch;
use ndarray::{Array2, Array3};
use rustc_hash::FxHashMap;

/// The four outer fit parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitParams {
    /// Hydration-shell scaling.
    pub cw: f64,
    /// Excluded-volume scaling.
    pub cx: f64,
    /// Atomic Debye-Waller B-factor.
    pub cd: f64,
    /// Excluded-volume Debye-Waller B-factor.
    pub cx_dw: f64,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            cw: 1.0,
            cx: 1.0,
            cd: 0.0,
            cx_dw: 0.0,
        }
    }
}

fn param_key(params: &FitParams) -> [u64; 4] {
    [
        params.cw.to_bits(),
        params.cx.to_bits(),
        params.cd.to_bits(),
        params.cx_dw.to_bits(),
    ]
}

/// How the excluded-volume scaling factor enters the model.
///
/// Every convention satisfies `factor(q, 1) = 1`, so the unscaled model is
/// independent of the flavor.
#[derive(Clone, Copy, Debug)]
pub struct ExvFactor {
    flavor: ExvFlavor,
    volume: f64,
}

impl ExvFactor {
    /// Constructor; `volume` is the average displaced volume per atom in Å³.
    #[must_use]
    pub const fn new(flavor: ExvFlavor, volume: f64) -> Self {
        Self { flavor, volume }
    }

    /// Evaluates the scaling applied to the excluded-volume amplitude.
    #[must_use]
    pub fn evaluate(&self, q: f64, cx: f64) -> f64 {
        let v23 = self.volume.powf(2.0 / 3.0);
        let four_pi = 4.0 * std::f64::consts::PI;
        match self.flavor {
            ExvFlavor::Plain => cx,
            // cx rescales the dummy volume: amplitude cx³ with a Gaussian
            // width correction
            ExvFlavor::Crysol | ExvFlavor::FoXS => {
                cx.powi(3) * (-q * q * v23 * (cx * cx - 1.0) / four_pi).exp()
            }
            ExvFlavor::Pepsi => cx * (-q * q * v23 * (cx.powf(2.0 / 3.0) - 1.0) / four_pi).exp(),
        }
    }

    /// The bounds the fitter imposes on `cx` for this flavor.
    #[must_use]
    pub const fn limits(&self) -> (f64, f64) {
        match self.flavor {
            ExvFlavor::Crysol => (0.92, 1.05),
            ExvFlavor::Plain | ExvFlavor::FoXS | ExvFlavor::Pepsi => (0.5, 1.5),
        }
    }
}

/// Excluded-volume intensity partials.
#[derive(Clone, Debug)]
pub struct ExvProfiles {
    /// Atom-dummy cross profile.
    pub ax: Vec<f64>,
    /// Dummy-dummy profile.
    pub xx: Vec<f64>,
    /// Water-dummy cross profile.
    pub wx: Vec<f64>,
}

/// The per-partial intensity profiles of a composite histogram on the engine
/// q-axis, free of all fit parameters.
#[derive(Clone, Debug)]
pub struct PartialProfiles {
    /// The q-axis.
    pub q: Vec<f64>,
    /// Atom-atom profile.
    pub aa: Vec<f64>,
    /// Atom-water cross profile.
    pub aw: Vec<f64>,
    /// Water-water profile.
    pub ww: Vec<f64>,
    /// Excluded-volume partials, when the model carries them.
    pub exv: Option<ExvProfiles>,
}

impl PartialProfiles {
    /// Combines the partials into a total intensity for one parameter
    /// vector:
    ///
    /// `I = da²·(aa + 2·cw·aw + cw²·ww) − 2·da·dx·g·(ax + cw·wx) + dx²·g²·xx`
    ///
    /// with `da`, `dx` the two Debye-Waller attenuations and `g` the flavor
    /// dependent excluded-volume factor.
    #[must_use]
    pub fn combine(&self, params: &FitParams, exv_factor: &ExvFactor) -> Vec<f64> {
        let cw = params.cw;
        self.q
            .iter()
            .enumerate()
            .map(|(k, &q)| {
                let da = debye_waller(q, params.cd);
                let atomic =
                    cw.mul_add(cw.mul_add(self.ww[k], 2.0 * self.aw[k]), self.aa[k]) * da * da;
                match &self.exv {
                    None => atomic,
                    Some(exv) => {
                        let dx = debye_waller(q, params.cx_dw);
                        let g = exv_factor.evaluate(q, params.cx);
                        let cross = -2.0 * da * dx * g * cw.mul_add(exv.wx[k], exv.ax[k]);
                        let dummy = dx * dx * g * g * exv.xx[k];
                        atomic + cross + dummy
                    }
                }
            })
            .collect()
    }
}

/// The common interface of all composite histograms, as used by the fitter.
#[enum_dispatch]
pub trait CompositeHistogram {
    /// The q-axis of the intensity profiles.
    fn q_axis(&self) -> &[f64];

    /// Evaluates the total intensity for one parameter vector. The expensive
    /// Debye sums run once; parameter changes are O(|Q|).
    fn intensity(&mut self, params: &FitParams) -> Vec<f64>;

    /// Bounds on the hydration scaling `cw`.
    fn water_scaling_limits(&self) -> (f64, f64) {
        (0.0, 10.0)
    }

    /// Bounds on the excluded-volume scaling `cx`.
    fn exv_scaling_limits(&self) -> (f64, f64);

    /// Whether the model carries an explicit excluded-volume term.
    fn has_excluded_volume(&self) -> bool;

    /// The intensity profile at the default parameters.
    fn profile(&mut self) -> ScatteringProfile {
        let i = self.intensity(&FitParams::default());
        ScatteringProfile::new(self.q_axis().to_vec(), i)
    }
}

/// A distance histogram reduced to its total, plus the machinery to turn it
/// into an intensity profile with a unit form-factor weight.
#[derive(Clone, Debug)]
pub struct DistanceHistogram {
    p: Vec<f64>,
    d: Vec<f64>,
    q: Vec<f64>,
}

impl DistanceHistogram {
    /// Constructor. The distribution is trimmed to its occupied prefix.
    #[must_use]
    pub fn new(values: Vec<f64>, centers: Vec<f64>, q_axis: Vec<f64>) -> Self {
        let len = values
            .iter()
            .rposition(|&v| v != 0.0)
            .map_or(0, |last| last + 1);
        let mut p = values;
        let mut d = centers;
        p.truncate(len);
        d.truncate(len);
        Self { p, d, q: q_axis }
    }

    /// Builds directly from a distribution.
    #[must_use]
    pub fn from_distribution<E: BinEntry>(p: &Distribution1D<E>, q_axis: Vec<f64>) -> Self {
        Self::new(p.values(), p.centers(), q_axis)
    }

    /// The total distribution, trimmed to its occupied prefix.
    #[must_use]
    pub fn total(&self) -> &[f64] {
        &self.p
    }

    /// The reported bin centers, aligned with [`DistanceHistogram::total`].
    #[must_use]
    pub fn d_axis(&self) -> &[f64] {
        &self.d
    }

    /// The q-axis.
    #[must_use]
    pub fn q_axis(&self) -> &[f64] {
        &self.q
    }

    /// Applies the Debye transform with a unit form-factor weight.
    #[must_use]
    pub fn debye_transform(&self) -> ScatteringProfile {
        let table = DebyeTable::new(&self.q, &self.d);
        ScatteringProfile::new(self.q.clone(), table.transform(&self.p))
    }
}

/// Distance-space excluded-volume partials of the plain composite.
#[derive(Clone, Debug)]
pub struct ExvPartials {
    /// Atom-dummy cross partial.
    pub ax: Vec<f64>,
    /// Dummy-dummy partial.
    pub xx: Vec<f64>,
    /// Water-dummy cross partial.
    pub wx: Vec<f64>,
}

/// A composite histogram over scalar (type-blind) partials, as produced by
/// the plain and partial managers. The form-factor weight of the Debye
/// transform is unity.
#[derive(Clone, Debug)]
pub struct CompositeDistanceHistogram {
    aa: Vec<f64>,
    aw: Vec<f64>,
    ww: Vec<f64>,
    exv: Option<ExvPartials>,
    d: Vec<f64>,
    q: Vec<f64>,
    cw: f64,
    cx: f64,
    exv_factor: ExvFactor,
    profiles: Option<PartialProfiles>,
    cache: FxHashMap<[u64; 4], Vec<f64>>,
}

impl CompositeDistanceHistogram {
    /// Constructor. All partials are trimmed to the longest occupied prefix.
    #[must_use]
    pub fn new(
        mut aa: Vec<f64>,
        mut aw: Vec<f64>,
        mut ww: Vec<f64>,
        exv: Option<ExvPartials>,
        mut centers: Vec<f64>,
        q_axis: Vec<f64>,
        exv_factor: ExvFactor,
    ) -> Self {
        let occupied = |p: &[f64]| p.iter().rposition(|&v| v != 0.0).map_or(0, |i| i + 1);
        let mut len = occupied(&aa).max(occupied(&aw)).max(occupied(&ww));
        if let Some(exv) = &exv {
            len = len
                .max(occupied(&exv.ax))
                .max(occupied(&exv.xx))
                .max(occupied(&exv.wx));
        }
        aa.truncate(len);
        aw.truncate(len);
        ww.truncate(len);
        centers.truncate(len);
        let exv = exv.map(|mut exv| {
            exv.ax.truncate(len);
            exv.xx.truncate(len);
            exv.wx.truncate(len);
            exv
        });
        Self {
            aa,
            aw,
            ww,
            exv,
            d: centers,
            q: q_axis,
            cw: 1.0,
            cx: 1.0,
            exv_factor,
            profiles: None,
            cache: FxHashMap::default(),
        }
    }

    /// The atom-atom partial.
    #[must_use]
    pub fn aa(&self) -> &[f64] {
        &self.aa
    }

    /// The atom-water partial, each combination counted once.
    #[must_use]
    pub fn aw(&self) -> &[f64] {
        &self.aw
    }

    /// The water-water partial.
    #[must_use]
    pub fn ww(&self) -> &[f64] {
        &self.ww
    }

    /// The excluded-volume partials, if the model carries them.
    #[must_use]
    pub const fn exv(&self) -> Option<&ExvPartials> {
        self.exv.as_ref()
    }

    /// The reported bin centers.
    #[must_use]
    pub fn d_axis(&self) -> &[f64] {
        &self.d
    }

    /// Rescales the hydration contribution. O(bins).
    pub fn apply_water_scaling_factor(&mut self, cw: f64) {
        self.cw = cw;
    }

    /// Rescales the excluded-volume contribution. O(bins).
    pub fn apply_excluded_volume_scaling_factor(&mut self, cx: f64) {
        self.cx = cx;
    }

    /// Resets both scaling factors to one.
    pub fn reset_scaling_factors(&mut self) {
        self.cw = 1.0;
        self.cx = 1.0;
    }

    /// The scaled total distance distribution at the current `(cw, cx)`:
    ///
    /// `total = aa − 2·cx·ax + cx²·xx + 2·cw·(aw − cx·wx) + cw²·ww`
    #[must_use]
    pub fn total(&self) -> Vec<f64> {
        let (cw, cx) = (self.cw, self.cx);
        (0..self.d.len())
            .map(|b| {
                let atomic = cw.mul_add(cw.mul_add(self.ww[b], 2.0 * self.aw[b]), self.aa[b]);
                match &self.exv {
                    None => atomic,
                    Some(exv) => {
                        atomic - 2.0 * cx * cw.mul_add(exv.wx[b], exv.ax[b])
                            + cx * cx * exv.xx[b]
                    }
                }
            })
            .collect()
    }

    /// The total as a [`DistanceHistogram`].
    #[must_use]
    pub fn total_histogram(&self) -> DistanceHistogram {
        DistanceHistogram::new(self.total(), self.d.clone(), self.q.clone())
    }

    /// The per-partial intensity profiles, computed on first use.
    pub fn profiles(&mut self) -> &PartialProfiles {
        if self.profiles.is_none() {
            let table = DebyeTable::new(&self.q, &self.d);
            let exv = self.exv.as_ref().map(|exv| ExvProfiles {
                ax: table.transform(&exv.ax),
                xx: table.transform(&exv.xx),
                wx: table.transform(&exv.wx),
            });
            self.profiles = Some(PartialProfiles {
                q: self.q.clone(),
                aa: table.transform(&self.aa),
                aw: table.transform(&self.aw),
                ww: table.transform(&self.ww),
                exv,
            });
        }
        self.profiles.as_ref().expect("just initialized")
    }
}

impl CompositeHistogram for CompositeDistanceHistogram {
    fn q_axis(&self) -> &[f64] {
        &self.q
    }

    fn intensity(&mut self, params: &FitParams) -> Vec<f64> {
        let key = param_key(params);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let exv_factor = self.exv_factor;
        let combined = self.profiles().combine(params, &exv_factor);
        self.cache.insert(key, combined.clone());
        combined
    }

    fn exv_scaling_limits(&self) -> (f64, f64) {
        self.exv_factor.limits()
    }

    fn has_excluded_volume(&self) -> bool {
        self.exv.is_some()
    }
}

/// The typed distance-space partials of a form-factor aware composite.
#[derive(Clone, Debug)]
pub struct TypedPartials {
    /// Atom-atom distribution over `(type, type, bin)`, ordered counting.
    pub p3: Array3<f64>,
    /// Reported bin centers of the `p3` bins.
    pub p3_centers: Vec<f64>,
    /// Atom-water distribution over `(type, bin)`, combinations counted once.
    pub p2: Array2<f64>,
    /// Reported bin centers of the `p2` bins.
    pub p2_centers: Vec<f64>,
    /// Water-water distribution, ordered counting.
    pub p1: Vec<f64>,
    /// Reported bin centers of the `p1` bins.
    pub p1_centers: Vec<f64>,
}

fn trim3(p3: &Array3<f64>) -> usize {
    let (t1s, t2s, bins) = p3.dim();
    (0..bins)
        .rev()
        .find(|&b| (0..t1s).any(|t1| (0..t2s).any(|t2| p3[[t1, t2, b]] != 0.0)))
        .map_or(0, |b| b + 1)
}

fn trim2(p2: &Array2<f64>) -> usize {
    let (ts, bins) = p2.dim();
    (0..bins)
        .rev()
        .find(|&b| (0..ts).any(|t| p2[[t, b]] != 0.0))
        .map_or(0, |b| b + 1)
}

/// Collapses the bin axis of one `(t1, t2)` cell against a sinc table:
/// `out[k] += weight_k · Σ_b p[b]·sinc(q_k·d_b)`, with the per-q weight taken
/// from `weights`.
fn fold_cell(out: &mut [f64], p: &[f64], table: &DebyeTable, weights: &[f64]) {
    if p.iter().all(|&v| v == 0.0) {
        return;
    }
    for (k, slot) in out.iter_mut().enumerate() {
        let s: f64 = table
            .row(k)
            .iter()
            .zip(p)
            .map(|(sinc_qd, &value)| sinc_qd * value)
            .sum();
        *slot += s * weights[k];
    }
}

/// A composite histogram with per-type partials and form-factor weighted
/// Debye transforms. Serves both the average and the explicit excluded
/// volume conventions; they differ only in the product tables.
#[derive(Clone, Debug)]
pub struct CompositeDistanceHistogramFF {
    partials: TypedPartials,
    aa_table: ProductTable,
    cross_table: ProductTable,
    exv_table: ProductTable,
    q: Vec<f64>,
    exv_factor: ExvFactor,
    profiles: Option<PartialProfiles>,
    cache: FxHashMap<[u64; 4], Vec<f64>>,
}

impl CompositeDistanceHistogramFF {
    /// Constructor.
    #[must_use]
    pub fn new(
        partials: TypedPartials,
        aa_table: ProductTable,
        cross_table: ProductTable,
        exv_table: ProductTable,
        q_axis: Vec<f64>,
        exv_factor: ExvFactor,
    ) -> Self {
        Self {
            partials,
            aa_table,
            cross_table,
            exv_table,
            q: q_axis,
            exv_factor,
            profiles: None,
            cache: FxHashMap::default(),
        }
    }

    /// The typed distance-space partials.
    #[must_use]
    pub const fn partials(&self) -> &TypedPartials {
        &self.partials
    }

    /// The total distance distribution of the real scatterers (atoms and
    /// waters), without form-factor weighting.
    #[must_use]
    pub fn total_histogram(&self) -> DistanceHistogram {
        let p3 = &self.partials.p3;
        let (t1s, t2s, bins) = p3.dim();
        let mut total = vec![0.0; bins];
        for t1 in 0..t1s {
            for t2 in 0..t2s {
                for (b, slot) in total.iter_mut().enumerate() {
                    *slot += p3[[t1, t2, b]];
                }
            }
        }
        let (ts, p2_bins) = self.partials.p2.dim();
        total.resize(bins.max(p2_bins), 0.0);
        for t in 0..ts {
            for b in 0..p2_bins {
                total[b] += 2.0 * self.partials.p2[[t, b]];
            }
        }
        for (b, &v) in self.partials.p1.iter().enumerate() {
            if b < total.len() {
                total[b] += v;
            } else {
                total.push(v);
            }
        }
        DistanceHistogram::new(total, self.partials.p3_centers.clone(), self.q.clone())
    }

    fn compute_profiles(&self) -> PartialProfiles {
        let nq = self.q.len();
        let partials = &self.partials;

        let p3_len = trim3(&partials.p3);
        let p2_len = trim2(&partials.p2);
        let p1_len = partials
            .p1
            .iter()
            .rposition(|&v| v != 0.0)
            .map_or(0, |b| b + 1);

        let p3_table = DebyeTable::new(&self.q, &partials.p3_centers[..p3_len]);
        let p2_table = DebyeTable::new(&self.q, &partials.p2_centers[..p2_len]);
        let p1_table = DebyeTable::new(&self.q, &partials.p1_centers[..p1_len]);

        let mut aa = vec![0.0; nq];
        let mut ax = vec![0.0; nq];
        let mut xx = vec![0.0; nq];
        for t1 in 0..ATOMIC_TYPES {
            for t2 in 0..ATOMIC_TYPES {
                let cell = partials.p3.slice(ndarray::s![t1, t2, ..p3_len]);
                let cell = cell.to_slice().expect("p3 bins are contiguous");
                fold_cell(&mut aa, cell, &p3_table, self.aa_table.profile(t1, t2));
                fold_cell(&mut ax, cell, &p3_table, self.cross_table.profile(t1, t2));
                fold_cell(&mut xx, cell, &p3_table, self.exv_table.profile(t1, t2));
            }
        }

        let oh = FormFactorType::OH.index();
        let mut aw = vec![0.0; nq];
        let mut wx = vec![0.0; nq];
        for t in 0..ATOMIC_TYPES {
            let cell = partials.p2.slice(ndarray::s![t, ..p2_len]);
            let cell = cell.to_slice().expect("p2 bins are contiguous");
            fold_cell(&mut aw, cell, &p2_table, self.aa_table.profile(t, oh));
            fold_cell(&mut wx, cell, &p2_table, self.cross_table.profile(oh, t));
        }

        let mut ww = vec![0.0; nq];
        fold_cell(
            &mut ww,
            &partials.p1[..p1_len],
            &p1_table,
            self.aa_table.profile(oh, oh),
        );

        PartialProfiles {
            q: self.q.clone(),
            aa,
            aw,
            ww,
            exv: Some(ExvProfiles { ax, xx, wx }),
        }
    }

    /// The per-partial intensity profiles, computed on first use.
    pub fn profiles(&mut self) -> &PartialProfiles {
        if self.profiles.is_none() {
            self.profiles = Some(self.compute_profiles());
        }
        self.profiles.as_ref().expect("just initialized")
    }
}

impl CompositeHistogram for CompositeDistanceHistogramFF {
    fn q_axis(&self) -> &[f64] {
        &self.q
    }

    fn intensity(&mut self, params: &FitParams) -> Vec<f64> {
        let key = param_key(params);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let exv_factor = self.exv_factor;
        let combined = self.profiles().combine(params, &exv_factor);
        self.cache.insert(key, combined.clone());
        combined
    }

    fn exv_scaling_limits(&self) -> (f64, f64) {
        self.exv_factor.limits()
    }

    fn has_excluded_volume(&self) -> bool {
        true
    }
}

/// Extended-axis type count of the grid composites: the atomic types plus a
/// fixed and a scalable excluded-volume slot.
pub const GRID_TYPES: usize = ATOMIC_TYPES + 2;

/// Table index of the fixed (interior) grid dummies.
pub const GRID_FIXED_SLOT: usize = ATOMIC_TYPES;

/// Table index of the scalable (surface) grid dummies.
pub const GRID_SCALED_SLOT: usize = ATOMIC_TYPES + 1;

#[derive(Clone, Debug)]
struct GridProfiles {
    q: Vec<f64>,
    aa: Vec<f64>,
    aw: Vec<f64>,
    ww: Vec<f64>,
    ax_fixed: Vec<f64>,
    ax_scaled: Vec<f64>,
    wx_fixed: Vec<f64>,
    wx_scaled: Vec<f64>,
    xx_ff: Vec<f64>,
    xx_fs: Vec<f64>,
    xx_ss: Vec<f64>,
}

impl GridProfiles {
    fn combine(&self, params: &FitParams) -> Vec<f64> {
        let cw = params.cw;
        let g = params.cx;
        self.q
            .iter()
            .enumerate()
            .map(|(k, &q)| {
                let da = debye_waller(q, params.cd);
                let dx = debye_waller(q, params.cx_dw);
                let atomic =
                    cw.mul_add(cw.mul_add(self.ww[k], 2.0 * self.aw[k]), self.aa[k]) * da * da;
                let ax = g.mul_add(self.ax_scaled[k], self.ax_fixed[k])
                    + cw * g.mul_add(self.wx_scaled[k], self.wx_fixed[k]);
                let xx = (g * g).mul_add(
                    self.xx_ss[k],
                    (2.0 * g).mul_add(self.xx_fs[k], self.xx_ff[k]),
                );
                atomic - 2.0 * da * dx * ax + dx * dx * xx
            })
            .collect()
    }
}

/// A composite histogram whose excluded volume is sampled on the molecular
/// grid. The dummies are real histogram entries on the two extended type
/// slots; `cx` scales the amplitude of the scalable slot (all dummies for
/// the plain grid manager, only the surface layer for the surface split).
#[derive(Clone, Debug)]
pub struct CompositeDistanceHistogramGrid {
    partials: TypedPartials,
    table: ProductTable,
    q: Vec<f64>,
    profiles: Option<GridProfiles>,
    cache: FxHashMap<[u64; 4], Vec<f64>>,
}

impl CompositeDistanceHistogramGrid {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if `table` does not span [`GRID_TYPES`] types.
    #[must_use]
    pub fn new(partials: TypedPartials, table: ProductTable, q_axis: Vec<f64>) -> Self {
        assert_eq!(table.types(), GRID_TYPES);
        Self {
            partials,
            table,
            q: q_axis,
            profiles: None,
            cache: FxHashMap::default(),
        }
    }

    /// The typed distance-space partials, dummies included.
    #[must_use]
    pub const fn partials(&self) -> &TypedPartials {
        &self.partials
    }

    /// The total distance distribution of the real scatterers, dummies
    /// excluded.
    #[must_use]
    pub fn total_histogram(&self) -> DistanceHistogram {
        let p3 = &self.partials.p3;
        let bins = p3.dim().2;
        let mut total = vec![0.0; bins];
        for t1 in 0..ATOMIC_TYPES {
            for t2 in 0..ATOMIC_TYPES {
                for (b, slot) in total.iter_mut().enumerate() {
                    *slot += p3[[t1, t2, b]];
                }
            }
        }
        for t in 0..ATOMIC_TYPES {
            for (b, slot) in total.iter_mut().enumerate() {
                if b < self.partials.p2.dim().1 {
                    *slot += 2.0 * self.partials.p2[[t, b]];
                }
            }
        }
        for (b, slot) in total.iter_mut().enumerate() {
            if b < self.partials.p1.len() {
                *slot += self.partials.p1[b];
            }
        }
        DistanceHistogram::new(total, self.partials.p3_centers.clone(), self.q.clone())
    }

    fn compute_profiles(&self) -> GridProfiles {
        let nq = self.q.len();
        let partials = &self.partials;

        let p3_len = trim3(&partials.p3);
        let p2_len = trim2(&partials.p2);
        let p1_len = partials
            .p1
            .iter()
            .rposition(|&v| v != 0.0)
            .map_or(0, |b| b + 1);

        let p3_table = DebyeTable::new(&self.q, &partials.p3_centers[..p3_len]);
        let p2_table = DebyeTable::new(&self.q, &partials.p2_centers[..p2_len]);
        let p1_table = DebyeTable::new(&self.q, &partials.p1_centers[..p1_len]);

        let mut profiles = GridProfiles {
            q: self.q.clone(),
            aa: vec![0.0; nq],
            aw: vec![0.0; nq],
            ww: vec![0.0; nq],
            ax_fixed: vec![0.0; nq],
            ax_scaled: vec![0.0; nq],
            wx_fixed: vec![0.0; nq],
            wx_scaled: vec![0.0; nq],
            xx_ff: vec![0.0; nq],
            xx_fs: vec![0.0; nq],
            xx_ss: vec![0.0; nq],
        };

        for t1 in 0..GRID_TYPES {
            for t2 in 0..GRID_TYPES {
                let cell = partials.p3.slice(ndarray::s![t1, t2, ..p3_len]);
                let cell = cell.to_slice().expect("p3 bins are contiguous");
                let weights = self.table.profile(t1, t2);
                let out = match (t1 >= ATOMIC_TYPES, t2 >= ATOMIC_TYPES) {
                    (false, false) => &mut profiles.aa,
                    (false, true) if t2 == GRID_FIXED_SLOT => &mut profiles.ax_fixed,
                    (false, true) => &mut profiles.ax_scaled,
                    (true, false) if t1 == GRID_FIXED_SLOT => &mut profiles.ax_fixed,
                    (true, false) => &mut profiles.ax_scaled,
                    (true, true) => match (t1, t2) {
                        (GRID_FIXED_SLOT, GRID_FIXED_SLOT) => &mut profiles.xx_ff,
                        (GRID_SCALED_SLOT, GRID_SCALED_SLOT) => &mut profiles.xx_ss,
                        // mixed fixed-scaled cells appear twice in the
                        // symmetric storage; each carries half of 2·xx_fs
                        _ => &mut profiles.xx_fs,
                    },
                };
                // the mixed xx cells must not be double counted
                if t1 >= ATOMIC_TYPES && t2 >= ATOMIC_TYPES && t1 != t2 {
                    let mut half = vec![0.0; nq];
                    fold_cell(&mut half, cell, &p3_table, weights);
                    for (slot, v) in out.iter_mut().zip(half) {
                        *slot += 0.5 * v;
                    }
                } else {
                    fold_cell(out, cell, &p3_table, weights);
                }
            }
        }

        let oh = FormFactorType::OH.index();
        for t in 0..GRID_TYPES {
            let cell = partials.p2.slice(ndarray::s![t, ..p2_len]);
            let cell = cell.to_slice().expect("p2 bins are contiguous");
            let weights = self.table.profile(oh, t);
            let out = match t {
                t if t < ATOMIC_TYPES => &mut profiles.aw,
                GRID_FIXED_SLOT => &mut profiles.wx_fixed,
                _ => &mut profiles.wx_scaled,
            };
            fold_cell(out, cell, &p2_table, weights);
        }

        fold_cell(
            &mut profiles.ww,
            &partials.p1[..p1_len],
            &p1_table,
            self.table.profile(oh, oh),
        );

        profiles
    }

    fn profiles(&mut self) -> &GridProfiles {
        if self.profiles.is_none() {
            self.profiles = Some(self.compute_profiles());
        }
        self.profiles.as_ref().expect("just initialized")
    }
}

impl CompositeHistogram for CompositeDistanceHistogramGrid {
    fn q_axis(&self) -> &[f64] {
        &self.q
    }

    fn intensity(&mut self, params: &FitParams) -> Vec<f64> {
        let key = param_key(params);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let combined = self.profiles().combine(params);
        self.cache.insert(key, combined.clone());
        combined
    }

    fn exv_scaling_limits(&self) -> (f64, f64) {
        (0.5, 1.5)
    }

    fn has_excluded_volume(&self) -> bool {
        true
    }
}

/// The composite histograms a builder can produce.
#[enum_dispatch(CompositeHistogram)]
#[derive(Clone, Debug)]
pub enum CompositeHistogramEnum {
    /// Scalar partials, unit form factors.
    Plain(CompositeDistanceHistogram),
    /// Typed partials with form-factor weighting.
    FormFactor(CompositeDistanceHistogramFF),
    /// Typed partials with grid-sampled excluded volume.
    Grid(CompositeDistanceHistogramGrid),
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn water_scaling_is_an_o_bins_remultiplication() {
        let aa = vec![10.0, 4.0, 0.0];
        let aw = vec![0.0, 2.0, 0.0];
        let ww = vec![1.0, 0.0, 0.0];
        let mut composite = CompositeDistanceHistogram::new(
            aa,
            aw,
            ww,
            None,
            vec![0.0, 0.125, 0.25],
            vec![1e-4, 0.1],
            ExvFactor::new(ExvFlavor::Plain, 20.0),
        );

        let total = composite.total();
        assert_approx_eq!(f64, total[0], 11.0);
        assert_approx_eq!(f64, total[1], 8.0);

        composite.apply_water_scaling_factor(2.0);
        let total = composite.total();
        assert_approx_eq!(f64, total[0], 14.0);
        assert_approx_eq!(f64, total[1], 12.0);

        composite.reset_scaling_factors();
        assert_approx_eq!(f64, composite.total()[0], 11.0);
    }

    #[test]
    fn exv_scaling_follows_the_quadratic_combination() {
        let aa = vec![10.0];
        let exv = ExvPartials {
            ax: vec![3.0],
            xx: vec![2.0],
            wx: vec![0.0],
        };
        let mut composite = CompositeDistanceHistogram::new(
            aa,
            vec![0.0],
            vec![0.0],
            Some(exv),
            vec![0.0],
            vec![0.1],
            ExvFactor::new(ExvFlavor::Plain, 20.0),
        );
        composite.apply_excluded_volume_scaling_factor(0.5);
        // 10 - 2·0.5·3 + 0.25·2
        assert_approx_eq!(f64, composite.total()[0], 7.5);
    }

    #[test]
    fn intensity_at_zero_q_is_the_squared_weight_sum() {
        // single partial: two atoms of weight 6 -> p[0] = 72, p[80] = 72
        let mut aa = vec![0.0; 100];
        aa[0] = 72.0;
        aa[80] = 72.0;
        let d: Vec<f64> = (0..100).map(|b| f64::from(b as u32) * 0.125).collect();
        let mut composite = CompositeDistanceHistogram::new(
            aa,
            vec![0.0; 100],
            vec![0.0; 100],
            None,
            d,
            vec![1e-6, 0.1],
            ExvFactor::new(ExvFlavor::Plain, 20.0),
        );
        let i = composite.intensity(&FitParams::default());
        assert_approx_eq!(f64, i[0], 144.0, epsilon = 1e-6);
    }

    #[test]
    fn exv_factor_is_unity_at_cx_one() {
        for flavor in [
            ExvFlavor::Plain,
            ExvFlavor::Crysol,
            ExvFlavor::FoXS,
            ExvFlavor::Pepsi,
        ] {
            let factor = ExvFactor::new(flavor, 18.0);
            for q in [1e-4, 0.1, 0.5] {
                assert_approx_eq!(f64, factor.evaluate(q, 1.0), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn crysol_limits_are_narrow() {
        let factor = ExvFactor::new(ExvFlavor::Crysol, 18.0);
        assert_eq!(factor.limits(), (0.92, 1.05));
        let factor = ExvFactor::new(ExvFlavor::FoXS, 18.0);
        assert_eq!(factor.limits(), (0.5, 1.5));
    }

    #[test]
    fn parameter_cache_returns_identical_vectors() {
        let mut composite = CompositeDistanceHistogram::new(
            vec![36.0],
            vec![0.0],
            vec![0.0],
            None,
            vec![0.0],
            vec![0.1, 0.2],
            ExvFactor::new(ExvFlavor::Plain, 20.0),
        );
        let params = FitParams {
            cw: 1.3,
            ..FitParams::default()
        };
        let first = composite.intensity(&params);
        let second = composite.intensity(&params);
        assert_eq!(first, second);
    }
}
