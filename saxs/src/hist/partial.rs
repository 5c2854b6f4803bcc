//! The partial-histogram cache.
//!
//! During rigid-body refinement only one or a few bodies move per step.
//! This manager keeps one distance distribution per body (self terms), per
//! unordered body pair and per body-water pair, consumes the molecule's
//! modification flags on every call, and recomputes only the partials that
//! touch a modified body. Internal distances are rigid under translations
//! and rotations, so an externally modified body keeps its self terms.
//!
//! The average excluded-volume channels (ax, xx, wx) are carried in the same
//! kernel pass: the dummy of an atom sits at the atom's position with a
//! constant charge `c`, so a pair `(i, j)` contributes `c·(wᵢ + wⱼ)` to ax
//! and `2c²` to xx.

use super::compact::CompactCoordinates;
use super::composite::{
    CompositeDistanceHistogram, CompositeHistogramEnum, DistanceHistogram, ExvFactor, ExvPartials,
};
use super::distribution::Distribution1D;
use super::driver::{accumulate_cross, accumulate_self, PairSink, ScalarSink};
use super::manager::HistogramManager;
use crate::checkpoint::Checkpoint;
use crate::config::{EngineConfig, SOLVENT_DENSITY};
use crate::data::Molecule;
use crate::error::{Error, Result};
use crate::form_factor::displaced_volumes;
use itertools::Itertools;
use log::{debug, warn};
use std::io::{Read, Write};

fn pair_count(n: usize) -> usize {
    n * (n.saturating_sub(1)) / 2
}

fn pair_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Which partials the last [`PartialHistogramManager::calculate_all`] call
/// reused and which it recomputed.
#[derive(Clone, Debug, Default)]
pub struct CacheReport {
    bodies: usize,
    self_recomputed: Vec<bool>,
    pair_recomputed: Vec<bool>,
    water_recomputed: Vec<bool>,
    ww_recomputed: bool,
}

impl CacheReport {
    fn all_misses(bodies: usize) -> Self {
        Self {
            bodies,
            self_recomputed: vec![true; bodies],
            pair_recomputed: vec![true; pair_count(bodies)],
            water_recomputed: vec![true; bodies],
            ww_recomputed: true,
        }
    }

    fn all_hits(bodies: usize) -> Self {
        Self {
            bodies,
            self_recomputed: vec![false; bodies],
            pair_recomputed: vec![false; pair_count(bodies)],
            water_recomputed: vec![false; bodies],
            ww_recomputed: false,
        }
    }

    /// Whether the self partial of body `i` was reused.
    #[must_use]
    pub fn self_hit(&self, i: usize) -> bool {
        !self.self_recomputed[i]
    }

    /// Whether the cross partial of bodies `i` and `j` was reused.
    ///
    /// # Panics
    ///
    /// Panics if `i == j` or either index is out of range.
    #[must_use]
    pub fn pair_hit(&self, i: usize, j: usize) -> bool {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        !self.pair_recomputed[pair_index(i, j, self.bodies)]
    }

    /// Whether the body-water partial of body `i` was reused.
    #[must_use]
    pub fn water_hit(&self, i: usize) -> bool {
        !self.water_recomputed[i]
    }

    /// Whether the water-water partial was reused.
    #[must_use]
    pub const fn ww_hit(&self) -> bool {
        !self.ww_recomputed
    }
}

/// Sink carrying the atom-atom channel and the two implicit average
/// excluded-volume channels.
struct AvgExvSink {
    aa: Distribution1D,
    ax: Distribution1D,
    xx: Distribution1D,
    charge: f64,
}

impl AvgExvSink {
    fn new(bins: usize, width: f64, charge: f64) -> Self {
        Self {
            aa: Distribution1D::new(bins, width),
            ax: Distribution1D::new(bins, width),
            xx: Distribution1D::new(bins, width),
            charge,
        }
    }
}

impl PairSink for AvgExvSink {
    #[inline]
    fn add(&mut self, _ti: u8, _tj: u8, distance: f32, wij: f32, wi: f32, wj: f32) {
        self.aa.add(distance, 2.0 * f64::from(wij));
        self.ax
            .add(distance, self.charge * (f64::from(wi) + f64::from(wj)));
        self.xx.add(distance, 2.0 * self.charge * self.charge);
    }

    fn merge(&mut self, other: Self) {
        self.aa.merge(&other.aa);
        self.ax.merge(&other.ax);
        self.xx.merge(&other.xx);
    }
}

/// Sink for body-water runs: the aw channel plus the dummy-water channel.
struct WaterCrossSink {
    aw: Distribution1D,
    wx: Distribution1D,
    charge: f64,
}

impl WaterCrossSink {
    fn new(bins: usize, width: f64, charge: f64) -> Self {
        Self {
            aw: Distribution1D::new(bins, width),
            wx: Distribution1D::new(bins, width),
            charge,
        }
    }
}

impl PairSink for WaterCrossSink {
    #[inline]
    fn add(&mut self, _ti: u8, _tj: u8, distance: f32, wij: f32, _wi: f32, wj: f32) {
        self.aw.add(distance, f64::from(wij));
        self.wx.add(distance, self.charge * f64::from(wj));
    }

    fn merge(&mut self, other: Self) {
        self.aw.merge(&other.aw);
        self.wx.merge(&other.wx);
    }
}

struct BodyPartial {
    aa: Distribution1D,
    ax: Distribution1D,
    xx: Distribution1D,
}

struct WaterPartial {
    aw: Distribution1D,
    wx: Distribution1D,
}

/// The state-tracking distance calculator.
pub struct PartialHistogramManager {
    config: EngineConfig,
    charge: f64,
    average_volume: f64,
    coords: Vec<CompactCoordinates>,
    waters: CompactCoordinates,
    selfs: Vec<BodyPartial>,
    pairs: Vec<BodyPartial>,
    water_cross: Vec<WaterPartial>,
    ww: Distribution1D,
    bodies: usize,
    initialized: bool,
    report: CacheReport,
    restored: Option<Checkpoint>,
}

impl PartialHistogramManager {
    /// Constructor.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            charge: 0.0,
            average_volume: 0.0,
            coords: Vec::new(),
            waters: CompactCoordinates::default(),
            selfs: Vec::new(),
            pairs: Vec::new(),
            water_cross: Vec::new(),
            ww: Distribution1D::new(config.distance_bins, config.bin_width),
            bodies: 0,
            initialized: false,
            report: CacheReport::default(),
            restored: None,
        }
    }

    /// The hit/miss map of the last `calculate_all` call.
    #[must_use]
    pub const fn last_report(&self) -> &CacheReport {
        &self.report
    }

    fn compute_self(&self, coords: &CompactCoordinates) -> BodyPartial {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;
        let mut sink =
            accumulate_self(coords, || AvgExvSink::new(bins, width, self.charge));
        sink.aa.add(0.0, coords.sum_squared_weights());
        sink.ax.add(0.0, self.charge * coords.sum_weights());
        sink.xx
            .add(0.0, self.charge * self.charge * coords.len() as f64);
        BodyPartial {
            aa: sink.aa,
            ax: sink.ax,
            xx: sink.xx,
        }
    }

    fn compute_pair(&self, a: &CompactCoordinates, b: &CompactCoordinates) -> BodyPartial {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;
        let sink = accumulate_cross(a, b, || AvgExvSink::new(bins, width, self.charge));
        BodyPartial {
            aa: sink.aa,
            ax: sink.ax,
            xx: sink.xx,
        }
    }

    fn compute_water_cross(&self, coords: &CompactCoordinates) -> WaterPartial {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;
        if self.waters.is_empty() || coords.is_empty() {
            return WaterPartial {
                aw: Distribution1D::new(bins, width),
                wx: Distribution1D::new(bins, width),
            };
        }
        let sink = accumulate_cross(coords, &self.waters, || {
            WaterCrossSink::new(bins, width, self.charge)
        });
        WaterPartial {
            aw: sink.aw,
            wx: sink.wx,
        }
    }

    fn compute_ww(&self) -> Distribution1D {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;
        if self.waters.is_empty() {
            return Distribution1D::new(bins, width);
        }
        let mut sink = accumulate_self(&self.waters, || ScalarSink::<f64>::doubled(bins, width));
        sink.p.add(0.0, self.waters.sum_squared_weights());
        sink.p
    }

    fn full_rebuild(&mut self, molecule: &Molecule) -> Result<()> {
        // fixed at the first build; every cached partial depends on it
        if self.charge == 0.0 {
            let volumes = displaced_volumes(self.config.exv_model)?;
            self.average_volume = super::average_displaced_volume(molecule, &volumes);
            self.charge = self.average_volume * SOLVENT_DENSITY;
        }
        let n = molecule.body_count();

        self.coords = molecule
            .bodies()
            .iter()
            .map(CompactCoordinates::from_body)
            .collect();
        self.waters = CompactCoordinates::from_waters(molecule.hydration());

        self.selfs = self.coords.iter().map(|c| self.compute_self(c)).collect();
        self.pairs = (0..n)
            .tuple_combinations()
            .map(|(i, j)| self.compute_pair(&self.coords[i], &self.coords[j]))
            .collect();
        self.water_cross = self
            .coords
            .iter()
            .map(|c| self.compute_water_cross(c))
            .collect();
        self.ww = self.compute_ww();

        self.bodies = n;
        self.initialized = true;
        self.report = CacheReport::all_misses(n);
        Ok(())
    }

    fn incremental(&mut self, molecule: &Molecule) {
        let n = self.bodies;
        let state = molecule.state();
        let mut report = CacheReport::all_hits(n);

        // symmetry modifications change the cross-copy distances inside a
        // body, so they invalidate the self terms like an internal change
        let internal: Vec<bool> = (0..n)
            .map(|i| state.is_internally_modified(i) || state.is_symmetry_modified(i))
            .collect();
        let external: Vec<bool> = (0..n)
            .map(|i| state.is_externally_modified(i) || internal[i])
            .collect();
        let hydration = state.is_hydration_modified();

        for i in 0..n {
            if external[i] {
                self.coords[i] = CompactCoordinates::from_body(molecule.body(i));
            }
            if internal[i] {
                self.selfs[i] = self.compute_self(&self.coords[i]);
                report.self_recomputed[i] = true;
            }
        }

        for i in 0..n {
            for j in i + 1..n {
                if external[i] || external[j] {
                    let idx = pair_index(i, j, n);
                    self.pairs[idx] = self.compute_pair(&self.coords[i], &self.coords[j]);
                    report.pair_recomputed[idx] = true;
                }
            }
        }

        if hydration {
            self.waters = CompactCoordinates::from_waters(molecule.hydration());
            self.ww = self.compute_ww();
            report.ww_recomputed = true;
            for i in 0..n {
                self.water_cross[i] = self.compute_water_cross(&self.coords[i]);
                report.water_recomputed[i] = true;
            }
        } else {
            for i in 0..n {
                if external[i] {
                    self.water_cross[i] = self.compute_water_cross(&self.coords[i]);
                    report.water_recomputed[i] = true;
                }
            }
        }

        self.report = report;
    }

    fn assemble(&self) -> [Vec<f64>; 6] {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;
        let mut aa = Distribution1D::new(bins, width);
        let mut ax = Distribution1D::new(bins, width);
        let mut xx = Distribution1D::new(bins, width);
        for partial in self.selfs.iter().chain(&self.pairs) {
            aa.merge(&partial.aa);
            ax.merge(&partial.ax);
            xx.merge(&partial.xx);
        }
        let mut aw = Distribution1D::new(bins, width);
        let mut wx = Distribution1D::new(bins, width);
        for partial in &self.water_cross {
            aw.merge(&partial.aw);
            wx.merge(&partial.wx);
        }
        [
            aa.values(),
            aw.values(),
            self.ww.values(),
            ax.values(),
            xx.values(),
            wx.values(),
        ]
    }

    fn composite_from(&self, partials: [Vec<f64>; 6]) -> CompositeDistanceHistogram {
        let [aa, aw, ww, ax, xx, wx] = partials;
        CompositeDistanceHistogram::new(
            aa,
            aw,
            ww,
            Some(ExvPartials { ax, xx, wx }),
            self.config.d_axis(),
            self.config.q_axis(),
            ExvFactor::new(self.config.exv_flavor, self.average_volume),
        )
    }

    /// Serializes the six aggregate partials of the current cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] before the first `calculate_all`, or
    /// [`Error::Io`] if the writer fails.
    pub fn save_checkpoint(&self, writer: impl Write) -> Result<()> {
        if !self.initialized {
            return Err(Error::State(
                "cannot checkpoint a cache that has not calculated yet".to_owned(),
            ));
        }
        Checkpoint::new(self.bodies as u32, self.assemble()).write(writer)
    }

    /// Tries to adopt a checkpoint. A corrupt or incompatible file is
    /// discarded with a warning; this is never fatal.
    ///
    /// Returns whether the checkpoint was accepted. An accepted checkpoint
    /// serves the next `calculate_all` on an unmodified molecule without
    /// re-running the pair evaluations.
    pub fn load_checkpoint(&mut self, reader: impl Read) -> bool {
        match Checkpoint::read(reader) {
            Ok(checkpoint) if checkpoint.bins as usize == self.config.distance_bins => {
                self.restored = Some(checkpoint);
                true
            }
            Ok(checkpoint) => {
                warn!(
                    "discarding checkpoint with {} bins, engine uses {}",
                    checkpoint.bins, self.config.distance_bins
                );
                false
            }
            Err(err) => {
                warn!("discarding corrupt checkpoint: {err}");
                false
            }
        }
    }

    /// Recomputes everything from scratch and diffs against the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Numerical`] if any aggregate bin deviates by more
    /// than one part in 10⁹, or [`Error::State`] before the first build.
    pub fn verify_against_scratch(&self, molecule: &Molecule) -> Result<()> {
        if !self.initialized {
            return Err(Error::State(
                "cannot verify a cache that has not calculated yet".to_owned(),
            ));
        }
        let mut fresh = Self::new(&self.config);
        fresh.charge = self.charge;
        fresh.average_volume = self.average_volume;
        fresh.full_rebuild(molecule)?;

        let cached = self.assemble();
        let scratch = fresh.assemble();
        for (category, (lhs, rhs)) in cached.iter().zip(&scratch).enumerate() {
            for (bin, (&a, &b)) in lhs.iter().zip(rhs).enumerate() {
                let tolerance = 1e-9 * a.abs().max(b.abs()).max(1.0);
                if (a - b).abs() > tolerance {
                    return Err(Error::Numerical(format!(
                        "cache deviates from scratch in category {category}, bin {bin}: {a} vs {b}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl HistogramManager for PartialHistogramManager {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        match self.calculate_all(molecule)? {
            CompositeHistogramEnum::Plain(composite) => Ok(composite.total_histogram()),
            _ => unreachable!("the partial manager produces plain composites"),
        }
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeHistogramEnum> {
        self.config.validate()?;

        if let Some(checkpoint) = self.restored.take() {
            if !self.initialized && checkpoint.bodies as usize == molecule.body_count() {
                debug!("serving calculate_all from a restored checkpoint");
                let volumes = displaced_volumes(self.config.exv_model)?;
                self.average_volume = super::average_displaced_volume(molecule, &volumes);
                self.charge = self.average_volume * SOLVENT_DENSITY;
                molecule.state_mut().reset();
                return Ok(CompositeHistogramEnum::Plain(
                    self.composite_from(checkpoint.partials),
                ));
            }
            warn!(
                "discarding checkpoint for {} bodies, molecule has {}",
                checkpoint.bodies,
                molecule.body_count()
            );
        }

        if self.initialized && self.bodies == molecule.body_count() {
            self.incremental(molecule);
        } else {
            self.full_rebuild(molecule)?;
        }
        molecule.state_mut().reset();

        Ok(CompositeHistogramEnum::Plain(
            self.composite_from(self.assemble()),
        ))
    }
}
