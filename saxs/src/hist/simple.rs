//! The plain histogram builder.
//!
//! Emits type-blind aa/aw/ww distributions weighted by `wᵢ·wⱼ`. The excluded
//! volume is at most approximated by subtracting the average displaced charge
//! from each atom before building (the effective-charge model); there are no
//! explicit excluded-volume partials on this path.

use super::compact::CompactCoordinates;
use super::composite::{
    CompositeDistanceHistogram, CompositeHistogramEnum, DistanceHistogram, ExvFactor,
};
use super::distribution::{BinEntry, WeightedEntry};
use super::driver::{accumulate_cross, accumulate_self, ScalarSink};
use super::manager::HistogramManager;
use crate::config::{EngineConfig, SOLVENT_DENSITY};
use crate::data::Molecule;
use crate::error::Result;
use crate::form_factor::displaced_volumes;
use log::debug;

/// A distance calculator without form-factor awareness.
#[derive(Clone, Debug)]
pub struct SimpleHistogramManager {
    config: EngineConfig,
    effective_charge: bool,
}

impl SimpleHistogramManager {
    /// Constructor. The effective-charge excluded-volume model starts
    /// disabled; the raw scattering weights enter the histograms unchanged.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            effective_charge: false,
        }
    }

    /// Enables the effective-charge model: the molecule-average displaced
    /// charge is subtracted from every atom's weight before building.
    #[must_use]
    pub const fn with_effective_charge(mut self, enabled: bool) -> Self {
        self.effective_charge = enabled;
        self
    }

    fn atom_coordinates(&self, molecule: &Molecule) -> Result<CompactCoordinates> {
        if !self.effective_charge {
            return Ok(CompactCoordinates::from_bodies(molecule.bodies()));
        }
        // single molecule-wide average; the grouped carbons displace more
        // charge than they carry, so a per-type subtraction would flip
        // their weights negative
        let volumes = displaced_volumes(self.config.exv_model)?;
        let displaced = super::average_displaced_volume(molecule, &volumes) * SOLVENT_DENSITY;
        let mut entries = Vec::with_capacity(molecule.atom_count());
        for body in molecule.bodies() {
            body.for_each_expanded(|position, weight, t| {
                entries.push((position, weight - displaced, t));
            });
        }
        Ok(CompactCoordinates::from_entries(entries))
    }

    fn build<E: BinEntry>(&self, molecule: &Molecule) -> Result<CompositeDistanceHistogram> {
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;

        let atoms = self.atom_coordinates(molecule)?;
        let waters = CompactCoordinates::from_waters(molecule.hydration());
        debug!(
            "building plain histogram: {} atoms, {} waters",
            atoms.len(),
            waters.len()
        );

        let mut aa = accumulate_self(&atoms, || ScalarSink::<E>::doubled(bins, width));
        aa.p.add(0.0, atoms.sum_squared_weights());

        let aw = if waters.is_empty() {
            ScalarSink::<E>::single(bins, width)
        } else {
            accumulate_cross(&atoms, &waters, || ScalarSink::<E>::single(bins, width))
        };

        let mut ww = if waters.is_empty() {
            ScalarSink::<E>::doubled(bins, width)
        } else {
            accumulate_self(&waters, || ScalarSink::<E>::doubled(bins, width))
        };
        if !waters.is_empty() {
            ww.p.add(0.0, waters.sum_squared_weights());
        }

        // one shared d-axis: the aggregated centers of all three partials
        let mut merged = aa.p.clone();
        merged.merge(&aw.p);
        merged.merge(&ww.p);

        let volumes = displaced_volumes(self.config.exv_model)?;
        let average_volume = super::average_displaced_volume(molecule, &volumes);

        Ok(CompositeDistanceHistogram::new(
            aa.p.values(),
            aw.p.values(),
            ww.p.values(),
            None,
            merged.centers(),
            self.config.q_axis(),
            ExvFactor::new(self.config.exv_flavor, average_volume),
        ))
    }

    fn build_composite(&self, molecule: &Molecule) -> Result<CompositeDistanceHistogram> {
        self.config.validate()?;
        if self.config.weighted_bins {
            self.build::<WeightedEntry>(molecule)
        } else {
            self.build::<f64>(molecule)
        }
    }
}

impl HistogramManager for SimpleHistogramManager {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        Ok(self.build_composite(molecule)?.total_histogram())
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeHistogramEnum> {
        Ok(CompositeHistogramEnum::Plain(
            self.build_composite(molecule)?,
        ))
    }
}
