//! The grid-based excluded-volume builders.
//!
//! The dummies are not co-located with the atoms here: they sample the
//! molecular grid, so they enter the histograms as real entries on two
//! extended type slots. Their lattice regularity is exactly the aliasing
//! hazard that makes weighted bins mandatory on this path.

use super::compact::CompactCoordinates;
use super::composite::{
    CompositeDistanceHistogramGrid, CompositeHistogramEnum, DistanceHistogram, GRID_FIXED_SLOT,
    GRID_SCALED_SLOT, GRID_TYPES,
};
use super::distribution::WeightedEntry;
use super::ff::build_typed_partials;
use super::manager::HistogramManager;
use crate::config::{EngineConfig, SOLVENT_DENSITY};
use crate::data::Molecule;
use crate::error::{Error, Result};
use crate::form_factor::ProductTable;
use crate::grid::{MolecularGrid, DEFAULT_GRID_WIDTH};
use log::debug;

/// A histogram builder whose excluded volume is sampled on the molecular
/// grid.
#[derive(Clone, Debug)]
pub struct GridHistogramManager {
    config: EngineConfig,
    surface_split: bool,
}

impl GridHistogramManager {
    /// Constructor. With `surface_split`, the dummies are separated into a
    /// fixed interior and a scalable surface layer; otherwise the whole
    /// excluded volume scales with `cx`.
    #[must_use]
    pub fn new(config: &EngineConfig, surface_split: bool) -> Self {
        Self {
            config: config.clone(),
            surface_split,
        }
    }

    fn build(&self, molecule: &Molecule) -> Result<CompositeDistanceHistogramGrid> {
        self.config.validate()?;
        if !self.config.weighted_bins {
            return Err(Error::Config(
                "the grid-sampled excluded volume requires weighted_bins = true".to_owned(),
            ));
        }
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;

        let grid = MolecularGrid::new(molecule, DEFAULT_GRID_WIDTH)?;
        let exv = grid.excluded_volume();
        let dummy_charge = grid.cell_volume() * SOLVENT_DENSITY;
        debug!(
            "grid excluded volume: {} interior, {} surface dummies",
            exv.interior.len(),
            exv.surface.len()
        );

        let mut entries = Vec::with_capacity(molecule.atom_count() + exv.len());
        for body in molecule.bodies() {
            body.for_each_expanded(|position, weight, t| {
                entries.push((position, weight, t.index() as u8));
            });
        }
        let (interior_slot, surface_slot) = if self.surface_split {
            (GRID_FIXED_SLOT, GRID_SCALED_SLOT)
        } else {
            // without the split the whole excluded volume is scalable
            (GRID_SCALED_SLOT, GRID_SCALED_SLOT)
        };
        entries.extend(
            exv.interior
                .iter()
                .map(|&p| (p, dummy_charge, interior_slot as u8)),
        );
        entries.extend(
            exv.surface
                .iter()
                .map(|&p| (p, dummy_charge, surface_slot as u8)),
        );

        let coords = CompactCoordinates::from_indexed_entries(entries);
        let waters = CompactCoordinates::from_waters(molecule.hydration());

        let partials =
            build_typed_partials::<WeightedEntry>(&coords, &waters, GRID_TYPES, bins, width);

        let q_axis = self.config.q_axis();
        let table = ProductTable::with_grid_exv(&q_axis, grid.cell_volume(), 2);
        Ok(CompositeDistanceHistogramGrid::new(partials, table, q_axis))
    }
}

impl HistogramManager for GridHistogramManager {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        Ok(self.build(molecule)?.total_histogram())
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeHistogramEnum> {
        Ok(CompositeHistogramEnum::Grid(self.build(molecule)?))
    }
}
