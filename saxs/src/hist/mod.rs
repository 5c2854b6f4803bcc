//! The distance-histogram pipeline: compact coordinates, the pair-evaluation
//! driver, the builder variants and the composite histograms they produce.

pub mod compact;
pub mod composite;
pub mod distribution;
mod driver;
pub mod exact;
pub mod ff;
pub mod ffgrid;
pub mod manager;
pub mod partial;
pub mod simple;

pub use composite::{
    CompositeDistanceHistogram, CompositeHistogram, CompositeHistogramEnum, DistanceHistogram,
    FitParams,
};
pub use manager::{HistogramManager, HistogramManagerEnum};

use crate::data::Molecule;
use crate::form_factor::ATOMIC_TYPES;

/// The average displaced volume per atom of a molecule, symmetry copies
/// included.
pub(crate) fn average_displaced_volume(
    molecule: &Molecule,
    volumes: &[f64; ATOMIC_TYPES],
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for body in molecule.bodies() {
        body.for_each_expanded(|_, _, t| {
            sum += volumes[t.index()];
            count += 1;
        });
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
