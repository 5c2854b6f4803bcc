//! The form-factor aware histogram builders.
//!
//! One driver run resolves the atom-atom distribution over both type axes;
//! the excluded-volume categories reuse the same distribution through
//! different product tables, since every atom hosts its own dummy at the same
//! position. The average and the explicit conventions differ only in the
//! displaced volumes entering those tables.

use super::compact::CompactCoordinates;
use super::composite::{
    CompositeDistanceHistogramFF, CompositeHistogramEnum, DistanceHistogram, ExvFactor,
    TypedPartials,
};
use super::distribution::{BinEntry, Distribution2D, Distribution3D, WeightedEntry};
use super::driver::{accumulate_cross, accumulate_self, PairSink, ScalarSink};
use super::manager::HistogramManager;
use crate::config::{EngineConfig, SOLVENT_DENSITY};
use crate::data::Molecule;
use crate::error::Result;
use crate::form_factor::{displaced_volumes, ProductTable, ATOMIC_TYPES};
use log::debug;

/// A sink resolving self pairs over both type axes.
pub(crate) struct TypedSelfSink<E: BinEntry> {
    pub(crate) p3: Distribution3D<E>,
}

impl<E: BinEntry> TypedSelfSink<E> {
    pub(crate) fn new(types: usize, bins: usize, bin_width: f64) -> Self {
        Self {
            p3: Distribution3D::new(types, bins, bin_width),
        }
    }
}

impl<E: BinEntry> PairSink for TypedSelfSink<E> {
    #[inline]
    fn add(&mut self, ti: u8, tj: u8, distance: f32, wij: f32, _wi: f32, _wj: f32) {
        self.p3
            .add_symmetric(ti as usize, tj as usize, distance, f64::from(wij));
    }

    fn merge(&mut self, other: Self) {
        self.p3.merge(&other.p3);
    }
}

/// A sink resolving cross combinations over the type of the first set.
pub(crate) struct TypedCrossSink<E: BinEntry> {
    pub(crate) p2: Distribution2D<E>,
}

impl<E: BinEntry> TypedCrossSink<E> {
    pub(crate) fn new(types: usize, bins: usize, bin_width: f64) -> Self {
        Self {
            p2: Distribution2D::new(types, bins, bin_width),
        }
    }
}

impl<E: BinEntry> PairSink for TypedCrossSink<E> {
    #[inline]
    fn add(&mut self, ti: u8, _tj: u8, distance: f32, wij: f32, _wi: f32, _wj: f32) {
        self.p2.add(ti as usize, distance, f64::from(wij));
    }

    fn merge(&mut self, other: Self) {
        self.p2.merge(&other.p2);
    }
}

/// Builds the typed partials shared by the form-factor aware managers.
pub(crate) fn build_typed_partials<E: BinEntry>(
    atoms: &CompactCoordinates,
    waters: &CompactCoordinates,
    types: usize,
    bins: usize,
    width: f64,
) -> TypedPartials {
    let mut p3 = accumulate_self(atoms, || TypedSelfSink::<E>::new(types, bins, width));
    for (t, sq) in atoms.squared_weights_by_type(types).iter().enumerate() {
        if *sq != 0.0 {
            p3.p3.add_self(t, *sq);
        }
    }

    let p2 = if waters.is_empty() {
        TypedCrossSink::<E>::new(types, bins, width)
    } else {
        accumulate_cross(atoms, waters, || TypedCrossSink::<E>::new(types, bins, width))
    };

    let mut p1 = if waters.is_empty() {
        ScalarSink::<E>::doubled(bins, width)
    } else {
        accumulate_self(waters, || ScalarSink::<E>::doubled(bins, width))
    };
    if !waters.is_empty() {
        p1.p.add(0.0, waters.sum_squared_weights());
    }

    TypedPartials {
        p3: p3.p3.values_array(),
        p3_centers: p3.p3.centers(),
        p2: p2.p2.values_array(),
        p2_centers: p2.p2.centers(),
        p1: p1.p.values(),
        p1_centers: p1.p.centers(),
    }
}

/// Which excluded-volume convention a form-factor manager uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExvResolution {
    /// One average dummy volume for all atoms.
    Average,
    /// Per-type dummy volumes.
    Explicit,
}

/// A histogram builder with per-type form factors.
#[derive(Clone, Debug)]
pub struct FFHistogramManager {
    config: EngineConfig,
    resolution: ExvResolution,
}

impl FFHistogramManager {
    /// Constructor.
    #[must_use]
    pub fn new(config: &EngineConfig, resolution: ExvResolution) -> Self {
        Self {
            config: config.clone(),
            resolution,
        }
    }

    fn build(&self, molecule: &Molecule) -> Result<CompositeDistanceHistogramFF> {
        self.config.validate()?;
        let bins = self.config.distance_bins;
        let width = self.config.bin_width;

        let atoms = CompactCoordinates::from_bodies(molecule.bodies());
        let waters = CompactCoordinates::from_waters(molecule.hydration());
        debug!(
            "building {:?} form-factor histogram: {} atoms, {} waters",
            self.resolution,
            atoms.len(),
            waters.len()
        );

        let partials = if self.config.weighted_bins {
            build_typed_partials::<WeightedEntry>(&atoms, &waters, ATOMIC_TYPES, bins, width)
        } else {
            build_typed_partials::<f64>(&atoms, &waters, ATOMIC_TYPES, bins, width)
        };

        let volumes = displaced_volumes(self.config.exv_model)?;
        let average = super::average_displaced_volume(molecule, &volumes);
        let table_volumes = match self.resolution {
            ExvResolution::Average => [average; ATOMIC_TYPES],
            ExvResolution::Explicit => volumes,
        };

        let q_axis = self.config.q_axis();
        Ok(CompositeDistanceHistogramFF::new(
            partials,
            ProductTable::atomic(&q_axis),
            ProductTable::cross(&q_axis, &table_volumes, SOLVENT_DENSITY),
            ProductTable::exv(&q_axis, &table_volumes, SOLVENT_DENSITY),
            q_axis,
            ExvFactor::new(self.config.exv_flavor, average),
        ))
    }
}

impl HistogramManager for FFHistogramManager {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        Ok(self.build(molecule)?.total_histogram())
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeHistogramEnum> {
        Ok(CompositeHistogramEnum::FormFactor(self.build(molecule)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::{Atom, Body};
    use crate::form_factor::{form_factor, FormFactorType};
    use crate::hist::composite::{CompositeHistogram, FitParams};
    use float_cmp::assert_approx_eq;
    use lin_alg::f64::Vec3;

    fn manager() -> FFHistogramManager {
        FFHistogramManager::new(&EngineConfig::default(), ExvResolution::Average)
    }

    #[test]
    fn single_carbon_profile_is_the_squared_form_factor() {
        let mut molecule = Molecule::new(vec![Body::new(
            0,
            vec![Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C)],
        )])
        .unwrap();

        let mut composite = manager().build(&mut molecule).unwrap();
        let profiles = composite.profiles().clone();
        let q = composite.q_axis().to_vec();

        let ff = form_factor(FormFactorType::C);
        for (k, &qk) in q.iter().enumerate() {
            let expected = 36.0 * ff.evaluate(qk).powi(2);
            assert!(
                (profiles.aa[k] - expected).abs() <= 1e-8 * expected.abs().max(1.0),
                "q = {qk}: {} vs {expected}",
                profiles.aa[k]
            );
        }
    }

    #[test]
    fn intensity_at_zero_angle_is_the_squared_total_weight() {
        let mut molecule = Molecule::new(vec![Body::new(
            0,
            vec![
                Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C),
                Atom::new(Vec3::new(10.0, 0.0, 0.0), 6.0, FormFactorType::C),
            ],
        )])
        .unwrap();

        let mut composite = manager().build(&mut molecule).unwrap();
        // form factors and sinc are both ~1 at the smallest q
        let profiles = composite.profiles();
        assert_approx_eq!(f64, profiles.aa[0], 144.0, epsilon = 1e-3);
    }

    #[test]
    fn typed_bin_zero_mass_is_resolved_per_type() {
        let mut molecule = Molecule::new(vec![Body::new(
            0,
            vec![
                Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C),
                Atom::new(Vec3::new(4.0, 0.0, 0.0), 8.0, FormFactorType::O),
            ],
        )])
        .unwrap();

        let composite = manager().build(&mut molecule).unwrap();
        let c = FormFactorType::C.index();
        let o = FormFactorType::O.index();
        assert_approx_eq!(f64, composite.partials().p3[[c, c, 0]], 36.0, epsilon = 1e-9);
        assert_approx_eq!(f64, composite.partials().p3[[o, o, 0]], 64.0, epsilon = 1e-9);
        // the cross pair lands symmetrically at 4 Å = bin 32
        assert_approx_eq!(f64, composite.partials().p3[[c, o, 32]], 48.0, epsilon = 1e-6);
        assert_approx_eq!(f64, composite.partials().p3[[o, c, 32]], 48.0, epsilon = 1e-6);
    }

    #[test]
    fn explicit_and_average_agree_at_cx_one_for_a_single_type() {
        // with only carbons present, the average volume equals the carbon
        // volume and the two conventions coincide
        let atoms: Vec<_> = (0..5)
            .map(|i| Atom::new(Vec3::new(f64::from(i) * 2.0, 0.0, 0.0), 6.0, FormFactorType::C))
            .collect();
        let mut molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();

        let mut avg = manager().build(&mut molecule).unwrap();
        let mut explicit =
            FFHistogramManager::new(&EngineConfig::default(), ExvResolution::Explicit)
                .build(&mut molecule)
                .unwrap();

        let params = FitParams::default();
        let ia = avg.intensity(&params);
        let ie = explicit.intensity(&params);
        for (a, e) in ia.iter().zip(&ie) {
            assert_approx_eq!(f64, *a, *e, epsilon = 1e-9);
        }
    }
}
