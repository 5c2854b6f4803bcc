//! Hydration-shell generation.
//!
//! All strategies are grid-based: candidate waters are placed around the
//! molecule, rejected when they collide with the molecular volume or an
//! already placed water, and thinned by a deterministic counter culling.

use arrayvec::ArrayVec;

use crate::config::HydrationStrategy;
use crate::data::{Molecule, Water};
use crate::error::Result;
use crate::form_factor::vdw_radius;
use crate::grid::{MolecularGrid, DEFAULT_GRID_WIDTH};
use lin_alg::f64::Vec3;
use log::debug;
use rustc_hash::FxHashSet;

/// Effective radius of a water molecule in Å.
const WATER_RADIUS: f64 = 1.5;

/// Upper bound on the shell size: one water per atom.
const WATERS_PER_ATOM: usize = 1;

fn axes() -> [Vec3; 6] {
    [
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, -1.0),
    ]
}

fn radial_directions() -> ArrayVec<Vec3, 14> {
    let mut directions: ArrayVec<Vec3, 14> = axes().into_iter().collect();
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let v = Vec3::new(sx, sy, sz);
                directions.push(v * (1.0 / v.magnitude()));
            }
        }
    }
    directions
}

struct Placer<'a> {
    grid: &'a MolecularGrid,
    taken: FxHashSet<[usize; 3]>,
    waters: Vec<Water>,
}

impl Placer<'_> {
    fn try_place(&mut self, candidate: Vec3) {
        let Some(cell) = self.grid.locate(candidate) else {
            return;
        };
        if self.grid.is_occupied_at(candidate) || self.taken.contains(&cell) {
            return;
        }
        self.taken.insert(cell);
        self.waters.push(Water::new(candidate));
    }
}

fn axes_candidates(molecule: &Molecule, placer: &mut Placer<'_>) {
    for body in molecule.bodies() {
        body.for_each_expanded(|position, _, t| {
            let r = vdw_radius(t) + WATER_RADIUS;
            for axis in axes() {
                placer.try_place(position + axis * r);
            }
        });
    }
}

fn radial_candidates(molecule: &Molecule, placer: &mut Placer<'_>) {
    let directions = radial_directions();
    for body in molecule.bodies() {
        body.for_each_expanded(|position, _, t| {
            let r = vdw_radius(t) + WATER_RADIUS;
            for &direction in &directions {
                placer.try_place(position + direction * r);
            }
        });
    }
}

fn jan_candidates(grid: &MolecularGrid, placer: &mut Placer<'_>) {
    let r = WATER_RADIUS + grid.width();
    let [ni, nj, nk] = grid.dims();
    for i in 0..ni {
        for j in 0..nj {
            for k in 0..nk {
                if !grid.is_occupied(i, j, k) {
                    continue;
                }
                let center = grid.cell_center(i, j, k);
                for axis in axes() {
                    placer.try_place(center + axis * r);
                }
            }
        }
    }
}

/// Evenly thins the candidate list down to `target` waters.
fn counter_cull(mut waters: Vec<Water>, target: usize) -> Vec<Water> {
    if waters.len() <= target || target == 0 {
        return waters;
    }
    let step = waters.len() as f64 / target as f64;
    let mut kept = Vec::with_capacity(target);
    let mut next = 0.0;
    for (i, water) in waters.drain(..).enumerate() {
        if (i as f64) >= next {
            kept.push(water);
            next += step;
        }
    }
    kept
}

/// Generates a hydration shell around the molecule.
///
/// # Errors
///
/// Returns [`crate::error::Error::Input`] if the molecule cannot be gridded.
pub fn generate_hydration(
    molecule: &Molecule,
    strategy: HydrationStrategy,
) -> Result<Vec<Water>> {
    if strategy == HydrationStrategy::None {
        return Ok(Vec::new());
    }
    let grid = MolecularGrid::new(molecule, DEFAULT_GRID_WIDTH)?;
    let mut placer = Placer {
        grid: &grid,
        taken: FxHashSet::default(),
        waters: Vec::new(),
    };
    match strategy {
        HydrationStrategy::Axes => axes_candidates(molecule, &mut placer),
        HydrationStrategy::Radial => radial_candidates(molecule, &mut placer),
        HydrationStrategy::Jan => jan_candidates(&grid, &mut placer),
        HydrationStrategy::None => unreachable!(),
    }
    let candidates = placer.waters.len();
    let waters = counter_cull(placer.waters, molecule.atom_count() * WATERS_PER_ATOM);
    debug!(
        "hydration ({strategy:?}): {candidates} candidates, {} kept",
        waters.len()
    );
    Ok(waters)
}

/// Generates a hydration shell and installs it on the molecule, raising its
/// hydration-modified flag.
///
/// # Errors
///
/// See [`generate_hydration`].
pub fn hydrate(molecule: &mut Molecule, strategy: HydrationStrategy) -> Result<()> {
    let waters = generate_hydration(molecule, strategy)?;
    molecule.set_hydration(waters);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::{Atom, Body};
    use crate::form_factor::FormFactorType;

    fn molecule() -> Molecule {
        let atoms: Vec<_> = (0..10)
            .map(|i| {
                Atom::new(
                    Vec3::new(f64::from(i) * 1.5, 0.0, 0.0),
                    6.0,
                    FormFactorType::C,
                )
            })
            .collect();
        Molecule::new(vec![Body::new(0, atoms)]).unwrap()
    }

    #[test]
    fn none_strategy_yields_no_waters() {
        let waters = generate_hydration(&molecule(), HydrationStrategy::None).unwrap();
        assert!(waters.is_empty());
    }

    #[test]
    fn waters_avoid_the_molecular_volume() {
        for strategy in [
            HydrationStrategy::Axes,
            HydrationStrategy::Radial,
            HydrationStrategy::Jan,
        ] {
            let molecule = molecule();
            let grid = MolecularGrid::new(&molecule, DEFAULT_GRID_WIDTH).unwrap();
            let waters = generate_hydration(&molecule, strategy).unwrap();
            assert!(!waters.is_empty(), "{strategy:?} placed nothing");
            for water in &waters {
                assert!(!grid.is_occupied_at(water.position), "{strategy:?}");
            }
        }
    }

    #[test]
    fn the_shell_is_bounded_and_deterministic() {
        let molecule = molecule();
        let a = generate_hydration(&molecule, HydrationStrategy::Axes).unwrap();
        let b = generate_hydration(&molecule, HydrationStrategy::Axes).unwrap();
        assert!(a.len() <= molecule.atom_count());
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.position.x, y.position.x);
            assert_eq!(x.position.z, y.position.z);
        }
    }

    #[test]
    fn hydrate_flips_the_state_flag() {
        let mut molecule = molecule();
        molecule.state_mut().reset();
        hydrate(&mut molecule, HydrationStrategy::Axes).unwrap();
        assert!(molecule.state().is_hydration_modified());
        assert!(!molecule.hydration().is_empty());
    }
}
