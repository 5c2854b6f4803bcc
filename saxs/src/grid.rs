//! The molecular grid.
//!
//! A voxelization of the molecule used for two purposes: sampling the
//! excluded volume as dummy atoms (interior and surface cells), and collision
//! checks when the hydration strategies place candidate waters.

use crate::data::Molecule;
use crate::error::{Error, Result};
use crate::form_factor::vdw_radius;
use lin_alg::f64::Vec3;

/// Default cell width in Å.
pub const DEFAULT_GRID_WIDTH: f64 = 1.0;

/// Padding around the molecular bounding box, generous enough for a
/// hydration layer.
const PADDING: f64 = 6.0;

/// The excluded-volume dummies sampled from a grid.
#[derive(Clone, Debug, Default)]
pub struct GridExcludedVolume {
    /// Cell centers buried inside the molecular volume.
    pub interior: Vec<Vec3>,
    /// Cell centers on the solvent-exposed boundary.
    pub surface: Vec<Vec3>,
}

impl GridExcludedVolume {
    /// Whether a surface layer was resolved.
    #[must_use]
    pub fn has_surface(&self) -> bool {
        !self.surface.is_empty()
    }

    /// Total number of dummies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interior.len() + self.surface.len()
    }

    /// Whether no dummies were generated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interior.is_empty() && self.surface.is_empty()
    }
}

/// A regular voxel grid over the padded bounding box of a molecule.
#[derive(Clone, Debug)]
pub struct MolecularGrid {
    origin: Vec3,
    width: f64,
    dims: [usize; 3],
    cells: Vec<bool>,
}

impl MolecularGrid {
    /// Voxelizes `molecule` with cubic cells of `width` Å: every cell whose
    /// center lies within the van der Waals radius of an atom is marked
    /// occupied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a non-positive width and
    /// [`Error::Input`] for a molecule without atoms.
    pub fn new(molecule: &Molecule, width: f64) -> Result<Self> {
        if !(width > 0.0) {
            return Err(Error::Config(format!(
                "grid cell width must be positive, got {width}"
            )));
        }

        let mut min = Vec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Vec3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut atoms = Vec::new();
        for body in molecule.bodies() {
            body.for_each_expanded(|p, _, t| {
                min.x = min.x.min(p.x);
                min.y = min.y.min(p.y);
                min.z = min.z.min(p.z);
                max.x = max.x.max(p.x);
                max.y = max.y.max(p.y);
                max.z = max.z.max(p.z);
                atoms.push((p, vdw_radius(t)));
            });
        }
        if atoms.is_empty() {
            return Err(Error::Input("cannot grid a molecule without atoms".to_owned()));
        }

        let origin = min - Vec3::new(PADDING, PADDING, PADDING);
        let span = max - min + Vec3::new(2.0 * PADDING, 2.0 * PADDING, 2.0 * PADDING);
        let dims = [
            (span.x / width).ceil() as usize + 1,
            (span.y / width).ceil() as usize + 1,
            (span.z / width).ceil() as usize + 1,
        ];

        let mut grid = Self {
            origin,
            width,
            dims,
            cells: vec![false; dims[0] * dims[1] * dims[2]],
        };
        for (position, radius) in atoms {
            grid.stamp(position, radius);
        }
        Ok(grid)
    }

    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    /// The cell width in Å.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// The volume of a single cell in Å³.
    #[must_use]
    pub fn cell_volume(&self) -> f64 {
        self.width.powi(3)
    }

    /// The grid dimensions.
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// The center of cell `(i, j, k)`.
    #[must_use]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin
            + Vec3::new(
                (i as f64 + 0.5) * self.width,
                (j as f64 + 0.5) * self.width,
                (k as f64 + 0.5) * self.width,
            )
    }

    /// The cell containing `position`, if inside the grid.
    #[must_use]
    pub fn locate(&self, position: Vec3) -> Option<[usize; 3]> {
        let rel = position - self.origin;
        if rel.x < 0.0 || rel.y < 0.0 || rel.z < 0.0 {
            return None;
        }
        let cell = [
            (rel.x / self.width) as usize,
            (rel.y / self.width) as usize,
            (rel.z / self.width) as usize,
        ];
        (cell[0] < self.dims[0] && cell[1] < self.dims[1] && cell[2] < self.dims[2]).then_some(cell)
    }

    fn stamp(&mut self, position: Vec3, radius: f64) {
        let Some(center) = self.locate(position) else {
            return;
        };
        let reach = (radius / self.width).ceil() as isize;
        let r2 = radius * radius;
        for di in -reach..=reach {
            for dj in -reach..=reach {
                for dk in -reach..=reach {
                    let i = center[0] as isize + di;
                    let j = center[1] as isize + dj;
                    let k = center[2] as isize + dk;
                    if i < 0
                        || j < 0
                        || k < 0
                        || i as usize >= self.dims[0]
                        || j as usize >= self.dims[1]
                        || k as usize >= self.dims[2]
                    {
                        continue;
                    }
                    let (i, j, k) = (i as usize, j as usize, k as usize);
                    let d = self.cell_center(i, j, k) - position;
                    if d.dot(d) <= r2 {
                        let idx = self.index(i, j, k);
                        self.cells[idx] = true;
                    }
                }
            }
        }
    }

    /// Whether cell `(i, j, k)` is inside the molecular volume.
    #[must_use]
    pub fn is_occupied(&self, i: usize, j: usize, k: usize) -> bool {
        self.cells[self.index(i, j, k)]
    }

    /// Whether the cell containing `position` is inside the molecular
    /// volume. Positions outside the grid count as free.
    #[must_use]
    pub fn is_occupied_at(&self, position: Vec3) -> bool {
        self.locate(position)
            .is_some_and(|[i, j, k]| self.is_occupied(i, j, k))
    }

    fn is_surface(&self, i: usize, j: usize, k: usize) -> bool {
        let neighbors: [(isize, isize, isize); 6] = [
            (-1, 0, 0),
            (1, 0, 0),
            (0, -1, 0),
            (0, 1, 0),
            (0, 0, -1),
            (0, 0, 1),
        ];
        neighbors.iter().any(|&(di, dj, dk)| {
            let (ni, nj, nk) = (i as isize + di, j as isize + dj, k as isize + dk);
            if ni < 0
                || nj < 0
                || nk < 0
                || ni as usize >= self.dims[0]
                || nj as usize >= self.dims[1]
                || nk as usize >= self.dims[2]
            {
                return true;
            }
            !self.is_occupied(ni as usize, nj as usize, nk as usize)
        })
    }

    /// Samples the excluded volume: every occupied cell becomes a dummy,
    /// split into interior and surface by 6-neighbour emptiness.
    #[must_use]
    pub fn excluded_volume(&self) -> GridExcludedVolume {
        let mut exv = GridExcludedVolume::default();
        for i in 0..self.dims[0] {
            for j in 0..self.dims[1] {
                for k in 0..self.dims[2] {
                    if !self.is_occupied(i, j, k) {
                        continue;
                    }
                    let center = self.cell_center(i, j, k);
                    if self.is_surface(i, j, k) {
                        exv.surface.push(center);
                    } else {
                        exv.interior.push(center);
                    }
                }
            }
        }
        exv
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::{Atom, Body};
    use crate::form_factor::FormFactorType;

    fn single_atom() -> Molecule {
        Molecule::new(vec![Body::new(
            0,
            vec![Atom::new(Vec3::new_zero(), 6.0, FormFactorType::C)],
        )])
        .unwrap()
    }

    #[test]
    fn occupied_cells_cover_the_vdw_sphere() {
        let grid = MolecularGrid::new(&single_atom(), 1.0).unwrap();
        let [ni, nj, nk] = grid.dims();
        let mut occupied = 0;
        for i in 0..ni {
            for j in 0..nj {
                for k in 0..nk {
                    if grid.is_occupied(i, j, k) {
                        occupied += 1;
                    }
                }
            }
        }
        // a sphere of radius 1.7 Å has a volume of ~20.6 Å³; the voxelized
        // count is in the same ballpark
        assert!((10..=40).contains(&occupied), "got {occupied} cells");
        assert!(grid.is_occupied_at(Vec3::new_zero()));
        assert!(!grid.is_occupied_at(Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn a_single_atom_has_no_interior() {
        let grid = MolecularGrid::new(&single_atom(), 1.0).unwrap();
        let exv = grid.excluded_volume();
        assert!(!exv.is_empty());
        // every cell of a 1.7 Å sphere touches solvent
        assert!(exv.interior.is_empty());
        assert!(exv.has_surface());
    }

    #[test]
    fn a_dense_slab_develops_an_interior() {
        let mut atoms = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    atoms.push(Atom::new(
                        Vec3::new(f64::from(i) * 1.5, f64::from(j) * 1.5, f64::from(k) * 1.5),
                        6.0,
                        FormFactorType::C,
                    ));
                }
            }
        }
        let molecule = Molecule::new(vec![Body::new(0, atoms)]).unwrap();
        let grid = MolecularGrid::new(&molecule, 1.0).unwrap();
        let exv = grid.excluded_volume();
        assert!(!exv.interior.is_empty());
        assert!(!exv.surface.is_empty());
    }

    #[test]
    fn non_positive_width_is_rejected() {
        assert!(matches!(
            MolecularGrid::new(&single_atom(), 0.0),
            Err(Error::Config(_))
        ));
    }
}
