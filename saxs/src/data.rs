//! The molecular data model: atoms, waters, bodies and molecules.
//!
//! A molecule is an ordered list of rigid bodies plus an optional hydration
//! shell. All write access to bodies goes through the molecule, which routes
//! the change through its [`StateManager`] so that the partial-histogram
//! cache can reuse everything that did not move.

use crate::error::{Error, Result};
use crate::form_factor::FormFactorType;
use crate::state::StateManager;
use lin_alg::f64::Vec3;

/// Electrons carried by one hydration water.
pub const WATER_WEIGHT: f64 = 10.0;

/// The chemical element of a loaded atom, as far as the core cares about it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Element {
    /// Hydrogen.
    H,
    /// Carbon.
    C,
    /// Nitrogen.
    N,
    /// Oxygen.
    O,
    /// Sulfur.
    S,
    /// Any other identified element.
    Other,
    /// Unidentified. Rejected at the loader boundary.
    Unknown,
}

impl Element {
    /// The form-factor type assigned when the loader provides no explicit
    /// tag. Lone hydrogens fall back to `Other`; a residue map upstream is
    /// expected to fold them into their heavy atoms.
    #[must_use]
    pub const fn default_form_factor(self) -> FormFactorType {
        match self {
            Self::C => FormFactorType::C,
            Self::N => FormFactorType::N,
            Self::O => FormFactorType::O,
            Self::S => FormFactorType::S,
            Self::H | Self::Other => FormFactorType::Other,
            Self::Unknown => FormFactorType::Unknown,
        }
    }
}

/// An atom as delivered by a structure loader, before validation.
#[derive(Clone, Debug)]
pub struct RawAtom {
    /// Position in ångström.
    pub position: Vec3,
    /// Scattering weight: the effective number of electrons.
    pub weight: f64,
    /// The element tag.
    pub element: Element,
    /// Explicit form-factor classification, if the loader resolved one.
    pub form_factor: Option<FormFactorType>,
    /// Crystallographic occupancy; defaults to 1.
    pub occupancy: Option<f64>,
}

/// A validated atom inside the pipeline.
///
/// The weight already includes the occupancy; the form-factor type is never
/// [`FormFactorType::Unknown`].
#[derive(Clone, Copy, Debug)]
pub struct Atom {
    /// Position in ångström.
    pub position: Vec3,
    /// Scattering weight (effective electrons × occupancy).
    pub weight: f64,
    /// Form-factor classification.
    pub form_factor: FormFactorType,
}

impl Atom {
    /// Constructor.
    #[must_use]
    pub const fn new(position: Vec3, weight: f64, form_factor: FormFactorType) -> Self {
        Self {
            position,
            weight,
            form_factor,
        }
    }
}

/// A hydration water. The form-factor tag is fixed to `OH`.
#[derive(Clone, Copy, Debug)]
pub struct Water {
    /// Position in ångström.
    pub position: Vec3,
    /// Scattering weight.
    pub weight: f64,
}

impl Water {
    /// A water at `position` with the standard weight.
    #[must_use]
    pub const fn new(position: Vec3) -> Self {
        Self {
            position,
            weight: WATER_WEIGHT,
        }
    }
}

/// Rotates `v` around the axis through the origin by `angle` radians.
#[must_use]
pub fn rotate_about(v: Vec3, axis: Vec3, angle: f64) -> Vec3 {
    let mag = axis.magnitude();
    if mag < 1e-9 {
        return v;
    }
    let k = axis * (1.0 / mag);
    let (sin, cos) = angle.sin_cos();
    v * cos + k.cross(v) * sin + k * (k.dot(v) * (1.0 - cos))
}

/// A symmetry relation generating virtual copies of a body.
///
/// Copy `r ∈ [1, repetitions]` rotates the body by `r·angle` around `axis`
/// through the body's center of mass and then shifts it by `r·translation`.
#[derive(Clone, Copy, Debug)]
pub struct Symmetry {
    /// Per-repetition translation.
    pub translation: Vec3,
    /// Rotation axis through the body's center of mass.
    pub axis: Vec3,
    /// Per-repetition rotation angle in radians.
    pub angle: f64,
    /// Number of virtual copies.
    pub repetitions: usize,
    /// Whether `repetitions + 1` applications close onto the identity (e.g. a
    /// full ring). Purely descriptive; generation always emits `repetitions`
    /// copies.
    pub is_closed: bool,
}

impl Symmetry {
    /// Transforms `v` into the frame of copy `rep` (1-based), rotating around
    /// `center`.
    #[must_use]
    pub fn transform(&self, center: Vec3, rep: usize, v: Vec3) -> Vec3 {
        let r = rep as f64;
        rotate_about(v - center, self.axis, r * self.angle) + center + self.translation * r
    }
}

/// An ordered sequence of atoms with a stable identifier and optional
/// symmetries.
#[derive(Clone, Debug)]
pub struct Body {
    uid: u32,
    atoms: Vec<Atom>,
    symmetries: Vec<Symmetry>,
}

impl Body {
    /// Constructor.
    #[must_use]
    pub const fn new(uid: u32, atoms: Vec<Atom>) -> Self {
        Self {
            uid,
            atoms,
            symmetries: Vec::new(),
        }
    }

    /// Builds a body from loader output, validating every atom.
    ///
    /// A missing form-factor tag is synthesized from the element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] for unknown elements, non-finite coordinates
    /// or weights, or occupancies outside `[0, 1]`.
    pub fn from_raw(uid: u32, atoms: impl IntoIterator<Item = RawAtom>) -> Result<Self> {
        let atoms = atoms
            .into_iter()
            .enumerate()
            .map(|(i, raw)| {
                if raw.element == Element::Unknown {
                    return Err(Error::Input(format!(
                        "atom {i} of body {uid} has an unknown element"
                    )));
                }
                let p = raw.position;
                if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                    return Err(Error::Input(format!(
                        "atom {i} of body {uid} has non-finite coordinates ({}, {}, {})",
                        p.x, p.y, p.z
                    )));
                }
                if !raw.weight.is_finite() || raw.weight < 0.0 {
                    return Err(Error::Input(format!(
                        "atom {i} of body {uid} has an invalid weight {}",
                        raw.weight
                    )));
                }
                let occupancy = raw.occupancy.unwrap_or(1.0);
                if !(0.0..=1.0).contains(&occupancy) {
                    return Err(Error::Input(format!(
                        "atom {i} of body {uid} has an occupancy of {occupancy}, expected [0, 1]"
                    )));
                }
                let form_factor = raw
                    .form_factor
                    .unwrap_or_else(|| raw.element.default_form_factor());
                if form_factor == FormFactorType::Unknown {
                    return Err(Error::Input(format!(
                        "atom {i} of body {uid} could not be classified"
                    )));
                }
                Ok(Atom::new(raw.position, raw.weight * occupancy, form_factor))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(uid, atoms))
    }

    /// The stable identifier of this body.
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// The atoms of this body, symmetry copies excluded.
    #[must_use]
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// The symmetry relations of this body.
    #[must_use]
    pub fn symmetries(&self) -> &[Symmetry] {
        &self.symmetries
    }

    /// Number of atoms including all symmetry copies.
    #[must_use]
    pub fn expanded_size(&self) -> usize {
        let copies: usize = self.symmetries.iter().map(|s| s.repetitions).sum();
        self.atoms.len() * (1 + copies)
    }

    /// The weight-weighted center of mass.
    #[must_use]
    pub fn center_of_mass(&self) -> Vec3 {
        let mut total = 0.0;
        let mut sum = Vec3::new_zero();
        for atom in &self.atoms {
            sum += atom.position * atom.weight;
            total += atom.weight;
        }
        if total > 0.0 {
            sum * (1.0 / total)
        } else {
            sum
        }
    }

    /// Visits every atom including the virtual symmetry copies, which inherit
    /// the weight and type of their original.
    pub fn for_each_expanded(&self, mut visit: impl FnMut(Vec3, f64, FormFactorType)) {
        for atom in &self.atoms {
            visit(atom.position, atom.weight, atom.form_factor);
        }
        let center = self.center_of_mass();
        for symmetry in &self.symmetries {
            for rep in 1..=symmetry.repetitions {
                for atom in &self.atoms {
                    visit(
                        symmetry.transform(center, rep, atom.position),
                        atom.weight,
                        atom.form_factor,
                    );
                }
            }
        }
    }

    pub(crate) fn translate(&mut self, delta: Vec3) {
        for atom in &mut self.atoms {
            atom.position += delta;
        }
    }

    pub(crate) fn rotate(&mut self, axis: Vec3, angle: f64) {
        let center = self.center_of_mass();
        for atom in &mut self.atoms {
            atom.position = rotate_about(atom.position - center, axis, angle) + center;
        }
    }

    pub(crate) fn push_atoms(&mut self, atoms: impl IntoIterator<Item = Atom>) {
        self.atoms.extend(atoms);
    }

    pub(crate) fn push_symmetry(&mut self, symmetry: Symmetry) {
        self.symmetries.push(symmetry);
    }

    pub(crate) fn set_symmetry(&mut self, i: usize, symmetry: Symmetry) {
        self.symmetries[i] = symmetry;
    }
}

/// A molecule: ordered bodies, a hydration shell, and the state manager that
/// records modifications between histogram builds.
#[derive(Clone, Debug)]
pub struct Molecule {
    bodies: Vec<Body>,
    hydration: Vec<Water>,
    state: StateManager,
}

impl Molecule {
    /// Constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the molecule contains no atoms, if body
    /// uids collide, or if any atom is malformed.
    pub fn new(bodies: Vec<Body>) -> Result<Self> {
        if bodies.iter().map(|b| b.atoms.len()).sum::<usize>() == 0 {
            return Err(Error::Input("molecule contains no atoms".to_owned()));
        }
        for (i, body) in bodies.iter().enumerate() {
            if bodies[..i].iter().any(|other| other.uid == body.uid) {
                return Err(Error::Input(format!("duplicate body uid {}", body.uid)));
            }
            for (j, atom) in body.atoms.iter().enumerate() {
                let p = atom.position;
                if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) || !atom.weight.is_finite()
                {
                    return Err(Error::Input(format!(
                        "atom {j} of body {} is not finite",
                        body.uid
                    )));
                }
                if atom.form_factor == FormFactorType::Unknown {
                    return Err(Error::Input(format!(
                        "atom {j} of body {} has an unknown form-factor type",
                        body.uid
                    )));
                }
            }
        }
        let symmetry_sizes: Vec<_> = bodies.iter().map(|b| b.symmetries.len()).collect();
        Ok(Self {
            bodies,
            hydration: Vec::new(),
            state: StateManager::new(&symmetry_sizes),
        })
    }

    /// Constructor with an explicit hydration shell.
    ///
    /// # Errors
    ///
    /// See [`Molecule::new`].
    pub fn with_hydration(bodies: Vec<Body>, hydration: Vec<Water>) -> Result<Self> {
        let mut molecule = Self::new(bodies)?;
        molecule.hydration = hydration;
        Ok(molecule)
    }

    /// The bodies of this molecule.
    #[must_use]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Body `i`.
    #[must_use]
    pub fn body(&self, i: usize) -> &Body {
        &self.bodies[i]
    }

    /// Number of bodies.
    #[must_use]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// The hydration shell.
    #[must_use]
    pub fn hydration(&self) -> &[Water] {
        &self.hydration
    }

    /// Total number of atoms, symmetry copies included, waters excluded.
    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.bodies.iter().map(Body::expanded_size).sum()
    }

    /// Sum of all atomic weights, symmetry copies included.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        let mut sum = 0.0;
        for body in &self.bodies {
            body.for_each_expanded(|_, w, _| sum += w);
        }
        sum
    }

    /// The state manager recording modifications.
    #[must_use]
    pub const fn state(&self) -> &StateManager {
        &self.state
    }

    /// Mutable access to the state manager, for the cache that consumes the
    /// flags.
    pub fn state_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    /// Translates body `i` by `delta`.
    pub fn translate_body(&mut self, i: usize, delta: Vec3) {
        self.bodies[i].translate(delta);
        self.state.externally_modified(i);
    }

    /// Rotates body `i` by `angle` radians around `axis` through its center
    /// of mass.
    pub fn rotate_body(&mut self, i: usize, axis: Vec3, angle: f64) {
        self.bodies[i].rotate(axis, angle);
        self.state.externally_modified(i);
    }

    /// Appends atoms to body `i`.
    pub fn add_atoms(&mut self, i: usize, atoms: impl IntoIterator<Item = Atom>) {
        self.bodies[i].push_atoms(atoms);
        self.state.internally_modified(i);
    }

    /// Appends a body. Existing signaller handles are detached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] on a uid collision.
    pub fn add_body(&mut self, body: Body) -> Result<()> {
        if self.bodies.iter().any(|other| other.uid == body.uid) {
            return Err(Error::Input(format!("duplicate body uid {}", body.uid)));
        }
        self.bodies.push(body);
        let symmetry_sizes: Vec<_> = self.bodies.iter().map(|b| b.symmetries.len()).collect();
        self.state.rebuild(&symmetry_sizes);
        Ok(())
    }

    /// Adds a symmetry to body `i`. The body's composition changes, so it is
    /// flagged as internally modified.
    pub fn add_symmetry(&mut self, i: usize, symmetry: Symmetry) {
        self.bodies[i].push_symmetry(symmetry);
        let n = self.bodies[i].symmetries().len();
        self.state.resize_symmetries(i, n);
        self.state.internally_modified(i);
    }

    /// Replaces symmetry `s` of body `i`.
    pub fn set_symmetry(&mut self, i: usize, s: usize, symmetry: Symmetry) {
        self.bodies[i].set_symmetry(s, symmetry);
        self.state.modified_symmetry(i, s);
    }

    /// Replaces the hydration shell.
    pub fn set_hydration(&mut self, hydration: Vec<Water>) {
        self.hydration = hydration;
        self.state.modified_hydration();
    }

    /// Removes the hydration shell.
    pub fn clear_hydration(&mut self) {
        self.hydration.clear();
        self.state.modified_hydration();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn carbon(x: f64, y: f64, z: f64) -> Atom {
        Atom::new(Vec3::new(x, y, z), 6.0, FormFactorType::C)
    }

    #[test]
    fn unknown_elements_are_rejected() {
        let raw = RawAtom {
            position: Vec3::new_zero(),
            weight: 6.0,
            element: Element::Unknown,
            form_factor: None,
            occupancy: None,
        };
        assert!(matches!(Body::from_raw(0, [raw]), Err(Error::Input(_))));
    }

    #[test]
    fn nan_coordinates_are_rejected() {
        let raw = RawAtom {
            position: Vec3::new(f64::NAN, 0.0, 0.0),
            weight: 6.0,
            element: Element::C,
            form_factor: None,
            occupancy: None,
        };
        assert!(matches!(Body::from_raw(0, [raw]), Err(Error::Input(_))));
    }

    #[test]
    fn occupancy_scales_the_weight() {
        let raw = RawAtom {
            position: Vec3::new_zero(),
            weight: 6.0,
            element: Element::C,
            form_factor: None,
            occupancy: Some(0.5),
        };
        let body = Body::from_raw(0, [raw]).unwrap();
        assert_approx_eq!(f64, body.atoms()[0].weight, 3.0);
        assert_eq!(body.atoms()[0].form_factor, FormFactorType::C);
    }

    #[test]
    fn empty_molecule_is_rejected() {
        assert!(matches!(
            Molecule::new(vec![Body::new(0, vec![])]),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn duplicate_uids_are_rejected() {
        let bodies = vec![
            Body::new(1, vec![carbon(0.0, 0.0, 0.0)]),
            Body::new(1, vec![carbon(1.0, 0.0, 0.0)]),
        ];
        assert!(matches!(Molecule::new(bodies), Err(Error::Input(_))));
    }

    #[test]
    fn modifications_flip_the_right_flags() {
        let bodies = vec![
            Body::new(0, vec![carbon(0.0, 0.0, 0.0)]),
            Body::new(1, vec![carbon(5.0, 0.0, 0.0)]),
        ];
        let mut molecule = Molecule::new(bodies).unwrap();
        molecule.state_mut().reset();

        molecule.translate_body(1, Vec3::new(1.0, 0.0, 0.0));
        assert!(molecule.state().is_externally_modified(1));
        assert!(!molecule.state().is_internally_modified(1));
        assert!(!molecule.state().is_externally_modified(0));

        molecule.add_atoms(0, [carbon(0.5, 0.0, 0.0)]);
        assert!(molecule.state().is_internally_modified(0));

        molecule.set_hydration(vec![Water::new(Vec3::new(0.0, 3.0, 0.0))]);
        assert!(molecule.state().is_hydration_modified());
    }

    #[test]
    fn symmetry_copies_inherit_weight_and_type() {
        let mut body = Body::new(0, vec![carbon(1.0, 0.0, 0.0)]);
        body.push_symmetry(Symmetry {
            translation: Vec3::new(0.0, 0.0, 5.0),
            axis: Vec3::new(0.0, 0.0, 1.0),
            angle: std::f64::consts::PI,
            repetitions: 1,
            is_closed: false,
        });
        assert_eq!(body.expanded_size(), 2);

        let mut seen = Vec::new();
        body.for_each_expanded(|p, w, t| seen.push((p, w, t)));
        assert_eq!(seen.len(), 2);
        // rotating a single atom about its own center of mass is the identity,
        // so the copy is offset purely by the translation
        assert_approx_eq!(f64, seen[1].0.z, 5.0, epsilon = 1e-9);
        assert_approx_eq!(f64, seen[1].1, 6.0);
        assert_eq!(seen[1].2, FormFactorType::C);
    }

    #[test]
    fn rotation_preserves_internal_distances() {
        let bodies = vec![Body::new(
            0,
            vec![carbon(0.0, 0.0, 0.0), carbon(3.0, 0.0, 0.0)],
        )];
        let mut molecule = Molecule::new(bodies).unwrap();
        molecule.rotate_body(0, Vec3::new(0.0, 1.0, 0.0), 1.1);
        let atoms = molecule.body(0).atoms();
        let d = (atoms[0].position - atoms[1].position).magnitude();
        assert_approx_eq!(f64, d, 3.0, epsilon = 1e-9);
    }
}
