//! Change tracking for bodies, symmetries and the hydration shell.
//!
//! The partial-histogram cache needs to know which bodies moved between
//! successive builds. The state manager owns a flat, indexable table of
//! per-body flags and hands out plain index handles ("signallers"); bodies
//! store their index. No shared pointers, no cycles.

use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Modification flags of a single body.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct BodyState: u8 {
        /// Coordinates changed: the body was translated or rotated. Internal
        /// distances are rigid, so the self-histogram stays valid.
        const EXTERNALLY_MODIFIED = 1;
        /// Atoms were added or removed; everything touching the body is
        /// invalid, the self-histogram included.
        const INTERNALLY_MODIFIED = 1 << 1;
    }
}

/// The change reported through a signaller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Change {
    /// The body was translated or rotated as a whole.
    External,
    /// Atoms were added to or removed from the body.
    Internal,
    /// Symmetry copy `i` of the body changed.
    Symmetry(usize),
}

/// A handle for signalling changes of one body.
///
/// Handles are invalidated when the body table is rebuilt (bodies added or
/// removed); using a stale handle is a [`Error::State`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Signaller {
    index: usize,
    generation: u32,
}

impl Signaller {
    /// The index of the signalled body.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Tracks which parts of a molecule changed since the last histogram build.
///
/// Freshly constructed managers report everything as modified, so the first
/// build is always complete.
#[derive(Clone, Debug)]
pub struct StateManager {
    bodies: Vec<BodyState>,
    symmetries: Vec<Vec<bool>>,
    hydration_modified: bool,
    generation: u32,
}

impl StateManager {
    /// Creates a manager for `bodies` bodies, where body `i` carries
    /// `symmetry_sizes[i]` symmetry copies. All flags start raised.
    #[must_use]
    pub fn new(symmetry_sizes: &[usize]) -> Self {
        Self {
            bodies: vec![BodyState::all(); symmetry_sizes.len()],
            symmetries: symmetry_sizes.iter().map(|&n| vec![true; n]).collect(),
            hydration_modified: true,
            generation: 0,
        }
    }

    /// Number of tracked bodies.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bodies.len()
    }

    /// Returns a signalling handle for body `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn probe(&self, i: usize) -> Signaller {
        assert!(i < self.bodies.len());
        Signaller {
            index: i,
            generation: self.generation,
        }
    }

    /// Reports a change through a signalling handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::State`] if the handle was detached by a rebuild of
    /// the body table.
    pub fn signal(&mut self, signaller: Signaller, change: Change) -> Result<()> {
        if signaller.generation != self.generation {
            return Err(Error::State(format!(
                "signaller for body {} is detached (generation {} vs {})",
                signaller.index, signaller.generation, self.generation
            )));
        }
        match change {
            Change::External => self.externally_modified(signaller.index),
            Change::Internal => self.internally_modified(signaller.index),
            Change::Symmetry(s) => self.modified_symmetry(signaller.index, s),
        }
        Ok(())
    }

    /// Marks the coordinates of body `i` as changed.
    pub fn externally_modified(&mut self, i: usize) {
        self.bodies[i] |= BodyState::EXTERNALLY_MODIFIED;
    }

    /// Marks the composition of body `i` as changed. Implies an external
    /// modification.
    pub fn internally_modified(&mut self, i: usize) {
        self.bodies[i] |= BodyState::INTERNALLY_MODIFIED | BodyState::EXTERNALLY_MODIFIED;
    }

    /// Marks every body as externally modified.
    pub fn externally_modified_all(&mut self) {
        for state in &mut self.bodies {
            *state |= BodyState::EXTERNALLY_MODIFIED;
        }
    }

    /// Marks every body as internally modified.
    pub fn internally_modified_all(&mut self) {
        for state in &mut self.bodies {
            *state |= BodyState::INTERNALLY_MODIFIED | BodyState::EXTERNALLY_MODIFIED;
        }
    }

    /// Marks symmetry copy `s` of body `i` as changed.
    pub fn modified_symmetry(&mut self, i: usize, s: usize) {
        self.symmetries[i][s] = true;
    }

    /// Grows the symmetry bitset of body `i` to `n` entries; new entries
    /// start raised. Existing handles stay attached.
    pub fn resize_symmetries(&mut self, i: usize, n: usize) {
        self.symmetries[i].resize(n, true);
    }

    /// Marks the hydration shell as changed.
    pub fn modified_hydration(&mut self) {
        self.hydration_modified = true;
    }

    /// Whether body `i` was externally modified since the last [`reset`].
    ///
    /// [`reset`]: Self::reset
    #[must_use]
    pub fn is_externally_modified(&self, i: usize) -> bool {
        self.bodies[i].contains(BodyState::EXTERNALLY_MODIFIED)
    }

    /// Whether body `i` was internally modified since the last [`reset`].
    ///
    /// [`reset`]: Self::reset
    #[must_use]
    pub fn is_internally_modified(&self, i: usize) -> bool {
        self.bodies[i].contains(BodyState::INTERNALLY_MODIFIED)
    }

    /// Whether any symmetry copy of body `i` changed since the last reset.
    #[must_use]
    pub fn is_symmetry_modified(&self, i: usize) -> bool {
        self.symmetries[i].iter().any(|&m| m)
    }

    /// Whether the hydration shell changed since the last reset.
    #[must_use]
    pub const fn is_hydration_modified(&self) -> bool {
        self.hydration_modified
    }

    /// Whether anything at all changed since the last reset.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.hydration_modified
            || self.bodies.iter().any(|state| !state.is_empty())
            || self.symmetries.iter().any(|s| s.iter().any(|&m| m))
    }

    /// Clears all flags. Called by the cache once it has caught up.
    pub fn reset(&mut self) {
        for state in &mut self.bodies {
            *state = BodyState::empty();
        }
        for symmetry in &mut self.symmetries {
            symmetry.fill(false);
        }
        self.hydration_modified = false;
    }

    /// Replaces the body table, detaching all existing handles. All flags
    /// start raised again.
    pub fn rebuild(&mut self, symmetry_sizes: &[usize]) {
        self.bodies = vec![BodyState::all(); symmetry_sizes.len()];
        self.symmetries = symmetry_sizes.iter().map(|&n| vec![true; n]).collect();
        self.hydration_modified = true;
        self.generation += 1;
    }
}
