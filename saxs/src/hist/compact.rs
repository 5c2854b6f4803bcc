//! A compact coordinate representation for the distance kernels.
//!
//! Only the absolute necessities for the pair evaluation are extracted from a
//! molecule: coordinates and weight, packed as four `f32` so that one entry
//! fills 16 bytes and many entries fit a cache line. Form-factor types live
//! in a parallel `u8` vector so the plain path never touches them. A compact
//! set is a snapshot: it is never mutated after construction, and a modified
//! molecule produces a new one.

use crate::data::{Body, Water};
use crate::form_factor::FormFactorType;
use lin_alg::f64::Vec3;

/// A single packed coordinate entry.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct CompactCoordinatesData {
    /// x-coordinate in Å.
    pub x: f32,
    /// y-coordinate in Å.
    pub y: f32,
    /// z-coordinate in Å.
    pub z: f32,
    /// Scattering weight.
    pub w: f32,
}

const _: () = assert!(std::mem::size_of::<CompactCoordinatesData>() == 16);

/// Result of a single pair evaluation.
#[derive(Clone, Copy, Debug)]
pub struct EvalResult {
    /// Euclidean distance between the two entries.
    pub distance: f32,
    /// Product of the two weights.
    pub weight: f32,
}

/// Result of a four-target batch evaluation.
#[derive(Clone, Copy, Debug)]
pub struct EvalResult4 {
    /// Distances to the four targets.
    pub distances: [f32; 4],
    /// Weight products with the four targets.
    pub weights: [f32; 4],
}

/// Result of an eight-target batch evaluation.
#[derive(Clone, Copy, Debug)]
pub struct EvalResult8 {
    /// Distances to the eight targets.
    pub distances: [f32; 8],
    /// Weight products with the eight targets.
    pub weights: [f32; 8],
}

impl CompactCoordinatesData {
    /// Packs a position and weight.
    #[must_use]
    pub fn new(position: Vec3, weight: f64) -> Self {
        Self {
            x: position.x as f32,
            y: position.y as f32,
            z: position.z as f32,
            w: weight as f32,
        }
    }

    /// Evaluates the distance to and combined weight with a single target.
    #[inline]
    #[must_use]
    pub fn evaluate(&self, other: &Self) -> EvalResult {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        EvalResult {
            distance: dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt(),
            weight: self.w * other.w,
        }
    }

    /// Evaluates four targets at once. The fixed batch lets the optimizer
    /// unroll and vectorize the inner loop.
    #[inline]
    #[must_use]
    pub fn evaluate4(&self, others: &[Self; 4]) -> EvalResult4 {
        let mut distances = [0.0; 4];
        let mut weights = [0.0; 4];
        for k in 0..4 {
            let r = self.evaluate(&others[k]);
            distances[k] = r.distance;
            weights[k] = r.weight;
        }
        EvalResult4 { distances, weights }
    }

    /// Evaluates eight targets at once.
    #[inline]
    #[must_use]
    pub fn evaluate8(&self, others: &[Self; 8]) -> EvalResult8 {
        let mut distances = [0.0; 8];
        let mut weights = [0.0; 8];
        for k in 0..8 {
            let r = self.evaluate(&others[k]);
            distances[k] = r.distance;
            weights[k] = r.weight;
        }
        EvalResult8 { distances, weights }
    }
}

/// Packed coordinates, weights and form-factor types of a set of scatterers.
#[derive(Clone, Debug, Default)]
pub struct CompactCoordinates {
    data: Vec<CompactCoordinatesData>,
    types: Vec<u8>,
}

impl CompactCoordinates {
    /// Builds a compact set from an explicit entry sequence.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (Vec3, f64, FormFactorType)>) -> Self {
        let mut data = Vec::new();
        let mut types = Vec::new();
        for (position, weight, t) in entries {
            data.push(CompactCoordinatesData::new(position, weight));
            types.push(t.index() as u8);
        }
        Self { data, types }
    }

    /// Extracts a body, symmetry copies included.
    #[must_use]
    pub fn from_body(body: &Body) -> Self {
        let mut result = Self::default();
        result.reserve(body.expanded_size());
        body.for_each_expanded(|position, weight, t| result.push(position, weight, t));
        result
    }

    /// Extracts a list of bodies, symmetry copies included.
    #[must_use]
    pub fn from_bodies(bodies: &[Body]) -> Self {
        let mut result = Self::default();
        result.reserve(bodies.iter().map(Body::expanded_size).sum());
        for body in bodies {
            body.for_each_expanded(|position, weight, t| result.push(position, weight, t));
        }
        result
    }

    /// Extracts a hydration shell. All entries are tagged `OH`.
    #[must_use]
    pub fn from_waters(waters: &[Water]) -> Self {
        Self::from_entries(
            waters
                .iter()
                .map(|w| (w.position, w.weight, FormFactorType::OH)),
        )
    }

    /// Builds a compact set with raw type indices, for the extended type
    /// axes of the grid managers.
    pub(crate) fn from_indexed_entries(
        entries: impl IntoIterator<Item = (Vec3, f64, u8)>,
    ) -> Self {
        let mut data = Vec::new();
        let mut types = Vec::new();
        for (position, weight, t) in entries {
            data.push(CompactCoordinatesData::new(position, weight));
            types.push(t);
        }
        Self { data, types }
    }

    fn reserve(&mut self, n: usize) {
        self.data.reserve(n);
        self.types.reserve(n);
    }

    fn push(&mut self, position: Vec3, weight: f64, t: FormFactorType) {
        self.data.push(CompactCoordinatesData::new(position, weight));
        self.types.push(t.index() as u8);
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The packed entries.
    #[must_use]
    pub fn data(&self) -> &[CompactCoordinatesData] {
        &self.data
    }

    /// The parallel form-factor type indices.
    #[must_use]
    pub fn types(&self) -> &[u8] {
        &self.types
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum_weights(&self) -> f64 {
        self.data.iter().map(|d| f64::from(d.w)).sum()
    }

    /// Sum of all squared weights: the bin-0 self-correlation mass.
    #[must_use]
    pub fn sum_squared_weights(&self) -> f64 {
        self.data.iter().map(|d| f64::from(d.w).powi(2)).sum()
    }

    /// Per-type sums of squared weights, for the typed bin-0 mass.
    #[must_use]
    pub fn squared_weights_by_type(&self, types: usize) -> Vec<f64> {
        let mut out = vec![0.0; types];
        for (d, &t) in self.data.iter().zip(&self.types) {
            out[t as usize] += f64::from(d.w).powi(2);
        }
        out
    }
}
