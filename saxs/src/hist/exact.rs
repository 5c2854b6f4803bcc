//! The exact Debye transform.
//!
//! Evaluates `I(q) = Σᵢⱼ wᵢ·wⱼ·sinc(q·rᵢⱼ)` directly over all atom pairs,
//! bypassing the distance binning entirely. O(N²·|Q|), so only suitable for
//! small systems; used as ground truth for the histogram pipeline.

use super::compact::CompactCoordinates;
use crate::data::Molecule;
use crate::debye::sinc;

/// Evaluates the exact, unbinned Debye transform of the molecule's atoms
/// (hydration excluded) at the given q values, with unit form factors.
#[must_use]
pub fn exact_debye_transform(molecule: &Molecule, q_vals: &[f64]) -> Vec<f64> {
    let data = CompactCoordinates::from_bodies(molecule.bodies());
    let entries = data.data();
    let self_mass = data.sum_squared_weights();

    q_vals
        .iter()
        .map(|&q| {
            let mut sum = 0.0;
            for i in 0..entries.len() {
                let ci = &entries[i];
                let mut j = i + 1;
                while j + 8 <= entries.len() {
                    let batch = entries[j..j + 8].try_into().expect("chunk size is 8");
                    let r = ci.evaluate8(batch);
                    for k in 0..8 {
                        sum += 2.0 * f64::from(r.weights[k]) * sinc(q * f64::from(r.distances[k]));
                    }
                    j += 8;
                }
                while j + 4 <= entries.len() {
                    let batch = entries[j..j + 4].try_into().expect("chunk size is 4");
                    let r = ci.evaluate4(batch);
                    for k in 0..4 {
                        sum += 2.0 * f64::from(r.weights[k]) * sinc(q * f64::from(r.distances[k]));
                    }
                    j += 4;
                }
                while j < entries.len() {
                    let r = ci.evaluate(&entries[j]);
                    sum += 2.0 * f64::from(r.weight) * sinc(q * f64::from(r.distance));
                    j += 1;
                }
            }
            sum + self_mass
        })
        .collect()
}
