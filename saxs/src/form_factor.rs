//! Atomic and excluded-volume form factors.
//!
//! Atoms are classified into a closed set of form-factor types; hydrogens are
//! folded into their bound heavy atom (`CH`, `NH2`, ...). All form factors are
//! normalized to unity at `q = 0` so that scattering weights carry the
//! electron counts; the five-Gaussian parametrizations below follow Waasmaier
//! & Kirfel.

use crate::config::ExvModel;
use crate::error::{Error, Result};
use ndarray::Array3;
use std::sync::OnceLock;

/// The form-factor type of an atom, intended to be used as a table index.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum FormFactorType {
    /// Neutral carbon.
    C,
    /// Carbon with one bound hydrogen.
    CH,
    /// Carbon with two bound hydrogens.
    CH2,
    /// Carbon with three bound hydrogens.
    CH3,
    /// Neutral nitrogen.
    N,
    /// Nitrogen with one bound hydrogen.
    NH,
    /// Nitrogen with two bound hydrogens.
    NH2,
    /// Nitrogen with three bound hydrogens.
    NH3,
    /// Neutral oxygen.
    O,
    /// Oxygen with one bound hydrogen. Also the tag of hydration waters.
    OH,
    /// Neutral sulfur.
    S,
    /// Sulfur with one bound hydrogen.
    SH,
    /// All other elements.
    Other,
    /// An excluded-volume dummy atom.
    ExcludedVolume,
    /// Unclassified. Never present inside the pipeline; the loader boundary
    /// rejects or synthesizes these.
    Unknown,
}

/// Number of atomic form-factor types (`C` through `Other`).
pub const ATOMIC_TYPES: usize = 13;

/// Table index of the excluded-volume type.
pub const EXV_INDEX: usize = 13;

impl FormFactorType {
    /// Returns the table index of this type.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Reconstructs a type from its table index.
    #[must_use]
    pub const fn from_index(index: u8) -> Self {
        match index {
            0 => Self::C,
            1 => Self::CH,
            2 => Self::CH2,
            3 => Self::CH3,
            4 => Self::N,
            5 => Self::NH,
            6 => Self::NH2,
            7 => Self::NH3,
            8 => Self::O,
            9 => Self::OH,
            10 => Self::S,
            11 => Self::SH,
            12 => Self::Other,
            13 => Self::ExcludedVolume,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` for the atomic types (`C` through `Other`).
    #[must_use]
    pub const fn is_atomic(self) -> bool {
        (self as usize) < ATOMIC_TYPES
    }

    /// Number of electrons carried by this type, hydrogens included.
    ///
    /// # Panics
    ///
    /// Panics for [`FormFactorType::ExcludedVolume`] and
    /// [`FormFactorType::Unknown`], whose charge is not a property of the
    /// type.
    #[must_use]
    pub fn electrons(self) -> f64 {
        form_factor(self).electrons()
    }
}

/// A five-Gaussian fit `f(q) = Σ aᵢ·exp(−bᵢ·(q/4π)²) + c`.
#[derive(Clone, Copy, Debug)]
struct FiveGaussian {
    a: [f64; 5],
    b: [f64; 5],
    c: f64,
}

impl FiveGaussian {
    fn evaluate(&self, q: f64) -> f64 {
        let s2 = (q / (4.0 * std::f64::consts::PI)).powi(2);
        self.a
            .iter()
            .zip(&self.b)
            .map(|(a, b)| a * (-b * s2).exp())
            .sum::<f64>()
            + self.c
    }
}

// Waasmaier & Kirfel (1995) coefficients for the neutral elements.
const HYDROGEN: FiveGaussian = FiveGaussian {
    a: [0.413048, 0.294953, 0.187491, 0.080701, 0.023736],
    b: [15.569946, 32.398468, 5.711404, 61.889874, 1.334118],
    c: 0.000049,
};
const CARBON: FiveGaussian = FiveGaussian {
    a: [2.657506, 1.078079, 1.490909, -4.241070, 0.713791],
    b: [14.780758, 0.776775, 42.086843, -0.000294, 0.239535],
    c: 4.297983,
};
const NITROGEN: FiveGaussian = FiveGaussian {
    a: [11.893780, 3.277479, 1.858092, 0.858927, 0.912985],
    b: [0.000158, 10.232723, 30.344690, 0.656065, 0.217287],
    c: -11.804902,
};
const OXYGEN: FiveGaussian = FiveGaussian {
    a: [2.960427, 2.508818, 0.637853, 0.722838, 1.142756],
    b: [14.182259, 5.936858, 0.112726, 34.958481, 0.390240],
    c: 0.027014,
};
const SULFUR: FiveGaussian = FiveGaussian {
    a: [6.372157, 5.154568, 1.473732, 1.635073, 1.209372],
    b: [1.514347, 22.092528, 0.061373, 55.445176, 0.646925],
    c: 0.154722,
};
// Argon stands in for the unclassified heavy atoms.
const OTHER: FiveGaussian = FiveGaussian {
    a: [7.188004, 6.638454, 0.454180, 1.929593, 1.523654],
    b: [0.956221, 15.339877, 15.339862, 39.043824, 0.062409],
    c: 0.265954,
};

/// An atomic form factor, normalized to unity at `q = 0`.
///
/// Grouped types evaluate as the parent atom plus the bound hydrogens,
/// renormalized by the combined electron count.
#[derive(Clone, Copy, Debug)]
pub struct FormFactor {
    base: FiveGaussian,
    hydrogens: u32,
    norm: f64,
}

impl FormFactor {
    fn new(base: FiveGaussian, hydrogens: u32) -> Self {
        let norm = base.evaluate(0.0) + f64::from(hydrogens) * HYDROGEN.evaluate(0.0);
        Self {
            base,
            hydrogens,
            norm,
        }
    }

    /// Evaluates the normalized form factor at momentum transfer `q`.
    #[must_use]
    pub fn evaluate(&self, q: f64) -> f64 {
        (self.base.evaluate(q) + f64::from(self.hydrogens) * HYDROGEN.evaluate(q)) / self.norm
    }

    /// The number of electrons this type scatters with, i.e. the
    /// unnormalized value at `q = 0`.
    #[must_use]
    pub const fn electrons(&self) -> f64 {
        self.norm
    }
}

/// Returns the form factor of an atomic type.
///
/// # Panics
///
/// Panics for [`FormFactorType::ExcludedVolume`] and
/// [`FormFactorType::Unknown`]; excluded-volume factors depend on a displaced
/// volume and are represented by [`ExvFormFactor`].
#[must_use]
pub fn form_factor(t: FormFactorType) -> &'static FormFactor {
    static STORAGE: OnceLock<[FormFactor; ATOMIC_TYPES]> = OnceLock::new();
    let storage = STORAGE.get_or_init(|| {
        [
            FormFactor::new(CARBON, 0),
            FormFactor::new(CARBON, 1),
            FormFactor::new(CARBON, 2),
            FormFactor::new(CARBON, 3),
            FormFactor::new(NITROGEN, 0),
            FormFactor::new(NITROGEN, 1),
            FormFactor::new(NITROGEN, 2),
            FormFactor::new(NITROGEN, 3),
            FormFactor::new(OXYGEN, 0),
            FormFactor::new(OXYGEN, 1),
            FormFactor::new(SULFUR, 0),
            FormFactor::new(SULFUR, 1),
            FormFactor::new(OTHER, 0),
        ]
    });
    assert!(
        t.is_atomic(),
        "no atomic form factor for {t:?}; use ExvFormFactor for dummies"
    );
    &storage[t.index()]
}

/// The Gaussian-sphere form factor of an excluded-volume dummy atom,
/// normalized to unity at `q = 0`.
#[derive(Clone, Copy, Debug)]
pub struct ExvFormFactor {
    /// The displaced volume in Å³.
    pub volume: f64,
}

impl ExvFormFactor {
    /// Constructor.
    #[must_use]
    pub const fn new(volume: f64) -> Self {
        Self { volume }
    }

    /// Evaluates the normalized excluded-volume form factor at `q`.
    #[must_use]
    pub fn evaluate(&self, q: f64) -> f64 {
        (-q * q * self.volume.powf(2.0 / 3.0) / (4.0 * std::f64::consts::PI)).exp()
    }

    /// The charge displaced by this dummy for a given solvent density.
    #[must_use]
    pub fn charge(&self, solvent_density: f64) -> f64 {
        self.volume * solvent_density
    }
}

/// Returns the displaced volume in Å³ of each atomic type for the given
/// volume set, indexed by [`FormFactorType::index`].
///
/// # Errors
///
/// Returns [`Error::Config`] for a non-positive custom volume.
pub fn displaced_volumes(model: ExvModel) -> Result<[f64; ATOMIC_TYPES]> {
    //                 C      CH     CH2    CH3    N      NH     NH2    NH3    O      OH     S      SH     Other
    const TRAUBE: [f64; ATOMIC_TYPES] = [
        16.44, 21.59, 26.74, 31.89, 2.49, 7.64, 12.79, 17.94, 9.13, 14.28, 19.86, 25.01, 15.00,
    ];
    const VORONOI_EXPLICIT: [f64; ATOMIC_TYPES] = [
        9.82, 14.97, 20.12, 25.27, 6.56, 11.71, 16.86, 22.01, 11.34, 16.49, 21.25, 26.40, 15.00,
    ];
    const VORONOI_IMPLICIT: [f64; ATOMIC_TYPES] = [
        10.20, 18.51, 24.32, 32.35, 7.01, 13.98, 19.82, 26.73, 11.90, 17.89, 22.07, 29.05, 15.00,
    ];
    const MINFLUCT_EXPLICIT: [f64; ATOMIC_TYPES] = [
        10.79, 15.94, 21.09, 26.24, 7.25, 12.40, 17.55, 22.70, 12.18, 17.33, 22.35, 27.50, 15.00,
    ];
    const MINFLUCT_IMPLICIT: [f64; ATOMIC_TYPES] = [
        11.32, 19.47, 25.78, 33.63, 7.84, 14.72, 20.85, 27.69, 12.71, 18.74, 23.20, 30.08, 15.00,
    ];
    const VDW: [f64; ATOMIC_TYPES] = [
        20.58, 27.82, 35.06, 42.29, 15.60, 22.84, 30.08, 37.31, 14.71, 21.95, 24.43, 31.67, 20.58,
    ];

    Ok(match model {
        ExvModel::Traube => TRAUBE,
        ExvModel::VoronoiExplicitH => VORONOI_EXPLICIT,
        ExvModel::VoronoiImplicitH => VORONOI_IMPLICIT,
        ExvModel::MinFluctExplicitH => MINFLUCT_EXPLICIT,
        ExvModel::MinFluctImplicitH => MINFLUCT_IMPLICIT,
        ExvModel::VdW => VDW,
        ExvModel::Custom(volume) => {
            if !(volume > 0.0) {
                return Err(Error::Config(format!(
                    "custom displaced volume must be positive, got {volume}"
                )));
            }
            [volume; ATOMIC_TYPES]
        }
    })
}

/// The van der Waals radius in Å used when stamping an atom onto the
/// molecular grid.
#[must_use]
pub const fn vdw_radius(t: FormFactorType) -> f64 {
    match t {
        FormFactorType::C | FormFactorType::CH | FormFactorType::CH2 | FormFactorType::CH3 => 1.70,
        FormFactorType::N | FormFactorType::NH | FormFactorType::NH2 | FormFactorType::NH3 => 1.55,
        FormFactorType::O | FormFactorType::OH => 1.52,
        FormFactorType::S | FormFactorType::SH => 1.80,
        FormFactorType::Other | FormFactorType::ExcludedVolume | FormFactorType::Unknown => 1.80,
    }
}

/// A precalculated table of form-factor products on the engine q-axis, dense
/// in both type axes.
///
/// Entry `(i, j, k)` holds the product of the two factors at `q_k`, times the
/// charge-conversion ratios explained on the constructors. The table is
/// symmetric in the type axes.
#[derive(Clone, Debug)]
pub struct ProductTable {
    values: Array3<f64>,
}

impl ProductTable {
    /// Products `F̂ᵢ(q)·F̂ⱼ(q)` of the normalized atomic form factors, with
    /// dimensions `(ATOMIC_TYPES, ATOMIC_TYPES, q)`.
    #[must_use]
    pub fn atomic(q_axis: &[f64]) -> Self {
        let mut values = Array3::zeros((ATOMIC_TYPES, ATOMIC_TYPES, q_axis.len()));
        for i in 0..ATOMIC_TYPES {
            let ffi = form_factor(FormFactorType::from_index(i as u8));
            for j in 0..=i {
                let ffj = form_factor(FormFactorType::from_index(j as u8));
                for (k, &q) in q_axis.iter().enumerate() {
                    let product = ffi.evaluate(q) * ffj.evaluate(q);
                    values[[i, j, k]] = product;
                    values[[j, i, k]] = product;
                }
            }
        }
        Self { values }
    }

    /// Atomic-by-excluded-volume cross products.
    ///
    /// Entry `(i, j, k)` is `F̂ᵢ(q_k) · F̂ₓ,ⱼ(q_k) · xⱼ/Zⱼ`, where `xⱼ` is the
    /// displaced charge of type `j` and `Zⱼ` its electron count. Histograms
    /// accumulate `wᵢ·wⱼ` with `w` in electrons; the ratio converts the
    /// second factor from electrons to displaced charge.
    #[must_use]
    pub fn cross(q_axis: &[f64], volumes: &[f64; ATOMIC_TYPES], solvent_density: f64) -> Self {
        let mut values = Array3::zeros((ATOMIC_TYPES, ATOMIC_TYPES, q_axis.len()));
        for i in 0..ATOMIC_TYPES {
            let ffi = form_factor(FormFactorType::from_index(i as u8));
            for j in 0..ATOMIC_TYPES {
                let tj = FormFactorType::from_index(j as u8);
                let exv = ExvFormFactor::new(volumes[j]);
                let ratio = exv.charge(solvent_density) / form_factor(tj).electrons();
                for (k, &q) in q_axis.iter().enumerate() {
                    values[[i, j, k]] = ffi.evaluate(q) * exv.evaluate(q) * ratio;
                }
            }
        }
        Self { values }
    }

    /// Excluded-volume-by-excluded-volume products, both factors converted to
    /// displaced charge as for [`ProductTable::cross`].
    #[must_use]
    pub fn exv(q_axis: &[f64], volumes: &[f64; ATOMIC_TYPES], solvent_density: f64) -> Self {
        let factors: Vec<(ExvFormFactor, f64)> = (0..ATOMIC_TYPES)
            .map(|i| {
                let t = FormFactorType::from_index(i as u8);
                let exv = ExvFormFactor::new(volumes[i]);
                let ratio = exv.charge(solvent_density) / form_factor(t).electrons();
                (exv, ratio)
            })
            .collect();

        let mut values = Array3::zeros((ATOMIC_TYPES, ATOMIC_TYPES, q_axis.len()));
        for (i, (exv_i, ratio_i)) in factors.iter().enumerate() {
            for (j, (exv_j, ratio_j)) in factors.iter().enumerate().take(i + 1) {
                for (k, &q) in q_axis.iter().enumerate() {
                    let product = exv_i.evaluate(q) * exv_j.evaluate(q) * ratio_i * ratio_j;
                    values[[i, j, k]] = product;
                    values[[j, i, k]] = product;
                }
            }
        }
        Self { values }
    }

    /// Products over an extended type axis that appends excluded-volume slots
    /// after the atomic types, all sharing the Gaussian-sphere factor of
    /// `cell_volume`. Used by the grid-based managers, whose dummies are real
    /// histogram entries carrying their own displaced charge.
    #[must_use]
    pub fn with_grid_exv(q_axis: &[f64], cell_volume: f64, exv_slots: usize) -> Self {
        let n = ATOMIC_TYPES + exv_slots;
        let exv = ExvFormFactor::new(cell_volume);
        let eval = |t: usize, q: f64| {
            if t < ATOMIC_TYPES {
                form_factor(FormFactorType::from_index(t as u8)).evaluate(q)
            } else {
                exv.evaluate(q)
            }
        };

        let mut values = Array3::zeros((n, n, q_axis.len()));
        for i in 0..n {
            for j in 0..=i {
                for (k, &q) in q_axis.iter().enumerate() {
                    let product = eval(i, q) * eval(j, q);
                    values[[i, j, k]] = product;
                    values[[j, i, k]] = product;
                }
            }
        }
        Self { values }
    }

    /// Looks up the product of types `(i, j)` at q-bin `k`.
    #[must_use]
    pub fn lookup(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[[i, j, k]]
    }

    /// Returns the q-profile of the type pair `(i, j)` as a slice.
    #[must_use]
    pub fn profile(&self, i: usize, j: usize) -> &[f64] {
        self.values
            .slice(ndarray::s![i, j, ..])
            .to_slice()
            .expect("product table is stored contiguously")
    }

    /// Number of types along each type axis.
    #[must_use]
    pub fn types(&self) -> usize {
        self.values.dim().0
    }
}
