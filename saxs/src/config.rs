//! Engine configuration.
//!
//! All tunables are collected in a single immutable [`EngineConfig`] that is
//! passed to the builders and the fitter at construction; nothing reads
//! process-wide mutable settings during a run.

use crate::axis::{self, QSpacing, DEFAULT_BIN_WIDTH, DEFAULT_DISTANCE_BINS};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of electrons per cubic ångström of bulk water.
pub const SOLVENT_DENSITY: f64 = 0.334;

/// The displaced-volume set used to model the excluded volume.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum ExvModel {
    /// The classic Traube additive volumes.
    #[default]
    Traube,
    /// Voronoi tessellation volumes, hydrogens resolved explicitly.
    VoronoiExplicitH,
    /// Voronoi tessellation volumes, hydrogens folded into their parents.
    VoronoiImplicitH,
    /// Minimum-fluctuation volumes, hydrogens resolved explicitly.
    MinFluctExplicitH,
    /// Minimum-fluctuation volumes, hydrogens folded into their parents.
    MinFluctImplicitH,
    /// Volumes from van der Waals radii.
    VdW,
    /// A single uniform per-atom volume in Å³, supplied by the caller.
    Custom(f64),
}

/// The excluded-volume fitting convention, which determines how the scaling
/// factor `cx` enters the excluded-volume form factor and which bounds the
/// fitter imposes on it.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub enum ExvFlavor {
    /// `cx` scales the excluded-volume partials directly.
    #[default]
    Plain,
    /// CRYSOL-style: `cx` rescales the displaced volume, narrow bounds.
    Crysol,
    /// FoXS-style: q-dependent volume rescaling, wide bounds.
    FoXS,
    /// Pepsi-SAXS-style: exponential volume perturbation, wide bounds.
    Pepsi,
}

/// Strategy for generating the explicit hydration shell.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum HydrationStrategy {
    /// Place candidate waters along the coordinate axes of each surface atom.
    #[default]
    Axes,
    /// Place candidate waters along radial lines from each surface atom.
    Radial,
    /// Place candidate waters around every occupied grid cell.
    Jan,
    /// No hydration shell.
    None,
}

/// Selects the histogram builder variant.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ManagerChoice {
    /// Plain distance histograms; excluded volume only through the
    /// effective-charge approximation.
    Simple,
    /// Form-factor aware, single average excluded-volume dummy per atom.
    #[default]
    FFAvg,
    /// Form-factor aware, per-type excluded-volume form factors.
    FFExplicit,
    /// Excluded volume sampled on the molecular grid. Requires weighted bins.
    FFGrid,
    /// Grid excluded volume with a separately scalable surface layer.
    /// Requires weighted bins.
    FFGridSurface,
    /// The partial-histogram cache; reuses unchanged body-pair histograms
    /// between successive calls.
    Partial,
}

impl ManagerChoice {
    /// Returns `true` for the grid-based variants, which sample the excluded
    /// volume on a regular lattice and therefore require weighted bins.
    #[must_use]
    pub const fn requires_weighted_bins(self) -> bool {
        matches!(self, Self::FFGrid | Self::FFGridSurface)
    }
}

/// Which of the outer fit parameters are released by the fitter.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FitFlags {
    /// Fit the hydration-shell scaling `cw`.
    pub hydration: bool,
    /// Fit the excluded-volume scaling `cx`.
    pub excluded_volume: bool,
    /// Fit the atomic Debye-Waller factor `cd`.
    pub atomic_debye_waller: bool,
    /// Fit the excluded-volume Debye-Waller factor `cx_dw`.
    pub exv_debye_waller: bool,
}

impl Default for FitFlags {
    fn default() -> Self {
        Self {
            hydration: true,
            excluded_volume: true,
            atomic_debye_waller: false,
            exv_debye_waller: false,
        }
    }
}

/// The immutable engine configuration.
///
/// Builders and fitters take a borrowed reference; the configuration is never
/// mutated during a run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads. The process-wide pool reads this once, at
    /// first use.
    pub threads: usize,
    /// Lower end of the q-axis in Å⁻¹.
    pub q_min: f64,
    /// Upper end of the q-axis in Å⁻¹.
    pub q_max: f64,
    /// Number of q-axis samples.
    pub q_bins: usize,
    /// Spacing of the q-axis samples.
    pub q_spacing: QSpacing,
    /// Width of a distance bin in Å.
    pub bin_width: f64,
    /// Number of distance bins.
    pub distance_bins: usize,
    /// The displaced-volume set.
    pub exv_model: ExvModel,
    /// The excluded-volume fitting convention.
    pub exv_flavor: ExvFlavor,
    /// The hydration-shell generation strategy.
    pub hydration_strategy: HydrationStrategy,
    /// The histogram builder variant.
    pub histogram_manager: ManagerChoice,
    /// Track the weighted center of each distance bin.
    pub weighted_bins: bool,
    /// Which outer fit parameters are released.
    pub fit: FitFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            q_min: 1e-4,
            q_max: 0.5,
            q_bins: 1000,
            q_spacing: QSpacing::Log,
            bin_width: DEFAULT_BIN_WIDTH,
            distance_bins: DEFAULT_DISTANCE_BINS,
            exv_model: ExvModel::default(),
            exv_flavor: ExvFlavor::default(),
            hydration_strategy: HydrationStrategy::default(),
            histogram_manager: ManagerChoice::default(),
            weighted_bins: false,
            fit: FitFlags::default(),
        }
    }
}

impl EngineConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any option is out of range or if the
    /// selected histogram manager requires weighted bins and they are
    /// disabled.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("thread count must be at least 1".to_owned()));
        }
        if !(1e-4..=0.01).contains(&self.q_min) {
            return Err(Error::Config(format!(
                "q_min must lie in [1e-4, 0.01] 1/Å, got {}",
                self.q_min
            )));
        }
        if !(0.1..=1.0).contains(&self.q_max) {
            return Err(Error::Config(format!(
                "q_max must lie in [0.1, 1.0] 1/Å, got {}",
                self.q_max
            )));
        }
        if self.q_bins < 2 {
            return Err(Error::Config(format!(
                "the q-axis needs at least 2 samples, got {}",
                self.q_bins
            )));
        }
        if !(self.bin_width > 0.0) {
            return Err(Error::Config(format!(
                "bin width must be positive, got {}",
                self.bin_width
            )));
        }
        if self.distance_bins == 0 {
            return Err(Error::Config(
                "the distance axis needs at least one bin".to_owned(),
            ));
        }
        if self.histogram_manager.requires_weighted_bins() && !self.weighted_bins {
            return Err(Error::Config(format!(
                "{:?} samples the excluded volume on a regular lattice and requires weighted_bins = true",
                self.histogram_manager
            )));
        }
        if let ExvModel::Custom(volume) = self.exv_model {
            if !(volume > 0.0) {
                return Err(Error::Config(format!(
                    "custom displaced volume must be positive, got {volume}"
                )));
            }
        }
        Ok(())
    }

    /// Generates the q-axis described by this configuration.
    #[must_use]
    pub fn q_axis(&self) -> Vec<f64> {
        axis::q_axis(self.q_min, self.q_max, self.q_bins, self.q_spacing)
    }

    /// Generates the d-axis of nominal bin centers.
    #[must_use]
    pub fn d_axis(&self) -> Vec<f64> {
        axis::d_axis(self.bin_width, self.distance_bins)
    }

    /// Deserializes a configuration from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document does not parse or fails
    /// validation.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes this configuration to YAML.
    ///
    /// # Panics
    ///
    /// Panics if serialization fails, which cannot happen for this type.
    #[must_use]
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_q_limits_are_rejected() {
        let config = EngineConfig {
            q_min: 0.5,
            q_max: 0.1,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn grid_manager_requires_weighted_bins() {
        let config = EngineConfig {
            histogram_manager: ManagerChoice::FFGrid,
            weighted_bins: false,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = EngineConfig {
            histogram_manager: ManagerChoice::FFGrid,
            weighted_bins: true,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_round_trip() {
        let config = EngineConfig {
            q_max: 0.3,
            weighted_bins: true,
            ..EngineConfig::default()
        };
        let restored = EngineConfig::from_yaml(&config.to_yaml()).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml("q_max: 0.25\n").unwrap();
        assert_eq!(config.q_max, 0.25);
        assert_eq!(config.q_bins, 1000);
    }
}
