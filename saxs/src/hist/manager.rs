//! The histogram-manager interface and its concrete variants.

use super::composite::{CompositeHistogramEnum, DistanceHistogram};
use super::ff::{ExvResolution, FFHistogramManager};
use super::ffgrid::GridHistogramManager;
use super::partial::PartialHistogramManager;
use super::simple::SimpleHistogramManager;
use crate::config::{EngineConfig, ManagerChoice};
use crate::data::Molecule;
use crate::error::Result;
use enum_dispatch::enum_dispatch;

/// A distance-histogram builder.
///
/// All variants validate their inputs on entry, run their O(N²) work on the
/// process-wide pool, and produce bit-identical results for identical inputs
/// and thread counts.
#[enum_dispatch]
pub trait HistogramManager {
    /// Calculates only the total distance histogram.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Input`] or
    /// [`crate::error::Error::Config`] for invalid inputs.
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram>;

    /// Calculates all partial contributions.
    ///
    /// # Errors
    ///
    /// See [`HistogramManager::calculate`].
    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeHistogramEnum>;
}

/// The histogram-manager variants, selected through
/// [`EngineConfig::histogram_manager`].
#[enum_dispatch(HistogramManager)]
pub enum HistogramManagerEnum {
    /// Plain distance histograms without form factors.
    Simple(SimpleHistogramManager),
    /// Form-factor aware, average or explicit excluded volume.
    FormFactor(FFHistogramManager),
    /// Grid-sampled excluded volume.
    Grid(GridHistogramManager),
    /// The partial-histogram cache.
    Partial(PartialHistogramManager),
}

impl HistogramManagerEnum {
    /// Builds the manager selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Config`] if the configuration is
    /// inconsistent.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(match config.histogram_manager {
            ManagerChoice::Simple => Self::Simple(SimpleHistogramManager::new(config)),
            ManagerChoice::FFAvg => {
                Self::FormFactor(FFHistogramManager::new(config, ExvResolution::Average))
            }
            ManagerChoice::FFExplicit => {
                Self::FormFactor(FFHistogramManager::new(config, ExvResolution::Explicit))
            }
            ManagerChoice::FFGrid => Self::Grid(GridHistogramManager::new(config, false)),
            ManagerChoice::FFGridSurface => Self::Grid(GridHistogramManager::new(config, true)),
            ManagerChoice::Partial => Self::Partial(PartialHistogramManager::new(config)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::ManagerChoice;

    #[test]
    fn every_choice_resolves_to_a_manager() {
        for choice in [
            ManagerChoice::Simple,
            ManagerChoice::FFAvg,
            ManagerChoice::FFExplicit,
            ManagerChoice::Partial,
        ] {
            let config = EngineConfig {
                histogram_manager: choice,
                ..EngineConfig::default()
            };
            assert!(HistogramManagerEnum::from_config(&config).is_ok());
        }

        let config = EngineConfig {
            histogram_manager: ManagerChoice::FFGridSurface,
            weighted_bins: true,
            ..EngineConfig::default()
        };
        assert!(HistogramManagerEnum::from_config(&config).is_ok());
    }

    #[test]
    fn grid_without_weighted_bins_is_rejected_at_construction() {
        let config = EngineConfig {
            histogram_manager: ManagerChoice::FFGrid,
            weighted_bins: false,
            ..EngineConfig::default()
        };
        assert!(HistogramManagerEnum::from_config(&config).is_err());
    }
}
