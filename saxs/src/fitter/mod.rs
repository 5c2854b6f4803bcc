//! Fitting of model profiles against measured scattering curves.
//!
//! Two layers: the closed-form [`LinearLeastSquares`] solves for scale and
//! offset on aligned curves; the [`SmartFitter`] minimizes that inner χ²
//! over the hydration, excluded-volume and Debye-Waller parameters.

pub mod least_squares;
pub mod mini;
pub mod smart;
pub mod special;

pub use least_squares::{LinearFitResult, LinearLeastSquares};
pub use mini::{Evaluation, Landscape, Parameter};
pub use smart::{FitCurves, FitResult, FittedParameter, SmartFitter};
