//! Scattering profiles and measured data curves.

use crate::error::{Error, Result};

/// A computed intensity profile on the engine q-axis.
#[derive(Clone, Debug, PartialEq)]
pub struct ScatteringProfile {
    q: Vec<f64>,
    intensity: Vec<f64>,
}

impl ScatteringProfile {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if the two vectors differ in length.
    #[must_use]
    pub fn new(q: Vec<f64>, intensity: Vec<f64>) -> Self {
        assert_eq!(q.len(), intensity.len());
        Self { q, intensity }
    }

    /// The q-axis.
    #[must_use]
    pub fn q(&self) -> &[f64] {
        &self.q
    }

    /// The intensities, aligned with [`ScatteringProfile::q`].
    #[must_use]
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// Whether the profile is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Returns the profile as `(q, I)` pairs.
    #[must_use]
    pub fn evaluate(&self) -> Vec<(f64, f64)> {
        self.q.iter().copied().zip(self.intensity.iter().copied()).collect()
    }

    /// Converts the profile into an errorless data curve, e.g. to fit a model
    /// against itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the profile is degenerate (see
    /// [`DataCurve::new`]).
    pub fn as_curve(&self) -> Result<DataCurve> {
        DataCurve::new(self.q.clone(), self.intensity.clone(), None)
    }
}

/// A measured scattering curve `(q, y, σ)`.
///
/// The error column is optional; without it the fitter assumes unity errors
/// and rescales the reported parameter uncertainties by `√(χ²/dof)`.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCurve {
    q: Vec<f64>,
    y: Vec<f64>,
    yerr: Option<Vec<f64>>,
}

impl DataCurve {
    /// Constructor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the curve is empty, the columns differ in
    /// length, any value is non-finite, any error is non-positive, or the
    /// q-column is not strictly increasing.
    pub fn new(q: Vec<f64>, y: Vec<f64>, yerr: Option<Vec<f64>>) -> Result<Self> {
        if q.is_empty() {
            return Err(Error::Input("data curve is empty".to_owned()));
        }
        if q.len() != y.len() || yerr.as_ref().is_some_and(|e| e.len() != q.len()) {
            return Err(Error::Input(format!(
                "data curve columns differ in length: {} q-values vs {} intensities",
                q.len(),
                y.len()
            )));
        }
        if let Some((i, _)) = q
            .iter()
            .zip(&y)
            .enumerate()
            .find(|(_, (&qi, &yi))| !qi.is_finite() || !yi.is_finite())
        {
            return Err(Error::Input(format!("data curve row {i} is not finite")));
        }
        if let Some(w) = q.windows(2).find(|w| w[0] >= w[1]) {
            return Err(Error::Input(format!(
                "data curve q-values must be strictly increasing, found {} after {}",
                w[1], w[0]
            )));
        }
        if let Some(errors) = &yerr {
            if let Some((i, &e)) = errors
                .iter()
                .enumerate()
                .find(|(_, &e)| !e.is_finite() || e <= 0.0)
            {
                return Err(Error::Input(format!(
                    "data curve row {i} has an invalid error {e}"
                )));
            }
        }
        Ok(Self { q, y, yerr })
    }

    /// Builds a curve from `(q, y, σ)` rows.
    ///
    /// # Errors
    ///
    /// See [`DataCurve::new`].
    pub fn from_points(points: &[(f64, f64, f64)]) -> Result<Self> {
        let q = points.iter().map(|p| p.0).collect();
        let y = points.iter().map(|p| p.1).collect();
        let yerr = points.iter().map(|p| p.2).collect();
        Self::new(q, y, Some(yerr))
    }

    /// The q-column.
    #[must_use]
    pub fn q(&self) -> &[f64] {
        &self.q
    }

    /// The intensity column.
    #[must_use]
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    /// The error column, if present.
    #[must_use]
    pub fn yerr(&self) -> Option<&[f64]> {
        self.yerr.as_deref()
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// Whether the curve is empty. Construction rejects empty curves, so
    /// this is always `false` for a validated curve.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn non_monotonic_q_is_rejected() {
        let result = DataCurve::new(vec![0.1, 0.3, 0.2], vec![1.0, 2.0, 3.0], None);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn non_positive_errors_are_rejected() {
        let result = DataCurve::new(
            vec![0.1, 0.2],
            vec![1.0, 2.0],
            Some(vec![0.1, 0.0]),
        );
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn profile_round_trips_into_a_curve() {
        let profile = ScatteringProfile::new(vec![0.1, 0.2], vec![10.0, 5.0]);
        let curve = profile.as_curve().unwrap();
        assert_eq!(curve.q(), profile.q());
        assert_eq!(curve.y(), profile.intensity());
        assert!(curve.yerr().is_none());
    }
}
