//! The inner linear least-squares fit.
//!
//! Solves `y ≈ a·m + b` for the scale and offset in closed form, weighted by
//! the measurement errors. Every outer-fitter evaluation runs one of these.

use super::special::gammq;
use crate::error::{Error, Result};
use itertools::izip;

/// Convergence threshold on the goodness-of-fit probability.
const Q_THRESHOLD: f64 = 1e-3;

/// Result of a linear least-squares fit.
#[derive(Clone, Debug)]
pub struct LinearFitResult {
    /// The fitted scale.
    pub scale: f64,
    /// The fitted offset.
    pub offset: f64,
    /// Standard error on the scale.
    pub scale_err: f64,
    /// Standard error on the offset.
    pub offset_err: f64,
    /// The χ² of the fit.
    pub chi2: f64,
    /// Degrees of freedom (`N − 2`).
    pub dof: usize,
    /// The goodness-of-fit probability `Q = gammq((N−2)/2, χ²/2)`.
    pub q: f64,
    /// Whether `Q` exceeds the convergence threshold.
    pub converged: bool,
}

/// A prepared linear least-squares problem.
#[derive(Clone, Debug)]
pub struct LinearLeastSquares {
    data: Vec<f64>,
    model: Vec<f64>,
    inv_sigma2: Vec<f64>,
    has_errors: bool,
}

impl LinearLeastSquares {
    /// Prepares a fit with unity errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if the vectors differ in length or fewer
    /// than three points are given.
    pub fn new(data: &[f64], model: &[f64]) -> Result<Self> {
        Self::build(data, model, None)
    }

    /// Prepares a fit with per-point standard errors.
    ///
    /// # Errors
    ///
    /// As [`LinearLeastSquares::new`]; additionally rejects non-positive
    /// errors.
    pub fn with_errors(data: &[f64], model: &[f64], errors: &[f64]) -> Result<Self> {
        Self::build(data, model, Some(errors))
    }

    fn build(data: &[f64], model: &[f64], errors: Option<&[f64]>) -> Result<Self> {
        if data.len() != model.len() || errors.is_some_and(|e| e.len() != data.len()) {
            return Err(Error::Input(format!(
                "least-squares inputs differ in length: {} data vs {} model points",
                data.len(),
                model.len()
            )));
        }
        if data.len() < 3 {
            return Err(Error::Input(format!(
                "a linear fit needs at least 3 points, got {}",
                data.len()
            )));
        }
        let inv_sigma2 = match errors {
            None => vec![1.0; data.len()],
            Some(errors) => {
                if let Some(&bad) = errors.iter().find(|&&e| !(e > 0.0) || !e.is_finite()) {
                    return Err(Error::Input(format!("invalid measurement error {bad}")));
                }
                errors.iter().map(|&e| 1.0 / (e * e)).collect()
            }
        };
        Ok(Self {
            data: data.to_vec(),
            model: model.to_vec(),
            inv_sigma2,
            has_errors: errors.is_some(),
        })
    }

    /// Solves for `(scale, offset, scale_err², offset_err²)` without
    /// goodness-of-fit bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Numerical`] for a singular system, i.e. a model
    /// without spread.
    pub fn fit_params_only(&self) -> Result<[f64; 4]> {
        let mut s = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (&m, &y, &w) in izip!(&self.model, &self.data, &self.inv_sigma2) {
            s += w;
            sx += m * w;
            sy += y * w;
            sxx += m * m * w;
            sxy += m * y * w;
        }

        let delta = s.mul_add(sxx, -(sx * sx));
        if delta.abs() < 1e-12 * (s * sxx).abs() || !delta.is_finite() {
            return Err(Error::Numerical(format!(
                "singular system in the linear fit (Δ = {delta})"
            )));
        }
        let a = s.mul_add(sxy, -(sx * sy)) / delta;
        let b = sxx.mul_add(sy, -(sx * sxy)) / delta;
        Ok([a, b, s / delta, sxx / delta])
    }

    /// The χ² of a given `(scale, offset)` pair.
    #[must_use]
    pub fn chi2(&self, scale: f64, offset: f64) -> f64 {
        izip!(&self.model, &self.data, &self.inv_sigma2)
            .map(|(&m, &y, &w)| {
                let r = y - scale.mul_add(m, offset);
                r * r * w
            })
            .sum()
    }

    /// The best-fit χ²: solve and evaluate in one step.
    ///
    /// # Errors
    ///
    /// See [`LinearLeastSquares::fit_params_only`].
    pub fn fit_chi2_only(&self) -> Result<f64> {
        let [a, b, _, _] = self.fit_params_only()?;
        Ok(self.chi2(a, b))
    }

    /// Performs the full fit, including errors and the goodness-of-fit
    /// probability.
    ///
    /// Without measurement errors the parameter uncertainties are rescaled
    /// by `√(χ²/dof)`, following the Numerical Recipes convention.
    ///
    /// # Errors
    ///
    /// See [`LinearLeastSquares::fit_params_only`].
    pub fn fit(&self) -> Result<LinearFitResult> {
        let [a, b, a_err2, b_err2] = self.fit_params_only()?;
        let chi2 = self.chi2(a, b);
        let dof = self.data.len() - 2;
        let q = gammq(dof as f64 / 2.0, chi2 / 2.0);

        let rescale = if self.has_errors {
            1.0
        } else {
            (chi2 / dof as f64).sqrt()
        };

        Ok(LinearFitResult {
            scale: a,
            offset: b,
            scale_err: a_err2.sqrt() * rescale,
            offset_err: b_err2.sqrt() * rescale,
            chi2,
            dof,
            q,
            converged: q > Q_THRESHOLD,
        })
    }

    /// The residuals `(y − a·m − b)/σ` for a given parameter pair.
    #[must_use]
    pub fn residuals(&self, scale: f64, offset: f64) -> Vec<f64> {
        izip!(&self.model, &self.data, &self.inv_sigma2)
            .map(|(&m, &y, &w)| (y - scale.mul_add(m, offset)) * w.sqrt())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rand::Rng;
    use rand_pcg::Pcg64;

    #[test]
    fn exact_line_is_recovered_exactly() {
        let model: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.1).collect();
        let data: Vec<f64> = model.iter().map(|m| 2.0 * m + 3.0).collect();
        let fit = LinearLeastSquares::new(&data, &model).unwrap().fit().unwrap();
        assert_approx_eq!(f64, fit.scale, 2.0, epsilon = 1e-12);
        assert_approx_eq!(f64, fit.offset, 3.0, epsilon = 1e-12);
        assert!(fit.chi2 < 1e-20);
    }

    #[test]
    fn noisy_line_is_recovered_within_uncertainty() {
        let mut rng = Pcg64::new(0xcafef00dd15ea5e5, 0xa02bdbf7bb3c0a7);
        let model: Vec<f64> = (0..200).map(|i| f64::from(i) * 0.05).collect();
        let sigma = 0.05;
        let data: Vec<f64> = model
            .iter()
            .map(|m| {
                // Box-Muller
                let u1: f64 = rng.gen::<f64>().max(1e-12);
                let u2: f64 = rng.gen();
                let gauss =
                    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                2.0 * m + 3.0 + sigma * gauss
            })
            .collect();
        let errors = vec![sigma; data.len()];
        let fit = LinearLeastSquares::with_errors(&data, &model, &errors)
            .unwrap()
            .fit()
            .unwrap();

        assert!((fit.scale - 2.0).abs() < 3.0 * fit.scale_err);
        assert!((fit.offset - 3.0).abs() < 3.0 * fit.offset_err);
        assert!(fit.q > 1e-3);
        assert!(fit.converged);
        let reduced = fit.chi2 / fit.dof as f64;
        assert!((0.5..2.0).contains(&reduced), "χ²/dof = {reduced}");
    }

    #[test]
    fn constant_model_is_singular() {
        let model = vec![1.0; 10];
        let data: Vec<f64> = (0..10).map(f64::from).collect();
        let result = LinearLeastSquares::new(&data, &model).unwrap().fit();
        assert!(matches!(result, Err(Error::Numerical(_))));
    }

    #[test]
    fn unity_errors_are_rescaled() {
        let model: Vec<f64> = (0..20).map(f64::from).collect();
        let data: Vec<f64> = model
            .iter()
            .enumerate()
            .map(|(i, m)| 1.5 * m + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let unscaled = LinearLeastSquares::new(&data, &model).unwrap().fit().unwrap();
        // with σ = 1 the χ² is tiny relative to dof, so the rescaled errors
        // shrink below the naive ones
        let naive = LinearLeastSquares::with_errors(&data, &model, &vec![1.0; 20])
            .unwrap()
            .fit()
            .unwrap();
        assert!(unscaled.scale_err < naive.scale_err);
        assert_approx_eq!(f64, unscaled.scale, naive.scale, epsilon = 1e-12);
    }

    #[test]
    fn too_few_points_are_rejected() {
        assert!(matches!(
            LinearLeastSquares::new(&[1.0, 2.0], &[1.0, 2.0]),
            Err(Error::Input(_))
        ));
    }
}
