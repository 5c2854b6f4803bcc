//! The outer, hydration-aware fitter.
//!
//! Minimizes the χ² of the inner linear fit over the released model
//! parameters `{cw, cx, cd, cx_dw}`. Each objective evaluation produces a
//! model curve from the composite histogram (an O(|Q|) recombination after
//! the first), splices it onto the data grid and solves the inner linear
//! system for scale and offset.

use super::least_squares::LinearLeastSquares;
use super::mini::{self, Landscape, Parameter};
use crate::config::FitFlags;
use crate::error::{Error, Result};
use crate::hist::composite::{CompositeHistogram, CompositeHistogramEnum, FitParams};
use crate::profile::DataCurve;
use log::debug;

/// Bounds of the two Debye-Waller parameters.
const DW_BOUNDS: (f64, f64) = (0.0, 4.0);

/// Default evaluation budget of one minimization.
const DEFAULT_BUDGET: usize = 1000;

/// Termination threshold on the objective improvement.
const FTOL: f64 = 1e-6;

/// Iteration cap of the joint simplex refinement.
const MAX_REFINE_ITER: usize = 200;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParamKind {
    Cw,
    Cx,
    Cd,
    CxDw,
}

impl ParamKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Cw => "cw",
            Self::Cx => "cx",
            Self::Cd => "cd",
            Self::CxDw => "cx_dw",
        }
    }

    fn apply(self, params: &mut FitParams, value: f64) {
        match self {
            Self::Cw => params.cw = value,
            Self::Cx => params.cx = value,
            Self::Cd => params.cd = value,
            Self::CxDw => params.cx_dw = value,
        }
    }
}

/// A fitted (or held) parameter with its uncertainty.
#[derive(Clone, Debug)]
pub struct FittedParameter {
    /// Parameter name.
    pub name: &'static str,
    /// Best-fit value.
    pub value: f64,
    /// Standard error; zero for parameters that were held fixed.
    pub error: f64,
}

/// The data and model curves of a finished fit, aligned on the accepted
/// subset of the data grid.
#[derive(Clone, Debug)]
pub struct FitCurves {
    /// The q values.
    pub q: Vec<f64>,
    /// The measured intensities.
    pub data: Vec<f64>,
    /// The measurement errors, if the curve carried any.
    pub data_err: Option<Vec<f64>>,
    /// The fitted model, scale and offset applied.
    pub model: Vec<f64>,
    /// The normalized residuals `(y − a·m − b)/σ`.
    pub residuals: Vec<f64>,
}

/// The result of a [`SmartFitter::fit`] call.
#[derive(Clone, Debug)]
pub struct FitResult {
    /// All six parameters: cw, cx, cd, cx_dw, scale, offset.
    pub params: Vec<FittedParameter>,
    /// The best χ².
    pub chi2: f64,
    /// Degrees of freedom.
    pub dof: usize,
    /// Number of objective evaluations.
    pub calls: usize,
    /// Whether the minimizer reached its tolerance within the budget.
    pub converged: bool,
    /// The aligned curves.
    pub curves: FitCurves,
    /// Every evaluated point.
    pub evaluated_points: Landscape,
}

impl FitResult {
    /// Looks up a parameter by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&FittedParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// The reduced χ².
    #[must_use]
    pub fn reduced_chi2(&self) -> f64 {
        self.chi2 / self.dof as f64
    }
}

/// Linearly interpolates the model onto the data grid. Points outside the
/// model's q-range are dropped; the returned indices refer to the data grid.
pub(crate) fn splice(model_q: &[f64], model_i: &[f64], data_q: &[f64]) -> Vec<(usize, f64)> {
    if model_q.len() < 2 {
        return Vec::new();
    }
    let (first, last) = (model_q[0], model_q[model_q.len() - 1]);
    let mut out = Vec::with_capacity(data_q.len());
    let mut hi = 1;
    for (idx, &q) in data_q.iter().enumerate() {
        if q < first || q > last {
            continue;
        }
        while hi + 1 < model_q.len() && model_q[hi] < q {
            hi += 1;
        }
        let lo = hi - 1;
        let span = model_q[hi] - model_q[lo];
        let t = if span > 0.0 { (q - model_q[lo]) / span } else { 0.0 };
        out.push((idx, t.mul_add(model_i[hi] - model_i[lo], model_i[lo])));
    }
    out
}

/// The outer non-linear fitter.
pub struct SmartFitter<'a> {
    data: DataCurve,
    model: &'a mut CompositeHistogramEnum,
    flags: FitFlags,
    budget: usize,
}

impl<'a> SmartFitter<'a> {
    /// Prepares a fit of `model` against `data`.
    pub fn new(data: DataCurve, model: &'a mut CompositeHistogramEnum, flags: FitFlags) -> Self {
        Self {
            data,
            model,
            flags,
            budget: DEFAULT_BUDGET,
        }
    }

    /// Overrides the evaluation budget.
    #[must_use]
    pub const fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    fn active_parameters(&self) -> Vec<(ParamKind, Parameter)> {
        let mut active = Vec::new();
        if self.flags.hydration {
            active.push((
                ParamKind::Cw,
                Parameter::new("cw", 1.0, self.model.water_scaling_limits()),
            ));
        }
        if self.flags.excluded_volume && self.model.has_excluded_volume() {
            active.push((
                ParamKind::Cx,
                Parameter::new("cx", 1.0, self.model.exv_scaling_limits()),
            ));
        }
        if self.flags.atomic_debye_waller {
            active.push((ParamKind::Cd, Parameter::new("cd", 0.0, DW_BOUNDS)));
        }
        if self.flags.exv_debye_waller && self.model.has_excluded_volume() {
            active.push((ParamKind::CxDw, Parameter::new("cx_dw", 0.0, DW_BOUNDS)));
        }
        active
    }

    fn fit_params(active: &[(ParamKind, Parameter)], values: &[f64]) -> FitParams {
        let mut params = FitParams::default();
        for ((kind, _), &value) in active.iter().zip(values) {
            kind.apply(&mut params, value);
        }
        params
    }

    /// Runs the minimization.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] if fewer than `3 + n_params` data points
    /// overlap the model's q-range, and [`Error::Numerical`] if the model
    /// scatters nothing or every single evaluation produced a non-finite
    /// χ².
    pub fn fit(&mut self) -> Result<FitResult> {
        let model_q = self.model.q_axis().to_vec();
        let base = self.model.intensity(&FitParams::default());
        if base.iter().all(|&v| v == 0.0) {
            return Err(Error::Numerical(
                "the model scatters nothing; every intensity is zero".to_owned(),
            ));
        }

        // the accepted subset of the data grid
        let accepted: Vec<usize> = splice(&model_q, &base, self.data.q())
            .into_iter()
            .map(|(idx, _)| idx)
            .collect();
        let active = self.active_parameters();
        if accepted.len() < 3 + active.len() {
            return Err(Error::Input(format!(
                "only {} data points overlap the model q-range, need at least {}",
                accepted.len(),
                3 + active.len()
            )));
        }
        let q_sub: Vec<f64> = accepted.iter().map(|&i| self.data.q()[i]).collect();
        let y_sub: Vec<f64> = accepted.iter().map(|&i| self.data.y()[i]).collect();
        let err_sub: Option<Vec<f64>> = self
            .data
            .yerr()
            .map(|err| accepted.iter().map(|&i| err[i]).collect());

        let mut landscape = Landscape::default();
        let mut calls = 0usize;

        macro_rules! objective {
            ($values:expr) => {{
                let values: &[f64] = $values;
                let params = Self::fit_params(&active, values);
                let intensity = self.model.intensity(&params);
                let spliced: Vec<f64> = splice(&model_q, &intensity, &q_sub)
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                let chi2 = if spliced.len() == q_sub.len() {
                    let lls = match &err_sub {
                        Some(err) => LinearLeastSquares::with_errors(&y_sub, &spliced, err),
                        None => LinearLeastSquares::new(&y_sub, &spliced),
                    };
                    lls.and_then(|lls| lls.fit_chi2_only())
                        .unwrap_or(f64::INFINITY)
                } else {
                    f64::INFINITY
                };
                let chi2 = if chi2.is_finite() { chi2 } else { f64::INFINITY };
                landscape.push(values.to_vec(), chi2);
                calls += 1;
                chi2
            }};
        }

        let mut current: Vec<f64> = active.iter().map(|(_, p)| p.guess).collect();
        let bounds: Vec<(f64, f64)> = active.iter().map(|(_, p)| p.bounds).collect();

        let mut nm_converged = true;
        if active.is_empty() {
            objective!(&current);
        } else {
            // per-parameter seeding: coarse scan, then golden-section
            for k in 0..active.len() {
                let (lo, hi) = bounds[k];
                let range = hi - lo;
                let mut line = current.clone();
                let mut f = |x: f64| {
                    line[k] = x;
                    objective!(&line)
                };
                let (seed, _) = mini::scan(&mut f, (lo, hi), 15);
                let step = range / 14.0;
                current[k] = mini::golden_section(
                    &mut f,
                    (seed - step).max(lo),
                    (seed + step).min(hi),
                    1e-3 * range,
                    32,
                );
            }

            // joint refinement of the seeded start; each simplex iteration
            // costs one or more evaluations, so the iteration cap enforces
            // the budget
            let remaining = (self.budget.saturating_sub(calls).max(10) / 2).min(MAX_REFINE_ITER);
            let refined = mini::nelder_mead(&mut |v| objective!(v), &current, &bounds, FTOL, remaining);
            nm_converged = refined.2;
            debug!(
                "outer fit finished after {calls} evaluations (converged: {nm_converged})"
            );
            if !nm_converged && calls >= self.budget {
                debug!("evaluation budget of {} exhausted", self.budget);
            }
        }

        let best = landscape
            .best()
            .ok_or_else(|| {
                Error::Numerical(format!(
                    "no finite chi-square in {calls} evaluations"
                ))
            })?
            .clone();
        let converged = nm_converged;

        // curvature-based uncertainties at the minimum
        let mut errors = vec![0.0; active.len()];
        for k in 0..active.len() {
            let range = bounds[k].1 - bounds[k].0;
            let h = 1e-3 * range;
            let mut plus = best.params.clone();
            let mut minus = best.params.clone();
            plus[k] = (plus[k] + h).min(bounds[k].1);
            minus[k] = (minus[k] - h).max(bounds[k].0);
            let fp = objective!(&plus);
            let fm = objective!(&minus);
            let d2 = (fp + fm - 2.0 * best.fval) / (h * h);
            if d2.is_finite() && d2 > 0.0 {
                errors[k] = (2.0 / d2).sqrt();
            }
        }

        // final inner fit at the optimum
        let best_params = Self::fit_params(&active, &best.params);
        let intensity = self.model.intensity(&best_params);
        let spliced: Vec<f64> = splice(&model_q, &intensity, &q_sub)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        let lls = match &err_sub {
            Some(err) => LinearLeastSquares::with_errors(&y_sub, &spliced, err)?,
            None => LinearLeastSquares::new(&y_sub, &spliced)?,
        };
        let inner = lls.fit()?;

        let mut params = Vec::with_capacity(6);
        for (kind, value) in [
            (ParamKind::Cw, best_params.cw),
            (ParamKind::Cx, best_params.cx),
            (ParamKind::Cd, best_params.cd),
            (ParamKind::CxDw, best_params.cx_dw),
        ] {
            let error = active
                .iter()
                .position(|(k, _)| *k == kind)
                .map_or(0.0, |idx| errors[idx]);
            params.push(FittedParameter {
                name: kind.name(),
                value,
                error,
            });
        }
        params.push(FittedParameter {
            name: "scale",
            value: inner.scale,
            error: inner.scale_err,
        });
        params.push(FittedParameter {
            name: "offset",
            value: inner.offset,
            error: inner.offset_err,
        });

        let model_curve: Vec<f64> = spliced
            .iter()
            .map(|&m| inner.scale.mul_add(m, inner.offset))
            .collect();
        let residuals = lls.residuals(inner.scale, inner.offset);
        let dof = q_sub.len() - 2 - active.len();

        Ok(FitResult {
            params,
            chi2: inner.chi2,
            dof,
            calls,
            converged,
            curves: FitCurves {
                q: q_sub,
                data: y_sub,
                data_err: err_sub,
                model: model_curve,
                residuals,
            },
            evaluated_points: landscape,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn splice_interpolates_linearly() {
        let model_q = [0.0, 1.0, 2.0];
        let model_i = [0.0, 10.0, 40.0];
        let data_q = [-0.5, 0.5, 1.5, 2.5];
        let spliced = splice(&model_q, &model_i, &data_q);
        // the two out-of-range points are dropped
        assert_eq!(spliced.len(), 2);
        assert_eq!(spliced[0].0, 1);
        assert_approx_eq!(f64, spliced[0].1, 5.0);
        assert_eq!(spliced[1].0, 2);
        assert_approx_eq!(f64, spliced[1].1, 25.0);
    }

    #[test]
    fn splice_hits_grid_points_exactly() {
        let model_q = [0.1, 0.2, 0.3];
        let model_i = [1.0, 2.0, 3.0];
        let spliced = splice(&model_q, &model_i, &model_q);
        assert_eq!(spliced.len(), 3);
        for (k, (_, v)) in spliced.iter().enumerate() {
            assert_approx_eq!(f64, *v, model_i[k], epsilon = 1e-12);
        }
    }
}
