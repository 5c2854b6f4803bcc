//! Gradient-free minimization primitives for the outer fit.
//!
//! A coarse scan seeds a golden-section refinement per parameter; a
//! Nelder-Mead simplex then refines all released parameters jointly. All
//! routines treat non-finite objective values as "worse than anything" and
//! never terminate on them.

/// A named parameter with a starting guess and hard bounds.
#[derive(Clone, Debug)]
pub struct Parameter {
    /// Parameter name, e.g. `"cw"`.
    pub name: &'static str,
    /// Starting guess, inside the bounds.
    pub guess: f64,
    /// Hard lower and upper bound.
    pub bounds: (f64, f64),
}

impl Parameter {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are inverted.
    #[must_use]
    pub fn new(name: &'static str, guess: f64, bounds: (f64, f64)) -> Self {
        assert!(bounds.0 <= bounds.1);
        Self {
            name,
            guess: guess.clamp(bounds.0, bounds.1),
            bounds,
        }
    }

    /// Width of the allowed interval.
    #[must_use]
    pub fn range(&self) -> f64 {
        self.bounds.1 - self.bounds.0
    }
}

/// One recorded objective evaluation.
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// The full parameter vector.
    pub params: Vec<f64>,
    /// The objective value; may be non-finite for invalid vectors.
    pub fval: f64,
}

/// Every point the minimizer visited, in evaluation order.
#[derive(Clone, Debug, Default)]
pub struct Landscape {
    /// The recorded evaluations.
    pub evals: Vec<Evaluation>,
}

impl Landscape {
    /// Records an evaluation.
    pub fn push(&mut self, params: Vec<f64>, fval: f64) {
        self.evals.push(Evaluation { params, fval });
    }

    /// The best finite evaluation, if any.
    #[must_use]
    pub fn best(&self) -> Option<&Evaluation> {
        self.evals
            .iter()
            .filter(|e| e.fval.is_finite())
            .min_by(|a, b| a.fval.total_cmp(&b.fval))
    }

    /// Number of evaluations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.evals.len()
    }

    /// Whether nothing was evaluated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evals.is_empty()
    }
}

/// Samples `evals` equally spaced points over `bounds` and returns the best
/// `(x, f(x))`.
pub fn scan(f: &mut impl FnMut(f64) -> f64, bounds: (f64, f64), evals: usize) -> (f64, f64) {
    debug_assert!(evals >= 2);
    let step = (bounds.1 - bounds.0) / (evals - 1) as f64;
    let mut best = (bounds.0, f(bounds.0));
    for i in 1..evals {
        let x = (i as f64).mul_add(step, bounds.0);
        let fx = f(x);
        if fx < best.1 {
            best = (x, fx);
        }
    }
    best
}

/// Golden-section search for a local minimum in `[a, b]`.
///
/// Returns the midpoint of the final interval once it is narrower than
/// `tol` or the iteration budget is exhausted.
pub fn golden_section(
    f: &mut impl FnMut(f64) -> f64,
    mut a: f64,
    mut b: f64,
    tol: f64,
    max_iter: usize,
) -> f64 {
    let invphi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let mut c = invphi.mul_add(-(b - a), b);
    let mut d = invphi.mul_add(b - a, a);
    let mut fc = f(c);
    let mut fd = f(d);
    for _ in 0..max_iter {
        if (b - a).abs() < tol {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = invphi.mul_add(-(b - a), b);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = invphi.mul_add(b - a, a);
            fd = f(d);
        }
    }
    0.5 * (a + b)
}

fn clamp_to(bounds: &[(f64, f64)], x: &mut [f64]) {
    for (xi, &(lo, hi)) in x.iter_mut().zip(bounds) {
        *xi = xi.clamp(lo, hi);
    }
}

/// Nelder-Mead simplex minimization with box constraints.
///
/// Terminates when the spread of the simplex values drops below `ftol` or
/// after `max_iter` iterations. Returns the best vertex, its value and
/// whether the tolerance was reached.
pub fn nelder_mead(
    f: &mut impl FnMut(&[f64]) -> f64,
    start: &[f64],
    bounds: &[(f64, f64)],
    ftol: f64,
    max_iter: usize,
) -> (Vec<f64>, f64, bool) {
    let n = start.len();
    debug_assert!(n >= 1 && bounds.len() == n);

    // initial simplex: the start plus one vertex displaced per dimension
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start.to_vec());
    for i in 0..n {
        let mut vertex = start.to_vec();
        let step = 0.05 * (bounds[i].1 - bounds[i].0);
        vertex[i] = if vertex[i] + step <= bounds[i].1 {
            vertex[i] + step
        } else {
            vertex[i] - step
        };
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();

    let mut converged = false;
    for _ in 0..max_iter {
        // order the simplex by value; non-finite values sort last
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let best = order[0];
        let worst = order[n];
        let second_worst = order[n - 1];

        if values[best].is_finite()
            && values[worst].is_finite()
            && (values[worst] - values[best]).abs() < ftol
        {
            converged = true;
            break;
        }

        // centroid of all but the worst vertex
        let mut centroid = vec![0.0; n];
        for (idx, vertex) in simplex.iter().enumerate() {
            if idx == worst {
                continue;
            }
            for (c, &x) in centroid.iter_mut().zip(vertex) {
                *c += x / n as f64;
            }
        }

        let mut reflected: Vec<f64> = centroid
            .iter()
            .zip(&simplex[worst])
            .map(|(&c, &w)| 2.0 * c - w)
            .collect();
        clamp_to(bounds, &mut reflected);
        let f_reflected = f(&reflected);

        if f_reflected < values[best] {
            // try to expand
            let mut expanded: Vec<f64> = centroid
                .iter()
                .zip(&reflected)
                .map(|(&c, &r)| 2.0_f64.mul_add(r - c, c))
                .collect();
            clamp_to(bounds, &mut expanded);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[worst] = expanded;
                values[worst] = f_expanded;
            } else {
                simplex[worst] = reflected;
                values[worst] = f_reflected;
            }
        } else if f_reflected < values[second_worst] {
            simplex[worst] = reflected;
            values[worst] = f_reflected;
        } else {
            // contract towards the centroid
            let mut contracted: Vec<f64> = centroid
                .iter()
                .zip(&simplex[worst])
                .map(|(&c, &w)| 0.5_f64.mul_add(w - c, c))
                .collect();
            clamp_to(bounds, &mut contracted);
            let f_contracted = f(&contracted);
            if f_contracted < values[worst] {
                simplex[worst] = contracted;
                values[worst] = f_contracted;
            } else {
                // shrink everything towards the best vertex
                let best_vertex = simplex[best].clone();
                for (idx, vertex) in simplex.iter_mut().enumerate() {
                    if idx == best {
                        continue;
                    }
                    for (x, &b) in vertex.iter_mut().zip(&best_vertex) {
                        *x = 0.5 * (*x + b);
                    }
                    values[idx] = f(vertex);
                }
            }
        }
    }

    let best = (0..=n)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .expect("simplex is never empty");
    (simplex[best].clone(), values[best], converged)
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn scan_finds_the_coarse_minimum() {
        let mut f = |x: f64| (x - 0.3).powi(2);
        let (x, fx) = scan(&mut f, (0.0, 1.0), 11);
        assert_approx_eq!(f64, x, 0.3, epsilon = 0.051);
        assert!(fx < 0.01);
    }

    #[test]
    fn golden_section_refines_a_quadratic() {
        let mut f = |x: f64| (x - 0.7321).powi(2) + 1.0;
        let x = golden_section(&mut f, 0.0, 2.0, 1e-8, 100);
        assert_approx_eq!(f64, x, 0.7321, epsilon = 1e-6);
    }

    #[test]
    fn nelder_mead_minimizes_a_rosenbrock_valley() {
        let mut f = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let (x, fx, _) = nelder_mead(
            &mut f,
            &[-0.5, 0.5],
            &[(-2.0, 2.0), (-2.0, 2.0)],
            1e-12,
            2000,
        );
        assert!(fx < 1e-6, "fval {fx} at {x:?}");
        assert_approx_eq!(f64, x[0], 1.0, epsilon = 1e-2);
        assert_approx_eq!(f64, x[1], 1.0, epsilon = 1e-2);
    }

    #[test]
    fn nelder_mead_respects_bounds() {
        // unconstrained minimum at -1, outside the box
        let mut f = |x: &[f64]| (x[0] + 1.0).powi(2);
        let (x, _, converged) = nelder_mead(&mut f, &[0.5], &[(0.0, 1.0)], 1e-10, 500);
        assert!(converged);
        assert!(x[0] >= 0.0);
        assert!(x[0] < 1e-3);
    }

    #[test]
    fn non_finite_regions_are_survivable() {
        // a pole next to the minimum must not terminate the search
        let mut f = |x: &[f64]| {
            if x[0] < 0.2 {
                f64::INFINITY
            } else {
                (x[0] - 0.5).powi(2)
            }
        };
        let (x, fx, _) = nelder_mead(&mut f, &[0.9], &[(0.0, 1.0)], 1e-10, 500);
        assert!(fx.is_finite());
        assert_approx_eq!(f64, x[0], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn landscape_best_ignores_invalid_evaluations() {
        let mut landscape = Landscape::default();
        landscape.push(vec![0.0], f64::INFINITY);
        landscape.push(vec![1.0], 3.0);
        landscape.push(vec![2.0], f64::NAN);
        landscape.push(vec![3.0], 1.5);
        assert_approx_eq!(f64, landscape.best().unwrap().fval, 1.5);
        assert_eq!(landscape.len(), 4);
    }
}
