use tracing::trace;

use super::{OptimizeOutcome, OptimizerConfig};

/// Box constraints, applied by projecting every trial vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    /// Lower limit per parameter.
    pub lower: Vec<f64>,
    /// Upper limit per parameter.
    pub upper: Vec<f64>,
}

impl Bounds {
    /// No limits in `n` dimensions.
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    fn project(&self, x: &mut [f64]) {
        for ((v, lo), hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(*lo, *hi);
        }
    }
}

/// Bounded Nelder–Mead simplex search.
///
/// `step` sets the initial simplex edge per parameter and also scales the
/// convergence test. After convergence the simplex is rebuilt around the best
/// vertex up to `cfg.restarts` times, which guards against premature collapse.
pub fn nelder_mead_minimize(
    f: impl Fn(&[f64]) -> f64,
    x0: &[f64],
    step: &[f64],
    bounds: &Bounds,
    cfg: &OptimizerConfig,
) -> OptimizeOutcome<Vec<f64>> {
    let n = x0.len();
    let mut best = x0.to_vec();
    bounds.project(&mut best);
    let mut best_val = eval(&f, &best);
    let mut evals = 1usize;
    let mut converged = false;

    if n == 0 {
        return OptimizeOutcome {
            x: best,
            value: best_val,
            evaluations: evals,
            converged: true,
        };
    }

    for round in 0..=cfg.restarts {
        let budget = cfg.max_evaluations.saturating_sub(evals);
        if budget <= n + 1 {
            break;
        }
        let run = simplex_run(&f, &best, best_val, step, bounds, cfg, budget);
        evals += run.evaluations;
        let improvement = best_val - run.value;
        if run.value <= best_val {
            best = run.x;
            best_val = run.value;
        }
        converged = run.converged;
        trace!(round, value = best_val, evals, "nelder-mead round");
        if !run.converged || improvement.abs() <= cfg.f_tolerance * (1.0 + best_val.abs()) {
            break;
        }
    }

    OptimizeOutcome {
        x: best,
        value: best_val,
        evaluations: evals,
        converged,
    }
}

fn eval(f: &impl Fn(&[f64]) -> f64, x: &[f64]) -> f64 {
    let v = f(x);
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}

fn simplex_run(
    f: &impl Fn(&[f64]) -> f64,
    start: &[f64],
    start_val: f64,
    step: &[f64],
    bounds: &Bounds,
    cfg: &OptimizerConfig,
    budget: usize,
) -> OptimizeOutcome<Vec<f64>> {
    const ALPHA: f64 = 1.0;
    const GAMMA: f64 = 2.0;
    const RHO: f64 = 0.5;
    const SIGMA: f64 = 0.5;

    let n = start.len();
    let mut evals = 0usize;
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    simplex.push((start.to_vec(), start_val));
    for i in 0..n {
        let mut v = start.to_vec();
        v[i] += step[i];
        if v[i] > bounds.upper[i] {
            v[i] = start[i] - step[i];
        }
        bounds.project(&mut v);
        let fv = eval(f, &v);
        evals += 1;
        simplex.push((v, fv));
    }

    let scale: Vec<f64> = step.iter().map(|s| s.abs().max(1e-300)).collect();
    let mut converged = false;

    // One iteration costs at most n + 2 evaluations (reflect, contract, shrink).
    while evals + n + 2 <= budget {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let f_best = simplex[0].1;
        let f_worst = simplex[n].1;
        let size = simplex[1..]
            .iter()
            .flat_map(|(v, _)| {
                v.iter()
                    .zip(&simplex[0].0)
                    .zip(&scale)
                    .map(|((a, b), s)| (a - b).abs() / s)
            })
            .fold(0.0, f64::max);
        if size <= cfg.x_tolerance && (f_worst - f_best) <= cfg.f_tolerance * (1.0 + f_best.abs())
        {
            converged = true;
            break;
        }

        let mut centroid = vec![0.0; n];
        for (v, _) in &simplex[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let towards = |coef: f64| -> Vec<f64> {
            let mut p: Vec<f64> = centroid
                .iter()
                .zip(&simplex[n].0)
                .map(|(c, w)| c + coef * (c - w))
                .collect();
            bounds.project(&mut p);
            p
        };

        let xr = towards(ALPHA);
        let fr = eval(f, &xr);
        evals += 1;

        if fr < f_best {
            let xe = towards(GAMMA);
            let fe = eval(f, &xe);
            evals += 1;
            simplex[n] = if fe < fr { (xe, fe) } else { (xr, fr) };
            continue;
        }
        if fr < simplex[n - 1].1 {
            simplex[n] = (xr, fr);
            continue;
        }

        let (xc, fc) = if fr < f_worst {
            let xc = towards(RHO);
            let fc = eval(f, &xc);
            (xc, fc)
        } else {
            let xc = towards(-RHO);
            let fc = eval(f, &xc);
            (xc, fc)
        };
        evals += 1;
        if fc < f_worst.min(fr) {
            simplex[n] = (xc, fc);
            continue;
        }

        // Shrink toward the best vertex.
        let best = simplex[0].0.clone();
        for (v, fv) in simplex.iter_mut().skip(1) {
            for (x, b) in v.iter_mut().zip(&best) {
                *x = b + SIGMA * (*x - b);
            }
            bounds.project(v);
            *fv = eval(f, v);
            evals += 1;
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (x, value) = simplex.swap_remove(0);
    OptimizeOutcome {
        x,
        value,
        evaluations: evals,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rosenbrock(x: &[f64]) -> f64 {
        (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
    }

    #[test]
    fn rosenbrock_minimum() {
        let cfg = OptimizerConfig::default();
        let out = nelder_mead_minimize(
            rosenbrock,
            &[-1.2, 1.0],
            &[0.1, 0.1],
            &Bounds::unbounded(2),
            &cfg,
        );
        assert_relative_eq!(out.x[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(out.x[1], 1.0, epsilon = 1e-5);
        assert!(out.evaluations <= cfg.max_evaluations);
    }

    #[test]
    fn bounds_are_respected() {
        let bounds = Bounds {
            lower: vec![0.5, f64::NEG_INFINITY],
            upper: vec![2.0, f64::INFINITY],
        };
        let out = nelder_mead_minimize(
            |x| x[0] * x[0] + (x[1] - 3.0).powi(2),
            &[1.5, 0.0],
            &[0.2, 0.5],
            &bounds,
            &OptimizerConfig::default(),
        );
        assert_relative_eq!(out.x[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(out.x[1], 3.0, epsilon = 1e-5);
    }

    #[test]
    fn tiny_budget_still_returns_best_seen() {
        let cfg = OptimizerConfig {
            max_evaluations: 10,
            ..Default::default()
        };
        let x0 = [5.0, 5.0, 5.0];
        let f = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>();
        let out = nelder_mead_minimize(f, &x0, &[1.0; 3], &Bounds::unbounded(3), &cfg);
        assert!(!out.converged);
        assert!(out.value <= f(&x0));
        assert!(out.evaluations <= 10);
    }
}
