use super::OptimizeOutcome;

/// Golden-section search for a minimum of `f` on `[a, b]`.
///
/// Stops when the bracket is narrower than `x_tol` or after `max_evals`
/// evaluations; the best point evaluated so far is returned either way.
pub fn golden_section_minimize(
    f: impl Fn(f64) -> f64,
    a: f64,
    b: f64,
    max_evals: usize,
    x_tol: f64,
) -> OptimizeOutcome<f64> {
    // 1/φ
    let inv_phi = 0.5 * (5f64.sqrt() - 1.0);
    let (mut lo, mut hi) = if a <= b { (a, b) } else { (b, a) };

    let mut left = hi - inv_phi * (hi - lo);
    let mut right = lo + inv_phi * (hi - lo);
    let mut f_left = f(left);
    let mut f_right = f(right);
    let mut evaluations = 2;
    let mut best = if f_left < f_right {
        (left, f_left)
    } else {
        (right, f_right)
    };

    while evaluations < max_evals && hi - lo > x_tol {
        let (x, fx) = if f_left < f_right {
            hi = right;
            right = left;
            f_right = f_left;
            left = hi - inv_phi * (hi - lo);
            f_left = f(left);
            (left, f_left)
        } else {
            lo = left;
            left = right;
            f_left = f_right;
            right = lo + inv_phi * (hi - lo);
            f_right = f(right);
            (right, f_right)
        };
        evaluations += 1;
        if fx < best.1 {
            best = (x, fx);
        }
    }

    OptimizeOutcome {
        x: best.0,
        value: best.1,
        evaluations,
        converged: hi - lo <= x_tol,
    }
}
