//! Constrained 3×3 eigenproblem used by the direct ellipse fit.

use nalgebra::{Matrix3, Vector3};

/// Eigenvector of `system = C1⁻¹ M` that satisfies the ellipse constraint
/// `4 a c − b² > 0`.
///
/// `system` is not symmetric, so eigenvalues come from its real Schur form
/// and each eigenvector is the right singular vector of `system − λI` with
/// the smallest singular value. Among admissible vectors the one with the
/// smallest |λ| wins.
pub(crate) fn ellipse_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    system
        .complex_eigenvalues()
        .iter()
        .filter(|ev| ev.im.abs() <= 1e-9 * ev.re.abs().max(1.0))
        .filter_map(|ev| {
            let v = null_vector(&(system - Matrix3::identity() * ev.re))?;
            (4.0 * v[0] * v[2] - v[1] * v[1] > 0.0).then_some((ev.re.abs(), v))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, v)| v)
}

/// Unit vector spanning the (numerical) null space of a rank-deficient matrix.
fn null_vector(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let svd = m.svd(false, true);
    let v_t = svd.v_t?;
    let (k, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let v: Vector3<f64> = v_t.row(k).transpose();
    let n = v.norm();
    (n > 1e-15).then(|| v / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn picks_the_admissible_eigenvector() {
        // Only the eigenvector (1, 0, 1) satisfies the ellipse constraint.
        let basis = Matrix3::new(1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, -1.0, 0.0);
        let diag = Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 3.0));
        let system = basis * diag * basis.try_inverse().unwrap();

        let v = ellipse_eigenvector(&system).unwrap();
        let expected = Vector3::new(1.0, 0.0, 1.0).normalize();
        let aligned = if v.dot(&expected) < 0.0 { -v } else { v };
        assert_relative_eq!(aligned, expected, epsilon = 1e-9);
        assert_relative_eq!(system * v, v * 2.0, epsilon = 1e-9);
    }

    #[test]
    fn no_admissible_vector() {
        let diag = Matrix3::from_diagonal(&Vector3::new(1.0, 2.0, 3.0));
        assert!(ellipse_eigenvector(&diag).is_none());
    }
}
