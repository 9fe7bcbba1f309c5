//! Direct least-squares ellipse fit (Fitzgibbon et al., 1999) and an
//! algebraic circle fit for short point lists.

use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

use super::eigen::ellipse_eigenvector;
use super::types::{ConicCoeffs, Ellipse};

/// Fit a conic constrained to be an ellipse.
///
/// Needs at least 6 points. The reduced 3×3 eigensystem
/// `C1⁻¹ (S11 − S12 S22⁻¹ S21) a1 = λ a1` is solved in normalised
/// coordinates, then mapped back.
pub fn fit_conic_direct(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < 6 {
        return None;
    }

    let norm = Normalization::of(points);
    let s = points.iter().fold(Matrix6::<f64>::zeros(), |acc, p| {
        let [x, y] = norm.apply(*p);
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        acc + row * row.transpose()
    });
    let s11 = s.fixed_view::<3, 3>(0, 0).into_owned();
    let s12 = s.fixed_view::<3, 3>(0, 3).into_owned();
    let s22 = s.fixed_view::<3, 3>(3, 3).into_owned();

    // 4AC − B² = 1
    let c1 = Matrix3::new(0.0, 0.0, 2.0, 0.0, -1.0, 0.0, 2.0, 0.0, 0.0);

    let s22_inv = s22.try_inverse()?;
    let m = s11 - s12 * s22_inv * s12.transpose();
    let system = c1.try_inverse()? * m;

    let a1 = ellipse_eigenvector(&system)?;
    let a2 = -s22_inv * s12.transpose() * a1;

    let conic = ConicCoeffs(norm.denormalize(&Vector6::new(
        a1[0], a1[1], a1[2], a2[0], a2[1], a2[2],
    )));
    if !conic.is_ellipse() {
        return None;
    }
    let ellipse = conic.to_ellipse()?;
    if !ellipse.is_valid() {
        return None;
    }
    Some(conic)
}

/// Geometric ellipse from [`fit_conic_direct`].
pub fn fit_ellipse_direct(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_direct(points)?.to_ellipse()
}

/// Algebraic (Kåsa) circle fit: least squares on `x² + y² + D x + E y + F = 0`.
///
/// Needs at least 3 non-collinear points.
pub fn fit_circle_algebraic(points: &[[f64; 2]]) -> Option<Ellipse> {
    if points.len() < 3 {
        return None;
    }
    let norm = Normalization::of(points);
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    for p in points {
        let [x, y] = norm.apply(*p);
        let row = Vector3::new(x, y, 1.0);
        ata += row * row.transpose();
        atb += row * -(x * x + y * y);
    }
    let n = points.len() as f64;
    if ata.determinant().abs() < 1e-9 * n * n * n {
        return None;
    }
    let sol = ata.try_inverse()? * atb;
    let (cx, cy) = (-sol[0] / 2.0, -sol[1] / 2.0);
    let r2 = cx * cx + cy * cy - sol[2];
    if !r2.is_finite() || r2 <= 0.0 {
        return None;
    }
    let inv = 1.0 / norm.scale;
    let circle = Ellipse::circle(
        cx * inv + norm.mean[0],
        cy * inv + norm.mean[1],
        r2.sqrt() * inv,
    );
    circle.is_valid().then_some(circle)
}

/// RMS Sampson distance of `points` to `ellipse` (0 for an empty set).
pub fn rms_sampson_distance(ellipse: &Ellipse, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|&[x, y]| ellipse.sampson_distance(x, y).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}

/// Centroid shift plus isotropic scale to a mean radius of √2.
struct Normalization {
    mean: [f64; 2],
    scale: f64,
}

impl Normalization {
    fn of(points: &[[f64; 2]]) -> Self {
        let n = points.len() as f64;
        let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
        let my = points.iter().map(|p| p[1]).sum::<f64>() / n;
        let mean_dist = points
            .iter()
            .map(|p| (p[0] - mx).hypot(p[1] - my))
            .sum::<f64>()
            / n;
        let scale = if mean_dist > 1e-15 {
            std::f64::consts::SQRT_2 / mean_dist
        } else {
            1.0
        };
        Self {
            mean: [mx, my],
            scale,
        }
    }

    fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [
            (p[0] - self.mean[0]) * self.scale,
            (p[1] - self.mean[1]) * self.scale,
        ]
    }

    /// Substitute `x' = s(x − mx)`, `y' = s(y − my)` back into the conic.
    fn denormalize(&self, c: &Vector6<f64>) -> [f64; 6] {
        let [mx, my] = self.mean;
        let s = self.scale;
        let s2 = s * s;
        let (a_, b_, c_, d_, e_, f_) = (c[0], c[1], c[2], c[3], c[4], c[5]);
        [
            a_ * s2,
            b_ * s2,
            c_ * s2,
            -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s,
            -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s,
            a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my
                + f_,
        ]
    }
}
