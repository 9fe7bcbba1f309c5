//! Conic coefficients, geometric ellipses and conversions between them.
//!
//! Conversions go through the quadratic-form view of a conic,
//! `pᵀ Q p + lᵀ p + F = 0` with `Q = [[A, B/2], [B/2, C]]` and `l = [D, E]`.

use nalgebra::{Matrix2, SymmetricEigen, Vector2};
use serde::{Deserialize, Serialize};

/// General conic `A x² + B xy + C y² + D x + E y + F = 0`, stored as `[A..F]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Geometric ellipse in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Centre x.
    pub cx: f64,
    /// Centre y.
    pub cy: f64,
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Major-axis direction from +x, radians in (−π/2, π/2].
    pub angle: f64,
}

impl ConicCoeffs {
    fn quadratic_form(&self) -> (Matrix2<f64>, Vector2<f64>, f64) {
        let [a, b, c, d, e, f] = self.0;
        (
            Matrix2::new(a, 0.5 * b, 0.5 * b, c),
            Vector2::new(d, e),
            f,
        )
    }

    /// Value of the conic polynomial at `(x, y)`.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let (q, l, f) = self.quadratic_form();
        let p = Vector2::new(x, y);
        p.dot(&(q * p)) + l.dot(&p) + f
    }

    /// `true` when the quadratic part is definite (`B² < 4AC`).
    pub fn is_ellipse(&self) -> bool {
        self.quadratic_form().0.determinant() > 0.0
    }

    /// Geometric parameters, `None` unless a real ellipse.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        conic_to_ellipse(&self)
    }
}

impl Ellipse {
    /// Circle as a degenerate ellipse.
    pub fn circle(cx: f64, cy: f64, r: f64) -> Self {
        Self {
            cx,
            cy,
            a: r,
            b: r,
            angle: 0.0,
        }
    }

    /// Positive, finite semi-axes and finite centre/angle.
    pub fn is_valid(&self) -> bool {
        [self.cx, self.cy, self.a, self.b, self.angle]
            .iter()
            .all(|v| v.is_finite())
            && self.a > 0.0
            && self.b > 0.0
    }

    /// Centre as `[x, y]`.
    pub fn centre(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    /// Conic coefficients of this ellipse.
    pub fn to_conic(self) -> ConicCoeffs {
        ellipse_to_conic(&self)
    }

    /// Point at parametric angle `t`.
    pub fn point_at(&self, t: f64) -> [f64; 2] {
        let (s, c) = self.angle.sin_cos();
        let (u, v) = (self.a * t.cos(), self.b * t.sin());
        [self.cx + u * c - v * s, self.cy + u * s + v * c]
    }

    /// `n` boundary points at equal parametric spacing.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let step = std::f64::consts::TAU / n.max(1) as f64;
        (0..n).map(|i| self.point_at(step * i as f64)).collect()
    }

    /// Distance from the centre to the boundary along the unit direction `dir`.
    pub fn radius_along(&self, dir: [f64; 2]) -> Option<f64> {
        if self.a <= 1e-9 || self.b <= 1e-9 {
            return None;
        }
        let d = Vector2::new(dir[0], dir[1]);
        let q = shape_matrix(self.a, self.b, self.angle);
        let k = d.dot(&(q * d));
        if !k.is_finite() || k <= 1e-18 {
            return None;
        }
        Some(k.sqrt().recip())
    }

    /// First-order geometric distance (Sampson) of `(x, y)` to the boundary.
    ///
    /// The gradient vanishes only at the centre, whose distance to the
    /// boundary is exactly `b`.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let conic = self.to_conic();
        let (q, l, _) = conic.quadratic_form();
        let value = conic.algebraic_distance(x, y).abs();
        let grad = 2.0 * q * Vector2::new(x, y) + l;
        let norm = grad.norm();
        // Away from the centre the gradient is at least 2r/a²; below this it is rounding.
        if norm <= 1e-9 * (l.norm() + q.norm()) {
            self.b
        } else {
            value / norm
        }
    }
}

/// `R diag(1/a², 1/b²) Rᵀ` for an ellipse rotated by `angle`.
fn shape_matrix(a: f64, b: f64, angle: f64) -> Matrix2<f64> {
    let (s, c) = angle.sin_cos();
    let r = Matrix2::new(c, -s, s, c);
    r * Matrix2::new((a * a).recip(), 0.0, 0.0, (b * b).recip()) * r.transpose()
}

/// Geometric parameters of a conic, canonicalised so that `a ≥ b`.
pub fn conic_to_ellipse(c: &ConicCoeffs) -> Option<Ellipse> {
    let (mut q, mut l, mut f) = c.quadratic_form();
    if q.determinant() <= 0.0 {
        return None;
    }
    // Make the quadratic part positive definite.
    if q.trace() < 0.0 {
        q = -q;
        l = -l;
        f = -f;
    }

    let centre = -0.5 * q.try_inverse()? * l;
    let at_centre = f + 0.5 * l.dot(&centre);
    if at_centre >= 0.0 || !at_centre.is_finite() {
        return None;
    }

    // Smallest eigenvalue belongs to the major axis.
    let eig = SymmetricEigen::new(q);
    let (major, minor) = if eig.eigenvalues[0] <= eig.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let axis = eig.eigenvectors.column(major);
    let semi = |k: usize| (-at_centre / eig.eigenvalues[k]).sqrt();

    let ellipse = Ellipse {
        cx: centre[0],
        cy: centre[1],
        a: semi(major),
        b: semi(minor),
        angle: normalize_angle(axis[1].atan2(axis[0])),
    };
    ellipse.is_valid().then_some(ellipse)
}

/// Conic coefficients of a geometric ellipse, scaled so that the polynomial
/// is −1 at the centre.
pub fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let q = shape_matrix(e.a, e.b, e.angle);
    let centre = Vector2::new(e.cx, e.cy);
    let l = -2.0 * q * centre;
    let f = centre.dot(&(q * centre)) - 1.0;
    ConicCoeffs([q[(0, 0)], 2.0 * q[(0, 1)], q[(1, 1)], l[0], l[1], f])
}

/// Wrap an angle into (−π/2, π/2].
pub(crate) fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    let wrapped = angle.rem_euclid(PI);
    if wrapped > FRAC_PI_2 {
        wrapped - PI
    } else {
        wrapped
    }
}
