//! Ring outlines as a tagged variant with an explicit ellipse conversion.

use serde::{Deserialize, Serialize};

use crate::conic::{fit_circle_algebraic, fit_ellipse_direct, Ellipse};

/// A ring outline as produced by a user or a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RingShape {
    /// Already an ellipse.
    Ellipse(Ellipse),
    /// Circle given by centre and radius (pixels).
    Circle {
        /// Centre `[x, y]`.
        centre: [f64; 2],
        /// Radius.
        radius: f64,
    },
    /// Ordered or unordered points on the ring.
    Polyline {
        /// Points `[x, y]`.
        points: Vec<[f64; 2]>,
    },
}

impl RingShape {
    /// Convert to an ellipse.
    ///
    /// Polylines with 6+ points use the direct ellipse fit, 3–5 points the
    /// algebraic circle fit; fewer points (or a failed fit) give `None`.
    pub fn fit_ellipse(&self) -> Option<Ellipse> {
        match self {
            Self::Ellipse(e) => e.is_valid().then_some(*e),
            Self::Circle { centre, radius } => {
                let e = Ellipse::circle(centre[0], centre[1], *radius);
                e.is_valid().then_some(e)
            }
            Self::Polyline { points } => fit_points(points),
        }
    }

    /// Points carried by the shape (empty for analytic shapes).
    pub fn points(&self) -> &[[f64; 2]] {
        match self {
            Self::Polyline { points } => points,
            _ => &[],
        }
    }
}

impl From<Ellipse> for RingShape {
    fn from(e: Ellipse) -> Self {
        Self::Ellipse(e)
    }
}

pub(crate) fn fit_points(points: &[[f64; 2]]) -> Option<Ellipse> {
    match points.len() {
        0..=2 => None,
        3..=5 => fit_circle_algebraic(points),
        _ => fit_ellipse_direct(points),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn polyline_size_selects_model() {
        let e = Ellipse {
            cx: 300.0,
            cy: 280.0,
            a: 120.0,
            b: 100.0,
            angle: 0.2,
        };
        let many = RingShape::Polyline {
            points: e.sample_points(24),
        };
        let fitted = many.fit_ellipse().unwrap();
        assert_relative_eq!(fitted.b, 100.0, epsilon = 1e-6);

        let few = RingShape::Polyline {
            points: Ellipse::circle(10.0, 20.0, 5.0).sample_points(4),
        };
        let c = few.fit_ellipse().unwrap();
        assert_relative_eq!(c.a, c.b);
        assert_relative_eq!(c.cx, 10.0, epsilon = 1e-9);

        let two = RingShape::Polyline {
            points: vec![[0.0, 0.0], [1.0, 1.0]],
        };
        assert!(two.fit_ellipse().is_none());
    }

    #[test]
    fn circle_with_bad_radius_is_rejected() {
        let c = RingShape::Circle {
            centre: [0.0, 0.0],
            radius: -1.0,
        };
        assert!(c.fit_ellipse().is_none());
    }
}
