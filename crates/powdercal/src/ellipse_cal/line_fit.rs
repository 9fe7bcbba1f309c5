use serde::{Deserialize, Serialize};

/// Beyond this angle from horizontal the fit regresses x on y.
const STEEP_LIMIT_DEG: f64 = 85.0;

/// Least-squares line through ring-ellipse centres.
///
/// `y = slope·x + intercept`, or `x = slope·y + intercept` when `swapped`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentreLine {
    /// Slope in the regression orientation.
    pub slope: f64,
    /// Intercept in the regression orientation.
    pub intercept: f64,
    /// `true` when x was regressed on y.
    pub swapped: bool,
}

impl CentreLine {
    /// Point of the line at parameter 0.
    pub fn origin(&self) -> [f64; 2] {
        if self.swapped {
            [self.intercept, 0.0]
        } else {
            [0.0, self.intercept]
        }
    }

    /// Unit direction, pointing toward increasing x (or y when swapped).
    pub fn direction(&self) -> [f64; 2] {
        let n = self.slope.hypot(1.0);
        if self.swapped {
            [self.slope / n, 1.0 / n]
        } else {
            [1.0 / n, self.slope / n]
        }
    }

    /// Line parameter of the orthogonal projection of `p`.
    pub fn project(&self, p: [f64; 2]) -> f64 {
        let o = self.origin();
        let d = self.direction();
        (p[0] - o[0]) * d[0] + (p[1] - o[1]) * d[1]
    }

    /// Point at line parameter `t`.
    pub fn point_at(&self, t: f64) -> [f64; 2] {
        let o = self.origin();
        let d = self.direction();
        [o[0] + t * d[0], o[1] + t * d[1]]
    }

    /// Angle of the line from +x, degrees in (−90, 90].
    pub fn angle_deg(&self) -> f64 {
        let d = self.direction();
        let mut a = d[1].atan2(d[0]).to_degrees();
        if a <= -90.0 {
            a += 180.0;
        } else if a > 90.0 {
            a -= 180.0;
        }
        a
    }
}

/// Fit a line through `centres` (at least two points).
///
/// The regression orientation follows the principal axis of the points, so
/// near-vertical progressions do not blow up the slope. Coincident points give
/// a horizontal line through their mean.
pub fn fit_centre_line(centres: &[[f64; 2]]) -> Option<CentreLine> {
    if centres.len() < 2 {
        return None;
    }
    let n = centres.len() as f64;
    let mx = centres.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = centres.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in centres {
        let (dx, dy) = (p[0] - mx, p[1] - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if !(mx.is_finite() && my.is_finite()) {
        return None;
    }
    if sxx + syy < 1e-18 {
        return Some(CentreLine {
            slope: 0.0,
            intercept: my,
            swapped: false,
        });
    }

    let principal = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let swapped = principal.to_degrees().abs() > STEEP_LIMIT_DEG;
    let line = if swapped {
        let slope = sxy / syy;
        CentreLine {
            slope,
            intercept: mx - slope * my,
            swapped,
        }
    } else {
        let slope = sxy / sxx;
        CentreLine {
            slope,
            intercept: my - slope * mx,
            swapped,
        }
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn shallow_line() {
        let pts: Vec<[f64; 2]> = (0..5).map(|i| [i as f64, 2.0 + 0.5 * i as f64]).collect();
        let l = fit_centre_line(&pts).unwrap();
        assert!(!l.swapped);
        assert_relative_eq!(l.slope, 0.5, epsilon = 1e-12);
        assert_relative_eq!(l.intercept, 2.0, epsilon = 1e-12);
        let p = l.point_at(l.project([3.0, 3.5]));
        assert_relative_eq!(p[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 3.5, epsilon = 1e-12);
    }

    #[test]
    fn vertical_progression_swaps_axes() {
        let pts: Vec<[f64; 2]> = (0..5).map(|i| [100.0 + 0.01 * i as f64, 10.0 * i as f64]).collect();
        let l = fit_centre_line(&pts).unwrap();
        assert!(l.swapped);
        assert_relative_eq!(l.slope, 0.001, epsilon = 1e-12);
        assert_relative_eq!(l.intercept, 100.0, epsilon = 1e-9);
        assert!(l.angle_deg() > 89.0);
        let t0 = l.project(pts[0]);
        let t4 = l.project(pts[4]);
        assert_relative_eq!(t4 - t0, 40.0, epsilon = 1e-3);
    }

    #[test]
    fn coincident_points_are_horizontal() {
        let l = fit_centre_line(&[[5.0, 7.0], [5.0, 7.0], [5.0, 7.0]]).unwrap();
        assert_eq!(l.slope, 0.0);
        assert_relative_eq!(l.project([5.0, 7.0]), 5.0);
        assert!(fit_centre_line(&[[1.0, 1.0]]).is_none());
    }
}
