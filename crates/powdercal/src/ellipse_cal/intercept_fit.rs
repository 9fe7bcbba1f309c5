//! Beam-centre position along the centre line from the growth of the ring
//! major axes.
//!
//! For a tilted detector a ring whose centre sits `e` px past the beam centre
//! (along the tilt azimuth) has semi-major axis `a² = e² + e·h`, with
//! `h = D / (p · sin τ)`. For a trial beam position `p₀` the best `h ≥ 0` is
//! linear least squares in `a² − e² = e·h`; `p₀` itself is found by a grid
//! scan followed by golden-section refinement, since the residual is
//! multi-modal along the line.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::line_fit::CentreLine;
use crate::optim::golden_section_minimize;

/// Grid points scanned before refinement.
pub const INTERCEPT_GRID_POINTS: usize = 64;
/// Minimum backward extent of the scan, px.
pub const MIN_BACKWARD_EXTENT_PX: f64 = 16.0;
/// Centre spread below which the detector is treated as untilted, px.
pub const UNTILTED_SPAN_PX: f64 = 0.05;

/// Per-image outcome of the intercept fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterceptFit {
    /// Beam centre `[x, y]`, px.
    pub beam_centre_px: [f64; 2],
    /// `1 / h` in px⁻¹ (`sin τ = D · inv_h / p`); 0 when untilted.
    pub inv_h_px: f64,
    /// Unit vector along which ring centres progress outward.
    pub progression: [f64; 2],
    /// Sum of squared major-axis residuals, px².
    pub residual: f64,
    /// `true` when the centres did not spread along the line.
    pub untilted: bool,
}

impl InterceptFit {
    /// Progression direction as an azimuth in degrees, `[0, 360)`.
    pub fn azimuth_deg(&self) -> f64 {
        self.progression[1]
            .atan2(self.progression[0])
            .to_degrees()
            .rem_euclid(360.0)
    }
}

/// Fit the beam centre along `line` from ring centres and semi-major axes.
///
/// `rings` holds `(centre, semi_major)` pairs in px; at least two are needed.
pub fn fit_intercept(line: &CentreLine, rings: &[([f64; 2], f64)]) -> Option<InterceptFit> {
    if rings.len() < 2 {
        return None;
    }
    let mut samples: Vec<(f64, f64)> = rings
        .iter()
        .map(|(c, a)| (line.project(*c), *a))
        .collect();
    samples.sort_by(|x, y| x.1.total_cmp(&y.1));

    let t_min = samples.iter().map(|s| s.0).fold(f64::INFINITY, f64::min);
    let t_max = samples.iter().map(|s| s.0).fold(f64::NEG_INFINITY, f64::max);
    let span = t_max - t_min;
    let dir = line.direction();

    if span < UNTILTED_SPAN_PX {
        let n = rings.len() as f64;
        let cx = rings.iter().map(|r| r.0[0]).sum::<f64>() / n;
        let cy = rings.iter().map(|r| r.0[1]).sum::<f64>() / n;
        debug!(span, "centres coincide, untilted detector");
        return Some(InterceptFit {
            beam_centre_px: [cx, cy],
            inv_h_px: 0.0,
            progression: dir,
            residual: 0.0,
            untilted: true,
        });
    }

    // Orientation of growth: sign of the t-vs-a² regression slope.
    let sign = progression_sign(&samples);
    let (t_inner, a_inner) = samples[0];
    let a_outer = samples[samples.len() - 1].1;

    let growth = a_outer * a_outer - a_inner * a_inner;
    let back = if growth > 1e-9 {
        (4.0 * span * a_inner * a_inner / growth).max(MIN_BACKWARD_EXTENT_PX)
    } else {
        MIN_BACKWARD_EXTENT_PX
    };
    let front = t_inner + sign * span / 3.0;
    let rear = front - sign * back;

    let objective = |p0: f64| residual_at(&samples, sign, p0).0;

    let n = INTERCEPT_GRID_POINTS;
    let step = (front - rear) / (n - 1) as f64;
    let (mut best_p, mut best_v) = (rear, f64::INFINITY);
    for i in 0..n {
        let p = rear + step * i as f64;
        let v = objective(p);
        trace!(p, v, "intercept grid");
        if v < best_v {
            best_v = v;
            best_p = p;
        }
    }
    let refined = golden_section_minimize(
        objective,
        best_p - step.abs(),
        best_p + step.abs(),
        200,
        1e-9 * span.max(1.0),
    );
    let p0 = if refined.value <= best_v { refined.x } else { best_p };
    let (residual, h) = residual_at(&samples, sign, p0);

    let progression = [sign * dir[0], sign * dir[1]];
    let inv_h_px = if h > 0.0 && h.is_finite() { 1.0 / h } else { 0.0 };
    let beam_centre_px = line.point_at(p0);
    debug!(
        p0,
        h,
        residual,
        bx = beam_centre_px[0],
        by = beam_centre_px[1],
        "intercept fit"
    );
    Some(InterceptFit {
        beam_centre_px,
        inv_h_px,
        progression,
        residual,
        untilted: false,
    })
}

fn progression_sign(samples: &[(f64, f64)]) -> f64 {
    let n = samples.len() as f64;
    let mt = samples.iter().map(|s| s.0).sum::<f64>() / n;
    let ma = samples.iter().map(|s| s.1 * s.1).sum::<f64>() / n;
    let cov: f64 = samples.iter().map(|s| (s.0 - mt) * (s.1 * s.1 - ma)).sum();
    if cov < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Squared residual and best `h` for beam position `p0`.
fn residual_at(samples: &[(f64, f64)], sign: f64, p0: f64) -> (f64, f64) {
    let (mut num, mut den) = (0.0, 0.0);
    for &(t, a) in samples {
        let e = sign * (t - p0);
        num += e * (a * a - e * e);
        den += e * e;
    }
    let h = if den > 0.0 { (num / den).max(0.0) } else { 0.0 };
    let res = samples
        .iter()
        .map(|&(t, a)| {
            let e = sign * (t - p0);
            let model = (e * e + e * h).max(0.0).sqrt();
            (a - model).powi(2)
        })
        .sum();
    (res, h)
}
