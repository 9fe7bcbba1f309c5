//! Direct geometry fit to ring points in reciprocal space.
//!
//! Every point of a ring with spacing `d` should map to `Q = 2π/d`. The
//! solver floats any subset of {λ, D, beam x, beam y, yaw, roll} and
//! minimises the mean squared Q error with bounded Nelder–Mead. Parameters
//! are optimised in units of their initial step so the simplex is well
//! conditioned.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calibrant::q_from_d;
use crate::config::CalibrationParameters;
use crate::error::CalibrationError;
use crate::geometry::DetectorGeometry;
use crate::optim::{nelder_mead_minimize, Bounds, OptimizerConfig};

/// Largest tilt component the solver may reach, rad.
const MAX_TILT_RAD: f64 = 60.0 * std::f64::consts::PI / 180.0;

/// Points of one ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRing {
    /// D-spacing the points belong to, Å.
    pub d_spacing: f64,
    /// Pixel positions `[x, y]`.
    pub points: Vec<[f64; 2]>,
}

/// Outcome of [`solve_points`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFit {
    /// Fitted geometry (fixed parameters copied from the seed).
    pub geometry: DetectorGeometry,
    /// Mean squared Q error, Å⁻².
    pub residual: f64,
    /// Points used.
    pub point_count: usize,
    /// Objective evaluations.
    pub evaluations: usize,
    /// Whether the optimiser met its tolerances.
    pub converged: bool,
}

#[derive(Clone, Copy)]
enum Param {
    Wavelength,
    Distance,
    BeamX,
    BeamY,
    Yaw,
    Roll,
}

impl Param {
    fn get(self, g: &DetectorGeometry) -> f64 {
        match self {
            Self::Wavelength => g.wavelength_angstrom,
            Self::Distance => g.distance_mm,
            Self::BeamX => g.beam_centre_px[0],
            Self::BeamY => g.beam_centre_px[1],
            Self::Yaw => g.yaw_rad,
            Self::Roll => g.roll_rad,
        }
    }

    fn set(self, g: &mut DetectorGeometry, v: f64) {
        match self {
            Self::Wavelength => g.wavelength_angstrom = v,
            Self::Distance => g.distance_mm = v,
            Self::BeamX => g.beam_centre_px[0] = v,
            Self::BeamY => g.beam_centre_px[1] = v,
            Self::Yaw => g.yaw_rad = v,
            Self::Roll => g.roll_rad = v,
        }
    }

    /// Initial step and physical limits.
    fn scale_and_limits(self, seed: f64) -> (f64, f64, f64) {
        match self {
            Self::Wavelength | Self::Distance => {
                (0.01 * seed.abs().max(1e-6), 1e-9, f64::INFINITY)
            }
            Self::BeamX | Self::BeamY => (2.0, f64::NEG_INFINITY, f64::INFINITY),
            Self::Yaw | Self::Roll => (0.01, -MAX_TILT_RAD, MAX_TILT_RAD),
        }
    }
}

fn floating(params: &CalibrationParameters) -> Vec<Param> {
    [
        (params.float_wavelength, Param::Wavelength),
        (params.float_distance, Param::Distance),
        (params.float_beam_centre_x, Param::BeamX),
        (params.float_beam_centre_y, Param::BeamY),
        (params.float_yaw, Param::Yaw),
        (params.float_roll, Param::Roll),
    ]
    .into_iter()
    .filter_map(|(on, p)| on.then_some(p))
    .collect()
}

/// Mean squared Q error of `geometry` over `(q_target, x, y)` triples.
fn mean_sq_q_error(geometry: &DetectorGeometry, targets: &[(f64, f64, f64)]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let sum: f64 = targets
        .iter()
        .map(|&(q, x, y)| (geometry.q_at_pixel(x, y) - q).powi(2))
        .sum();
    sum / targets.len() as f64
}

/// Refine `seed` against ring points.
///
/// Needs at least two rings with points and no more floating parameters than
/// points.
pub fn solve_points(
    rings: &[PointRing],
    seed: &DetectorGeometry,
    params: &CalibrationParameters,
    cfg: &OptimizerConfig,
) -> Result<PointFit, CalibrationError> {
    let usable = rings.iter().filter(|r| !r.points.is_empty()).count();
    if usable < 2 {
        return Err(CalibrationError::InsufficientRings {
            image: 0,
            found: usable,
            needed: 2,
        });
    }
    if let Some(bad) = rings
        .iter()
        .find(|r| !(r.d_spacing.is_finite() && r.d_spacing > 0.0))
    {
        return Err(CalibrationError::InvalidInput(format!(
            "d-spacing {} is not positive",
            bad.d_spacing
        )));
    }
    let targets: Vec<(f64, f64, f64)> = rings
        .iter()
        .flat_map(|r| {
            let q = q_from_d(r.d_spacing);
            r.points.iter().map(move |p| (q, p[0], p[1]))
        })
        .collect();

    let free = floating(params);
    if free.len() > targets.len() {
        return Err(CalibrationError::UnderDetermined {
            free: free.len(),
            available: targets.len(),
        });
    }

    let x0: Vec<f64> = free.iter().map(|p| p.get(seed)).collect();
    let mut scales = Vec::with_capacity(free.len());
    let mut bounds = Bounds::unbounded(free.len());
    for (i, (p, &v)) in free.iter().zip(&x0).enumerate() {
        let (s, lo, hi) = p.scale_and_limits(v);
        scales.push(s);
        bounds.lower[i] = (lo - v) / s;
        bounds.upper[i] = (hi - v) / s;
    }
    let build = |u: &[f64]| {
        let mut g = *seed;
        for (((p, &u), &v), &s) in free.iter().zip(u).zip(&x0).zip(&scales) {
            p.set(&mut g, v + u * s);
        }
        g
    };

    let out = nelder_mead_minimize(
        |u| mean_sq_q_error(&build(u), &targets),
        &vec![0.0; free.len()],
        &vec![1.0; free.len()],
        &bounds,
        cfg,
    );
    let geometry = build(&out.x);
    if !out.converged {
        warn!(
            residual = out.value,
            evaluations = out.evaluations,
            "point calibration hit its evaluation budget"
        );
    }
    debug!(
        free = free.len(),
        points = targets.len(),
        residual = out.value,
        evaluations = out.evaluations,
        "point calibration"
    );
    Ok(PointFit {
        geometry,
        residual: out.value,
        point_count: targets.len(),
        evaluations: out.evaluations,
        converged: out.converged,
    })
}
