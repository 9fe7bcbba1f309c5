//! Joint fit of the reference distance and wavelength to the major axes of
//! every ring in every image.
//!
//! Image `k` sits at `D_k = D₀ + (s_k − s_ref)` where `s` are the supplied
//! distances and the reference is the last image. Its tilt enters through
//! `sin τ_k = D_k / h_k`, with `1/h_k` taken from the intercept fit.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calibrant::two_theta;
use crate::config::FixedParameter;
use crate::geometry::semi_major_from_sin_tilt;
use crate::optim::{golden_section_minimize, nelder_mead_minimize, Bounds, OptimizerConfig};
use crate::profile::median;

/// Residual contribution of a ring whose cone section is not an ellipse, mm².
const INVALID_RING_PENALTY: f64 = 1e6;
/// Wavelength used when nothing better can be derived, Å.
const FALLBACK_WAVELENGTH: f64 = 1.0;

/// Ring data of one image, in physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAxes {
    /// Supplied distance, mm; only differences between images matter.
    pub nominal_distance_mm: f64,
    /// `1/h` in mm⁻¹ (0 for an untilted detector).
    pub inv_h_mm: f64,
    /// `(d-spacing Å, semi-major axis mm)` per ring.
    pub rings: Vec<(f64, f64)>,
}

/// Fitted reference distance and wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryFit {
    /// Distance of the reference (last) image, mm.
    pub reference_distance_mm: f64,
    /// Wavelength, Å.
    pub wavelength_angstrom: f64,
    /// RMS major-axis residual, mm.
    pub residual_rms_mm: f64,
    /// Objective evaluations.
    pub evaluations: usize,
    /// Whether the optimiser met its tolerances.
    pub converged: bool,
}

/// Distance offset of every image relative to the reference (last) image.
pub fn relative_offsets(images: &[ImageAxes]) -> Vec<f64> {
    let reference = images.last().map_or(0.0, |i| i.nominal_distance_mm);
    images
        .iter()
        .map(|i| i.nominal_distance_mm - reference)
        .collect()
}

/// Sum of squared major-axis residuals and the number of rings, mm².
fn sum_sq(images: &[ImageAxes], offsets: &[f64], d0: f64, lambda: f64) -> (f64, usize) {
    let mut total = 0.0;
    let mut count = 0;
    for (img, off) in images.iter().zip(offsets) {
        let dk = d0 + off;
        let sin_tau = (dk * img.inv_h_mm).min(0.999);
        for &(d, a_obs) in &img.rings {
            count += 1;
            let pred = two_theta(d, lambda)
                .filter(|_| dk > 0.0)
                .and_then(|alpha| semi_major_from_sin_tilt(dk, alpha, sin_tau));
            total += match pred {
                Some(a) => (a - a_obs).powi(2),
                None => INVALID_RING_PENALTY,
            };
        }
    }
    (total, count)
}

/// Physically derived starting point `(D₀, λ)`.
fn seed(images: &[ImageAxes], offsets: &[f64], fixed: FixedParameter) -> (f64, f64) {
    let largest = images
        .iter()
        .map(|i| i.nominal_distance_mm)
        .fold(f64::NEG_INFINITY, f64::max);
    let fallback_d0 = if largest.is_finite() && largest > 0.0 {
        largest
    } else {
        100.0
    };

    // tan α of each distinct spacing from major axis vs distance offset.
    let mut spacings: Vec<f64> = images
        .iter()
        .flat_map(|i| i.rings.iter().map(|r| r.0))
        .collect();
    spacings.sort_by(f64::total_cmp);
    spacings.dedup_by(|a, b| (*a - *b).abs() < 1e-9 * b.abs().max(1.0));

    let mut lambda_est = Vec::new();
    let mut d0_est = Vec::new();
    for &d in &spacings {
        let pts: Vec<(f64, f64)> = images
            .iter()
            .zip(offsets)
            .flat_map(|(img, off)| {
                img.rings
                    .iter()
                    .filter(move |r| (r.0 - d).abs() < 1e-9 * d.max(1.0))
                    .map(move |r| (*off, r.1))
            })
            .collect();
        if pts.len() < 2 {
            continue;
        }
        let n = pts.len() as f64;
        let mx = pts.iter().map(|p| p.0).sum::<f64>() / n;
        let my = pts.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = pts.iter().map(|p| (p.0 - mx).powi(2)).sum();
        if sxx < 1e-12 {
            continue;
        }
        let slope = pts.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum::<f64>() / sxx;
        if !slope.is_finite() || slope <= 0.0 {
            continue;
        }
        let alpha = slope.atan();
        lambda_est.push(2.0 * d * (0.5 * alpha).sin());
        // a = tan α (D₀ + offset) at the mean point.
        d0_est.push(my / slope - mx);
    }

    let d0_axes = |lambda: f64| -> Option<f64> {
        let v: Vec<f64> = images
            .iter()
            .zip(offsets)
            .flat_map(|(img, off)| {
                img.rings.iter().filter_map(move |&(d, a)| {
                    let alpha = two_theta(d, lambda)?;
                    Some(a / alpha.tan() - off)
                })
            })
            .collect();
        median(&v)
    };
    let lambda_axes = |d0: f64| -> Option<f64> {
        let v: Vec<f64> = images
            .iter()
            .zip(offsets)
            .flat_map(|(img, off)| {
                img.rings.iter().filter_map(move |&(d, a)| {
                    let dk = d0 + off;
                    (dk > 0.0).then(|| 2.0 * d * (0.5 * (a / dk).atan()).sin())
                })
            })
            .collect();
        median(&v)
    };

    match fixed {
        FixedParameter::Wavelength(lambda) => {
            let d0 = median(&d0_est)
                .or_else(|| d0_axes(lambda))
                .unwrap_or(fallback_d0);
            (d0, lambda)
        }
        FixedParameter::Distance(d0) => {
            let lambda = median(&lambda_est)
                .or_else(|| lambda_axes(d0))
                .unwrap_or(FALLBACK_WAVELENGTH);
            (d0, lambda)
        }
        FixedParameter::None => match (median(&d0_est), median(&lambda_est)) {
            (Some(d0), Some(lambda)) if d0 > 0.0 => (d0, lambda),
            _ => {
                let lambda = lambda_axes(fallback_d0).unwrap_or(FALLBACK_WAVELENGTH);
                (fallback_d0, lambda)
            }
        },
    }
}

/// Fit `D₀` and/or `λ`, honouring `fixed`.
pub fn fit_geometry(
    images: &[ImageAxes],
    fixed: FixedParameter,
    cfg: &OptimizerConfig,
) -> GeometryFit {
    let offsets = relative_offsets(images);
    let (d0_seed, lambda_seed) = seed(images, &offsets, fixed);
    debug!(d0_seed, lambda_seed, ?fixed, "geometry fit seed");

    let rms = |d0: f64, lambda: f64| {
        let (s, n) = sum_sq(images, &offsets, d0, lambda);
        (s / n.max(1) as f64).sqrt()
    };
    // Keep every image in front of the sample.
    let min_d0 = offsets.iter().fold(0.0f64, |m, o| m.max(-o)) + 1e-3;

    let (d0, lambda, evaluations, converged) = match fixed {
        FixedParameter::Wavelength(lambda) => {
            let lo = (0.5 * d0_seed).max(min_d0);
            let out = golden_section_minimize(
                |d0| rms(d0, lambda),
                lo,
                (2.0 * d0_seed).max(lo * 2.0),
                cfg.max_evaluations,
                1e-12 * d0_seed.abs().max(1.0),
            );
            (out.x, lambda, out.evaluations, out.converged)
        }
        FixedParameter::Distance(d0) => {
            let out = golden_section_minimize(
                |lambda| rms(d0, lambda),
                0.5 * lambda_seed,
                2.0 * lambda_seed,
                cfg.max_evaluations,
                1e-13 * lambda_seed.max(1e-3),
            );
            (d0, out.x, out.evaluations, out.converged)
        }
        FixedParameter::None => {
            let bounds = Bounds {
                lower: vec![min_d0, 1e-4],
                upper: vec![f64::INFINITY, f64::INFINITY],
            };
            let out = nelder_mead_minimize(
                |x| rms(x[0], x[1]),
                &[d0_seed.max(min_d0), lambda_seed],
                &[0.01 * d0_seed.abs().max(1.0), 0.01 * lambda_seed],
                &bounds,
                cfg,
            );
            (out.x[0], out.x[1], out.evaluations, out.converged)
        }
    };

    let residual_rms_mm = rms(d0, lambda);
    if !converged {
        warn!(residual_rms_mm, evaluations, "geometry fit hit its evaluation budget");
    }
    debug!(d0, lambda, residual_rms_mm, evaluations, "geometry fit");
    GeometryFit {
        reference_distance_mm: d0,
        wavelength_angstrom: lambda,
        residual_rms_mm,
        evaluations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DetectorGeometry;
    use approx::assert_relative_eq;

    const D_SPACINGS: [f64; 5] = [3.1244, 2.7059, 1.9133, 1.6317, 1.5622];

    fn image_at(distance: f64, nominal: f64, lambda: f64, tilt_deg: f64) -> ImageAxes {
        let g = DetectorGeometry::new([1000.0, 1000.0], distance, 0.2, lambda)
            .with_tilt(tilt_deg.to_radians(), 0.8);
        ImageAxes {
            nominal_distance_mm: nominal,
            inv_h_mm: g.tilt_rad().sin() / distance,
            rings: D_SPACINGS
                .iter()
                .map(|&d| (d, g.ring_ellipse(d).unwrap().a * 0.2))
                .collect(),
        }
    }

    fn series(lambda: f64, tilt_deg: f64) -> Vec<ImageAxes> {
        // True distances are the nominal ones plus 30 mm.
        [259.0, 359.0, 459.0, 559.0, 659.0]
            .iter()
            .map(|&n| image_at(n + 30.0, n, lambda, tilt_deg))
            .collect()
    }

    #[test]
    fn joint_fit_recovers_distance_and_wavelength() {
        let imgs = series(0.425, 0.15);
        let fit = fit_geometry(&imgs, FixedParameter::None, &OptimizerConfig::default());
        assert_relative_eq!(fit.wavelength_angstrom, 0.425, epsilon = 1e-6);
        assert_relative_eq!(fit.reference_distance_mm, 689.0, epsilon = 1e-3);
        assert!(fit.residual_rms_mm < 1e-6);
    }

    #[test]
    fn fixed_wavelength_single_image() {
        let imgs = vec![image_at(289.04, 0.0, 0.425, 0.15)];
        let fit = fit_geometry(&imgs, FixedParameter::Wavelength(0.425), &Default::default());
        assert_relative_eq!(fit.reference_distance_mm, 289.04, epsilon = 1e-6);
        assert_eq!(fit.wavelength_angstrom, 0.425);
    }

    #[test]
    fn fixed_distance_recovers_wavelength() {
        let imgs = series(0.62, 1.0);
        let fit = fit_geometry(&imgs, FixedParameter::Distance(689.0), &Default::default());
        assert_relative_eq!(fit.wavelength_angstrom, 0.62, epsilon = 1e-8);
        assert_eq!(fit.reference_distance_mm, 689.0);
    }

    #[test]
    fn offsets_are_relative_to_last_image() {
        let imgs = series(0.5, 0.0);
        assert_eq!(relative_offsets(&imgs), vec![-400.0, -300.0, -200.0, -100.0, 0.0]);
    }
}
