//! Robust ellipse fit of one diffraction ring near a seed outline.
//!
//! The first pass searches a wide radial window around the seed; later passes
//! re-sample a narrow window around the latest fit, drop Sampson-distance
//! outliers and refit. The loop ends when the retained point count stops
//! shrinking or the iteration cap is hit.

mod sampling;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::RingSearchOptions;
use crate::conic::{rms_sampson_distance, Ellipse};
use crate::error::CalibrationError;
use crate::frame::PowderImage;
use crate::profile::{median, median_abs_deviation};
use crate::ring_shape::fit_points;

use sampling::{sample_ring_points, RaySampleConfig};

/// Why a single ring could not be fitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RingFitError {
    /// Too few ray peaks were found.
    #[error("{found} ring points near radius {radius_px:.1}px, need {needed}")]
    TooFewPoints {
        /// Seed semi-major axis, px.
        radius_px: f64,
        /// Points found.
        found: usize,
        /// Points required.
        needed: usize,
    },
    /// The points did not yield a valid ellipse.
    #[error("no valid ellipse through points near radius {radius_px:.1}px")]
    FitFailed {
        /// Seed semi-major axis, px.
        radius_px: f64,
    },
    /// The points scatter too far from the fitted ellipse.
    #[error("ring near radius {radius_px:.1}px fits with rms {rms_px:.2}px")]
    ResidualTooHigh {
        /// Seed semi-major axis, px.
        radius_px: f64,
        /// RMS Sampson residual, px.
        rms_px: f64,
    },
}

impl From<RingFitError> for CalibrationError {
    fn from(e: RingFitError) -> Self {
        let radius_px = match e {
            RingFitError::TooFewPoints { radius_px, .. }
            | RingFitError::FitFailed { radius_px }
            | RingFitError::ResidualTooHigh { radius_px, .. } => radius_px,
        };
        Self::RingNotFound {
            radius_px,
            reason: e.to_string(),
        }
    }
}

/// Result of a successful ring fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedRing {
    /// Fitted outline, px.
    pub ellipse: Ellipse,
    /// Retained ring points, px.
    pub points: Vec<[f64; 2]>,
    /// RMS Sampson distance of `points` to `ellipse`, px.
    pub rms_residual: f64,
    /// Refit rounds performed.
    pub iterations: usize,
}

const MIN_POINTS: usize = 3;

/// Fit the ring closest to `seed` in `image`.
///
/// The fit is rejected when it keeps less than `min_point_fraction` of the
/// searchable rays or its RMS residual exceeds `max_rms_residual_px`.
pub fn fit_ring(
    image: &PowderImage,
    seed: &Ellipse,
    opts: &RingSearchOptions,
) -> Result<FittedRing, RingFitError> {
    let radius_px = seed.a;
    let too_few = |found: usize, needed: usize| RingFitError::TooFewPoints {
        radius_px,
        found,
        needed,
    };
    let ray_cfg = |search: f64| RaySampleConfig {
        angular_samples: opts.angular_samples,
        inner_px: opts.inner_halfwidth_px,
        outer_px: opts.outer_halfwidth_px,
        search_px: search,
        r_step_px: opts.radial_step_px,
        min_peak_prominence: opts.min_peak_prominence,
    };

    let first = sample_ring_points(
        image,
        seed,
        ray_cfg(opts.inner_halfwidth_px.max(opts.outer_halfwidth_px)),
    );
    let mut points = first.points;
    let mut searchable = first.searchable_rays;
    if points.len() < MIN_POINTS {
        return Err(too_few(points.len(), MIN_POINTS));
    }
    let mut ellipse = fit_points(&points).ok_or(RingFitError::FitFailed { radius_px })?;

    let mut last_count = usize::MAX;
    let mut iterations = 0;
    while iterations < opts.max_refit_iterations {
        iterations += 1;
        let resampled = sample_ring_points(image, &ellipse, ray_cfg(opts.refine_halfwidth_px));
        let kept = reject_outliers(&ellipse, resampled.points, opts);
        if kept.len() < MIN_POINTS {
            return Err(too_few(kept.len(), MIN_POINTS));
        }
        let Some(refit) = fit_points(&kept) else {
            return Err(RingFitError::FitFailed { radius_px });
        };
        trace!(iterations, kept = kept.len(), a = refit.a, "ring refit");
        ellipse = refit;
        points = kept;
        searchable = resampled.searchable_rays;
        if points.len() >= last_count {
            break;
        }
        last_count = points.len();
    }

    let needed = ((opts.min_point_fraction.clamp(0.0, 1.0) * searchable as f64).ceil() as usize)
        .max(MIN_POINTS);
    if points.len() < needed {
        return Err(too_few(points.len(), needed));
    }
    let rms_residual = rms_sampson_distance(&ellipse, &points);
    if !rms_residual.is_finite() || rms_residual > opts.max_rms_residual_px {
        return Err(RingFitError::ResidualTooHigh {
            radius_px,
            rms_px: rms_residual,
        });
    }
    debug!(
        seed_radius = radius_px,
        a = ellipse.a,
        b = ellipse.b,
        points = points.len(),
        searchable,
        rms_residual,
        iterations,
        "ring fitted"
    );
    Ok(FittedRing {
        ellipse,
        points,
        rms_residual,
        iterations,
    })
}

/// Drop points whose Sampson distance exceeds the robust gate.
fn reject_outliers(
    ellipse: &Ellipse,
    points: Vec<[f64; 2]>,
    opts: &RingSearchOptions,
) -> Vec<[f64; 2]> {
    let dists: Vec<f64> = points
        .iter()
        .map(|&[x, y]| ellipse.sampson_distance(x, y))
        .collect();
    let Some(med) = median(&dists) else {
        return points;
    };
    let mad = median_abs_deviation(&dists, med);
    let gate = (opts.outlier_sigma * 1.4826 * mad).max(opts.min_outlier_px);
    points
        .into_iter()
        .zip(dists)
        .filter(|(_, d)| *d <= gate)
        .map(|(p, _)| p)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{blur_and_noise, draw_rings, RingSpec};
    use approx::assert_relative_eq;

    fn tilted_ring() -> Ellipse {
        Ellipse {
            cx: 151.0,
            cy: 148.5,
            a: 92.0,
            b: 88.0,
            angle: 0.6,
        }
    }

    #[test]
    fn recovers_ellipse_from_offset_circle_seed() {
        let truth = tilted_ring();
        let img = draw_rings(300, 300, &[RingSpec::ellipse(truth, 1.5)], 20.0);
        let img = blur_and_noise(&img, 0.7, 4.0, 11);
        let seed = Ellipse::circle(148.0, 150.0, 86.0);
        let fit = fit_ring(&img, &seed, &RingSearchOptions::default()).unwrap();
        assert_relative_eq!(fit.ellipse.cx, truth.cx, epsilon = 0.1);
        assert_relative_eq!(fit.ellipse.cy, truth.cy, epsilon = 0.1);
        assert_relative_eq!(fit.ellipse.a, truth.a, epsilon = 0.1);
        assert_relative_eq!(fit.ellipse.b, truth.b, epsilon = 0.1);
        assert!(fit.rms_residual < 0.5);
        assert!(fit.iterations <= RingSearchOptions::default().max_refit_iterations);
    }

    #[test]
    fn spurious_spots_are_dropped() {
        let truth = tilted_ring();
        let mut rings = vec![RingSpec::ellipse(truth, 1.5)];
        // Bright spots just outside the ring on a few rays.
        for k in 0..6 {
            let t = k as f64 * 0.9;
            let [x, y] = truth.point_at(t);
            let dx = (x - truth.cx) * 0.04;
            let dy = (y - truth.cy) * 0.04;
            let mut spot = RingSpec::circle(x + dx, y + dy, 0.5, 1.0);
            spot.amplitude = 2000.0;
            rings.push(spot);
        }
        let img = draw_rings(300, 300, &rings, 20.0);
        let fit = fit_ring(&img, &truth, &RingSearchOptions::default()).unwrap();
        assert_relative_eq!(fit.ellipse.a, truth.a, epsilon = 0.15);
        assert_relative_eq!(fit.ellipse.cx, truth.cx, epsilon = 0.15);
        for [x, y] in &fit.points {
            assert!(truth.sampson_distance(*x, *y) < 1.0);
        }
    }

    #[test]
    fn empty_region_is_ring_not_found() {
        let img = draw_rings(200, 200, &[], 20.0);
        let err = fit_ring(&img, &Ellipse::circle(100.0, 100.0, 50.0), &Default::default())
            .unwrap_err();
        assert!(matches!(err, RingFitError::TooFewPoints { found: 0, .. }));
        assert!(matches!(
            CalibrationError::from(err),
            CalibrationError::RingNotFound { .. }
        ));
    }

    #[test]
    fn noisy_blank_region_is_ring_not_found() {
        let img = blur_and_noise(&draw_rings(300, 300, &[], 50.0), 0.5, 5.0, 3);
        let err = fit_ring(&img, &Ellipse::circle(150.0, 150.0, 80.0), &Default::default())
            .unwrap_err();
        assert!(
            matches!(
                err,
                RingFitError::TooFewPoints { .. } | RingFitError::FitFailed { .. }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn short_arc_is_rejected() {
        // Only a quarter of the ring is visible; the rest is flat background.
        let truth = Ellipse::circle(150.0, 150.0, 80.0);
        let img = draw_rings(300, 300, &[RingSpec::ellipse(truth, 1.5)], 20.0);
        let mask: Vec<bool> = (0..300 * 300)
            .map(|i| {
                let (x, y) = (i % 300, i / 300);
                x < 150 || y < 150
            })
            .collect();
        let masked = img.clone().with_mask(mask).unwrap();
        // Masked rays are not searchable, so a visible quarter still fits.
        assert!(fit_ring(&masked, &truth, &Default::default()).is_ok());

        let flattened = draw_rings(300, 300, &[], 20.0);
        let mut pixels = img.pixels().clone();
        for (x, y, p) in pixels.enumerate_pixels_mut() {
            if x < 150 || y < 150 {
                *p = *flattened.pixels().get_pixel(x, y);
            }
        }
        let err = fit_ring(&PowderImage::new(pixels), &truth, &Default::default()).unwrap_err();
        assert!(matches!(err, RingFitError::TooFewPoints { .. }), "{err:?}");
    }
}
