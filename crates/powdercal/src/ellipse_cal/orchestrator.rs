//! Ellipse-based calibration across one or more images.
//!
//! Stages per image: rough centre, radial profile, standard match, ring fits.
//! The fitted ellipses then go through the centre-line and intercept fits
//! per image and one joint distance/wavelength fit across all images.

use tracing::{debug, info, warn};

use super::geometry_fit::{fit_geometry, relative_offsets, GeometryFit, ImageAxes};
use super::intercept_fit::{fit_intercept, InterceptFit};
use super::line_fit::fit_centre_line;
use crate::calibrant::CalibrantSpacing;
use crate::cancel::{check, CancelFlag};
use crate::centre::estimate_centre;
use crate::config::{CalibrationConfig, CalibrationParameters, FixedParameter};
use crate::conic::Ellipse;
use crate::error::CalibrationError;
use crate::frame::PowderImage;
use crate::matcher::match_standard;
use crate::optim::OptimizerConfig;
use crate::point_cal::{solve_points, PointRing};
use crate::profile::radial_profile;
use crate::result::{CalibrationProvenance, CalibrationResult, PerImageGeometry, ResolutionEllipse};
use crate::ring_fit::fit_ring;

/// Rings whose major axes differ by less than this are the same ring, px.
const DUPLICATE_RING_PX: f64 = 2.0;
/// Bounds on the radius correction carried from one fitted ring to the next.
const SEED_SCALE_RANGE: (f64, f64) = (0.95, 1.05);

/// Full diagnostics of an ellipse calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct EllipseCalibration {
    /// Assembled result.
    pub result: CalibrationResult,
    /// Joint distance/wavelength fit.
    pub geometry_fit: GeometryFit,
    /// Per-image intercept fits.
    pub intercepts: Vec<InterceptFit>,
}

/// Geometry from per-image ring ellipses.
///
/// Distances in `images` only matter through their differences; the last
/// image is the reference. With a single distance and nothing fixed, the
/// supplied distance is held fixed since the distance axis carries no
/// information.
pub fn calibrate_ellipses(
    images: &[PerImageGeometry],
    fixed: FixedParameter,
    optimizer: &OptimizerConfig,
    cancel: Option<&CancelFlag>,
) -> Result<EllipseCalibration, CalibrationError> {
    if images.is_empty() {
        return Err(CalibrationError::InvalidInput("no images".into()));
    }

    let mut intercepts = Vec::with_capacity(images.len());
    let mut axes = Vec::with_capacity(images.len());
    for (k, img) in images.iter().enumerate() {
        if !(img.pixel_size_mm.is_finite() && img.pixel_size_mm > 0.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "image {k}: pixel size {} is not positive",
                img.pixel_size_mm
            )));
        }
        if img.rings.len() < 2 {
            return Err(CalibrationError::InsufficientRings {
                image: k,
                found: img.rings.len(),
                needed: 2,
            });
        }
        let centres: Vec<[f64; 2]> = img.rings.iter().map(|r| r.ellipse.centre()).collect();
        let line = fit_centre_line(&centres).ok_or_else(|| {
            CalibrationError::DegenerateEstimate(format!("image {k}: no line through ring centres"))
        })?;
        let rings: Vec<([f64; 2], f64)> = img
            .rings
            .iter()
            .map(|r| (r.ellipse.centre(), r.ellipse.a))
            .collect();
        let intercept = fit_intercept(&line, &rings).ok_or_else(|| {
            CalibrationError::DegenerateEstimate(format!("image {k}: intercept fit failed"))
        })?;
        check(cancel)?;
        debug!(
            image = k,
            line_angle = line.angle_deg(),
            bx = intercept.beam_centre_px[0],
            by = intercept.beam_centre_px[1],
            untilted = intercept.untilted,
            "centre line"
        );

        let p = img.pixel_size_mm;
        axes.push(ImageAxes {
            nominal_distance_mm: img.distance_mm,
            inv_h_mm: intercept.inv_h_px / p,
            rings: img
                .rings
                .iter()
                .map(|r| (r.d_spacing, r.ellipse.a * p))
                .collect(),
        });
        intercepts.push(intercept);
    }

    let offsets = relative_offsets(&axes);
    let single_distance = offsets.iter().all(|o| o.abs() < 1e-9);
    let fixed = match fixed {
        FixedParameter::None if single_distance => {
            let d = images[images.len() - 1].distance_mm;
            if d.is_nan() || d <= 0.0 {
                return Err(CalibrationError::InvalidInput(
                    "a single distance needs a fixed wavelength or a positive distance".into(),
                ));
            }
            warn!(distance_mm = d, "single distance: holding it fixed");
            FixedParameter::Distance(d)
        }
        other => other,
    };

    let geometry_fit = fit_geometry(&axes, fixed, optimizer);
    let d0 = geometry_fit.reference_distance_mm;

    let n = images.len();
    let mut result = CalibrationResult {
        wavelength_angstrom: geometry_fit.wavelength_angstrom,
        beam_centre_x: Vec::with_capacity(n),
        beam_centre_y: Vec::with_capacity(n),
        tilt_deg: Vec::with_capacity(n),
        tilt_azimuth_deg: Vec::with_capacity(n),
        distance_mm: Vec::with_capacity(n),
        residual: geometry_fit.residual_rms_mm,
        provenance: Vec::new(),
    };
    for ((ic, ax), off) in intercepts.iter().zip(&axes).zip(&offsets) {
        let dk = d0 + off;
        let sin_tau = (dk * ax.inv_h_mm).clamp(0.0, 1.0);
        let tilt = sin_tau.asin().to_degrees();
        result.beam_centre_x.push(ic.beam_centre_px[0]);
        result.beam_centre_y.push(ic.beam_centre_px[1]);
        result.tilt_deg.push(tilt);
        result
            .tilt_azimuth_deg
            .push(if ic.untilted { 0.0 } else { ic.azimuth_deg() });
        result.distance_mm.push(dk);
    }
    info!(
        images = n,
        wavelength = result.wavelength_angstrom,
        reference_distance = d0,
        residual_mm = result.residual,
        "ellipse calibration"
    );
    Ok(EllipseCalibration {
        result,
        geometry_fit,
        intercepts,
    })
}

/// Find, match and fit the calibrant rings of one image.
///
/// Rings that fail to fit are dropped; the returned list holds only fitted
/// rings, innermost first.
pub fn find_image_rings(
    image: &PowderImage,
    pixel_size_mm: f64,
    d_spacings: &[f64],
    wavelength: Option<f64>,
    config: &CalibrationConfig,
) -> Result<Vec<ResolutionEllipse>, CalibrationError> {
    image.validate()?;
    let centre = estimate_centre(image, &config.centre)?;
    let profile = radial_profile(image, centre);
    let matcher = match wavelength {
        Some(l) => config.matcher.with_fixed_wavelength(l),
        None => config.matcher,
    };
    let selected: Vec<f64> = config
        .parameters
        .selected_rings(d_spacings.len())
        .into_iter()
        .map(|i| d_spacings[i])
        .collect();
    let m = match_standard(&profile, &selected, pixel_size_mm, &matcher);
    info!(
        cx = centre[0],
        cy = centre[1],
        energy_kev = m.energy_kev,
        distance_mm = m.distance_mm,
        seeds = m.rings.len(),
        "rings matched"
    );

    let mut seeds = m.rings.clone();
    seeds.sort_by(|a, b| a.radius_px.total_cmp(&b.radius_px));

    let mut rings: Vec<ResolutionEllipse> = Vec::with_capacity(seeds.len());
    let mut seed_centre = centre;
    let mut scale = 1.0;
    for s in &seeds {
        let seed = Ellipse::circle(seed_centre[0], seed_centre[1], s.radius_px * scale);
        match fit_ring(image, &seed, &config.ring_search) {
            Ok(fit) => {
                if rings
                    .iter()
                    .any(|r| (r.ellipse.a - fit.ellipse.a).abs() < DUPLICATE_RING_PX)
                {
                    warn!(
                        d = s.d_spacing,
                        a = fit.ellipse.a,
                        "ring duplicates a fitted ring, dropped"
                    );
                    continue;
                }
                // Ring centres drift along the tilt direction; a jump larger
                // than the search window is not drift.
                let shift =
                    (fit.ellipse.cx - seed_centre[0]).hypot(fit.ellipse.cy - seed_centre[1]);
                if shift <= config.ring_search.inner_halfwidth_px {
                    seed_centre = fit.ellipse.centre();
                }
                scale = chained_scale(fit.ellipse.a, s.radius_px);
                rings.push(ResolutionEllipse {
                    ellipse: fit.ellipse,
                    d_spacing: s.d_spacing,
                    points: fit.points,
                });
            }
            Err(e) => warn!(d = s.d_spacing, error = %e, "ring dropped"),
        }
    }
    rings.sort_by(|a, b| a.ellipse.a.total_cmp(&b.ellipse.a));
    debug!(found = rings.len(), seeds = seeds.len(), "rings fitted");
    Ok(rings)
}

/// Radius correction for the next seed, bounded so one bad fit cannot push
/// later seeds off their rings.
fn chained_scale(fitted_a: f64, matched_radius: f64) -> f64 {
    let scale = fitted_a / matched_radius;
    if scale.is_finite() {
        scale.clamp(SEED_SCALE_RANGE.0, SEED_SCALE_RANGE.1)
    } else {
        1.0
    }
}

/// Polish every image of `result` against its ring points.
///
/// With several images the wavelength stays at the shared ellipse value.
/// Images whose rings carry too few points keep their ellipse numbers. The
/// run residual switches to the worst point residual (Å⁻²) only when every
/// image refined; otherwise it stays the ellipse residual (mm). Returns the
/// number of refined images.
pub fn refine_with_points(
    result: &mut CalibrationResult,
    images: &[PerImageGeometry],
    params: &CalibrationParameters,
    optimizer: &OptimizerConfig,
) -> Result<usize, CalibrationError> {
    let mut params = params.clone();
    if images.len() > 1 {
        params.float_wavelength = false;
    }
    let mut wavelength = result.wavelength_angstrom;
    let mut worst: f64 = 0.0;
    let mut refined = 0;
    for (k, img) in images.iter().enumerate() {
        let Some(seed) = result.geometry(k, img.pixel_size_mm) else {
            continue;
        };
        let rings: Vec<PointRing> = img
            .rings
            .iter()
            .map(|r| PointRing {
                d_spacing: r.d_spacing,
                points: r.points.clone(),
            })
            .collect();
        let fit = match solve_points(&rings, &seed, &params, optimizer) {
            Ok(fit) => fit,
            Err(e @ CalibrationError::UnderDetermined { .. })
            | Err(e @ CalibrationError::InsufficientRings { .. }) => {
                warn!(image = k, error = %e, "point refinement skipped");
                continue;
            }
            Err(e) => return Err(e),
        };
        let g = fit.geometry;
        result.beam_centre_x[k] = g.beam_centre_px[0];
        result.beam_centre_y[k] = g.beam_centre_px[1];
        result.tilt_deg[k] = g.tilt_rad().to_degrees();
        result.tilt_azimuth_deg[k] = g.tilt_azimuth_rad().to_degrees();
        result.distance_mm[k] = g.distance_mm;
        wavelength = g.wavelength_angstrom;
        worst = worst.max(fit.residual);
        refined += 1;
        if let Some(p) = result.provenance.get_mut(k) {
            p.method.push_str(" + point refinement");
            p.residual = fit.residual;
        }
    }
    result.wavelength_angstrom = wavelength;
    if refined == images.len() {
        result.residual = worst;
    } else if refined > 0 {
        warn!(
            refined,
            images = images.len(),
            "partial point refinement: run residual stays the ellipse residual (mm)"
        );
    }
    Ok(refined)
}

/// Full image pipeline across `images` taken at `distances`.
pub fn calibrate_images(
    images: &[PowderImage],
    distances: &[f64],
    pixel_size_mm: f64,
    calibrant: &CalibrantSpacing,
    fixed: FixedParameter,
    config: &CalibrationConfig,
    cancel: Option<&CancelFlag>,
) -> Result<CalibrationResult, CalibrationError> {
    if images.is_empty() {
        return Err(CalibrationError::InvalidInput("no images".into()));
    }
    if distances.len() != images.len() {
        return Err(CalibrationError::CountMismatch {
            what: "distances",
            expected: images.len(),
            got: distances.len(),
        });
    }
    if !(pixel_size_mm.is_finite() && pixel_size_mm > 0.0) {
        return Err(CalibrationError::InvalidInput(format!(
            "pixel size {pixel_size_mm} is not positive"
        )));
    }
    let d_spacings = calibrant.validated_angstrom()?;
    let wavelength = match fixed {
        FixedParameter::Wavelength(l) => Some(l),
        _ => None,
    };

    let mut per_image = Vec::with_capacity(images.len());
    for (k, (image, &distance_mm)) in images.iter().zip(distances).enumerate() {
        let rings = find_image_rings(image, pixel_size_mm, &d_spacings, wavelength, config)?;
        check(cancel)?;
        info!(image = k, rings = rings.len(), "image rings");
        per_image.push(PerImageGeometry {
            pixel_size_mm,
            distance_mm,
            rings,
        });
    }

    let mut result = calibrate_ellipses(&per_image, fixed, &config.optimizer, cancel)?.result;
    result.provenance = images
        .iter()
        .map(|img| CalibrationProvenance {
            calibrant: calibrant.name.clone(),
            source: img.source().map(str::to_owned),
            method: "ellipse geometry fit".into(),
            residual: result.residual,
        })
        .collect();
    if config.parameters.refine_with_points {
        let mut params = config.parameters.clone();
        if wavelength.is_some() {
            params.float_wavelength = false;
        }
        refine_with_points(&mut result, &per_image, &params, &config.optimizer)?;
    }
    Ok(result)
}
