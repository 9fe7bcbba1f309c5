//! Render powder patterns from a known geometry and calibrate them back.

use powdercal::synthetic::{render_pattern, RenderOptions};
use powdercal::{
    calibrate_known_wavelength, calibrate_multiple_images, calibrate_single_image_manual_point,
    estimate_centre, find_matched_ellipses, match_standard, radial_profile, CalibrantSpacing,
    CalibrationError, CalibrationParameters, CentreEstimatorConfig, DetectorGeometry,
    FixedParameter, PowderImage, RingSearchOptions, StandardMatcherConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WAVELENGTH: f64 = 0.7;
const PIXEL_MM: f64 = 0.2;
const CEO2: [f64; 6] = [3.1244, 2.7059, 1.9133, 1.6317, 1.5622, 1.3530];

/// Beam centre tolerance, px.
const CENTRE_TOL_PX: f64 = 0.1;
/// Distance tolerance: 0.1 px expressed in mm.
const DISTANCE_TOL_MM: f64 = 0.1 * PIXEL_MM;
const WAVELENGTH_TOL: f64 = 1e-4;

fn ceo2() -> CalibrantSpacing {
    CalibrantSpacing::new("CeO2", CEO2.to_vec())
}

fn geometry(distance_mm: f64) -> DetectorGeometry {
    DetectorGeometry::new([251.3, 262.7], distance_mm, PIXEL_MM, WAVELENGTH)
        .with_tilt(3f64.to_radians(), 60f64.to_radians())
}

fn render(g: &DetectorGeometry, rings: &[f64], side: u32, seed: u64) -> PowderImage {
    let clean = render_pattern(g, rings, side, side, &RenderOptions::default());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pixels = clean.pixels().clone();
    for p in pixels.pixels_mut() {
        p.0[0] += rng.gen_range(-5.0f32..5.0f32);
    }
    PowderImage::new(pixels).with_source(format!("synthetic-{seed}"))
}

fn assert_close(what: &str, actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() < tol,
        "{what}: {actual} vs {expected} (tolerance {tol})"
    );
}

#[test]
fn known_wavelength_recovers_geometry() {
    let truth = geometry(80.0);
    // The calibrant lists a sixth ring that is not in the image.
    let image = render(&truth, &CEO2[..5], 512, 1);
    let result = calibrate_known_wavelength(&image, WAVELENGTH, PIXEL_MM, &ceo2()).unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.wavelength_angstrom, WAVELENGTH);
    assert_close("distance", result.distance_mm[0], 80.0, DISTANCE_TOL_MM);
    assert_close("beam x", result.beam_centre_x[0], 251.3, CENTRE_TOL_PX);
    assert_close("beam y", result.beam_centre_y[0], 262.7, CENTRE_TOL_PX);
    assert_close("tilt", result.tilt_deg[0], 3.0, 0.02);
    assert_close("azimuth", result.tilt_azimuth_deg[0], 60.0, 0.5);
    assert!(result.residual < 0.01, "residual {} mm", result.residual);
    assert_eq!(result.provenance[0].calibrant, "CeO2");
    assert_eq!(result.provenance[0].source.as_deref(), Some("synthetic-1"));
}

#[test]
fn multiple_distances_recover_wavelength() {
    let distances = [70.0, 90.0, 110.0];
    let truth = |d: f64| {
        DetectorGeometry::new([320.4, 311.7], d, PIXEL_MM, WAVELENGTH)
            .with_tilt(3f64.to_radians(), 200f64.to_radians())
    };
    let images: Vec<PowderImage> = distances
        .iter()
        .zip(10u64..)
        .map(|(&d, seed)| render(&truth(d), &CEO2[..5], 640, seed))
        .collect();
    // Supplied distances carry a common 30 mm offset.
    let nominal: Vec<f64> = distances.iter().map(|d| d - 30.0).collect();
    let result = calibrate_multiple_images(
        &images,
        &nominal,
        PIXEL_MM,
        &ceo2(),
        FixedParameter::None,
        &RingSearchOptions::default(),
        &CalibrationParameters::default(),
    )
    .unwrap();

    assert_eq!(result.len(), 3);
    assert_close("wavelength", result.wavelength_angstrom, WAVELENGTH, WAVELENGTH_TOL);
    for (k, &d) in distances.iter().enumerate() {
        assert_close(&format!("image {k} distance"), result.distance_mm[k], d, DISTANCE_TOL_MM);
        assert_close(&format!("image {k} beam x"), result.beam_centre_x[k], 320.4, CENTRE_TOL_PX);
        assert_close(&format!("image {k} beam y"), result.beam_centre_y[k], 311.7, CENTRE_TOL_PX);
        assert_close(&format!("image {k} tilt"), result.tilt_deg[k], 3.0, 0.02);
        assert_close(&format!("image {k} azimuth"), result.tilt_azimuth_deg[k], 200.0, 0.5);
    }
}

#[test]
fn matched_ellipses_drop_missing_rings() {
    let truth = geometry(80.0);
    let image = render(&truth, &CEO2[..5], 512, 2);
    // 2.2 Å has no ring in the image.
    let calibrant = CalibrantSpacing::new("CeO2+", vec![3.1244, 2.7059, 2.2, 1.9133, 1.6317, 1.5622]);
    let rings = find_matched_ellipses(&image, PIXEL_MM, &calibrant).unwrap();

    assert_eq!(rings.len(), 5);
    for (r, &d) in rings.iter().zip(&CEO2[..5]) {
        assert_eq!(r.d_spacing, d);
        let expected = truth.ring_ellipse(r.d_spacing).unwrap();
        assert!(r.ellipse.is_valid());
        assert_close(&format!("d {d} a"), r.ellipse.a, expected.a, 0.05);
        assert_close(&format!("d {d} cx"), r.ellipse.cx, expected.cx, 0.05);
        assert_close(&format!("d {d} cy"), r.ellipse.cy, expected.cy, 0.05);
        assert!(r.points.len() >= 90, "d {}: {} points", d, r.points.len());
    }
    for w in rings.windows(2) {
        assert!(w[0].ellipse.a < w[1].ellipse.a);
    }
}

#[test]
fn blank_image_has_no_rings() {
    let flat = DetectorGeometry::new([256.0, 256.0], 80.0, PIXEL_MM, WAVELENGTH);
    let image = render(&flat, &[], 512, 5);
    match find_matched_ellipses(&image, PIXEL_MM, &ceo2()) {
        Ok(rings) => assert!(rings.is_empty(), "{} rings found in noise", rings.len()),
        Err(e) => assert!(matches!(e, CalibrationError::DegenerateEstimate(_)), "{e}"),
    }
}

#[test]
fn manual_point_refines_a_rough_seed() {
    let truth = geometry(80.0);
    let image = render(&truth, &CEO2[..5], 512, 3);
    let seed = DetectorGeometry::new([252.8, 261.7], 81.0, PIXEL_MM, WAVELENGTH);
    let result = calibrate_single_image_manual_point(&image, &ceo2(), &seed, false).unwrap();

    assert_eq!(result.wavelength_angstrom, WAVELENGTH);
    assert_close("beam x", result.beam_centre_x[0], 251.3, CENTRE_TOL_PX);
    assert_close("beam y", result.beam_centre_y[0], 262.7, CENTRE_TOL_PX);
    assert_close("distance", result.distance_mm[0], 80.0, DISTANCE_TOL_MM);
    assert_close("tilt", result.tilt_deg[0], 3.0, 0.02);
    assert!(result.residual < 1e-6, "residual {}", result.residual);
}

#[test]
fn centre_and_match_are_deterministic() {
    let image = render(&geometry(80.0), &CEO2[..5], 512, 4);
    let cfg = CentreEstimatorConfig::default();
    let c1 = estimate_centre(&image, &cfg).unwrap();
    let c2 = estimate_centre(&image, &cfg).unwrap();
    assert_eq!(c1, c2);
    assert!((c1[0] - 251.3).abs() < 8.0 && (c1[1] - 262.7).abs() < 8.0, "{c1:?}");

    let profile = radial_profile(&image, c1);
    let m = StandardMatcherConfig::default();
    let a = match_standard(&profile, &CEO2, PIXEL_MM, &m);
    let b = match_standard(&profile, &CEO2, PIXEL_MM, &m);
    assert_eq!(a, b);
}
