//! Serializable inputs and outputs of the calibration entry points.

use serde::{Deserialize, Serialize};

use crate::conic::Ellipse;
use crate::geometry::DetectorGeometry;
use crate::ring_shape::RingShape;

/// A fitted ring ellipse tagged with the d-spacing it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEllipse {
    /// Outline in pixels.
    pub ellipse: Ellipse,
    /// Matched d-spacing, Å.
    pub d_spacing: f64,
    /// Ring points the ellipse was fitted to (empty for fixture input).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<[f64; 2]>,
}

impl ResolutionEllipse {
    /// Convert a user-drawn outline; polyline points are kept.
    pub fn from_shape(shape: &RingShape, d_spacing: f64) -> Option<Self> {
        Some(Self {
            ellipse: shape.fit_ellipse()?,
            d_spacing,
            points: shape.points().to_vec(),
        })
    }
}

/// Rings of one image plus what is known about its placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerImageGeometry {
    /// Square pixel pitch, mm.
    pub pixel_size_mm: f64,
    /// Supplied distance, mm; only differences between images are used.
    pub distance_mm: f64,
    /// Rings that fitted, innermost first.
    pub rings: Vec<ResolutionEllipse>,
}

/// Where a per-image result came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProvenance {
    /// Calibrant name.
    pub calibrant: String,
    /// Image path or other identifier, if known.
    pub source: Option<String>,
    /// Short description of the solver path.
    pub method: String,
    /// Residual of the fit that produced this image's numbers.
    pub residual: f64,
}

/// Outcome of a calibration run; every per-image field has one entry per image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Wavelength, Å.
    pub wavelength_angstrom: f64,
    /// Beam-centre x per image, px.
    pub beam_centre_x: Vec<f64>,
    /// Beam-centre y per image, px.
    pub beam_centre_y: Vec<f64>,
    /// Tilt magnitude per image, degrees.
    pub tilt_deg: Vec<f64>,
    /// Tilt azimuth per image, degrees in `[0, 360)`.
    pub tilt_azimuth_deg: Vec<f64>,
    /// Sample-detector distance per image, mm.
    pub distance_mm: Vec<f64>,
    /// Final residual of the run (RMS mm for ellipse fits, mean-squared Q
    /// error in Å⁻² for point fits).
    pub residual: f64,
    /// Per-image provenance.
    #[serde(default)]
    pub provenance: Vec<CalibrationProvenance>,
}

impl CalibrationResult {
    /// Number of images covered.
    pub fn len(&self) -> usize {
        self.distance_mm.len()
    }

    /// `true` when no image is covered.
    pub fn is_empty(&self) -> bool {
        self.distance_mm.is_empty()
    }

    /// Detector geometry of image `i` for a given pixel size.
    pub fn geometry(&self, i: usize, pixel_size_mm: f64) -> Option<DetectorGeometry> {
        Some(
            DetectorGeometry::new(
                [*self.beam_centre_x.get(i)?, *self.beam_centre_y.get(i)?],
                *self.distance_mm.get(i)?,
                pixel_size_mm,
                self.wavelength_angstrom,
            )
            .with_tilt(
                self.tilt_deg.get(i)?.to_radians(),
                self.tilt_azimuth_deg.get(i)?.to_radians(),
            ),
        )
    }

    /// Single-image result from a geometry.
    pub(crate) fn from_geometry(
        g: &DetectorGeometry,
        residual: f64,
        provenance: CalibrationProvenance,
    ) -> Self {
        Self {
            wavelength_angstrom: g.wavelength_angstrom,
            beam_centre_x: vec![g.beam_centre_px[0]],
            beam_centre_y: vec![g.beam_centre_px[1]],
            tilt_deg: vec![g.tilt_rad().to_degrees()],
            tilt_azimuth_deg: vec![g.tilt_azimuth_rad().to_degrees()],
            distance_mm: vec![g.distance_mm],
            residual,
            provenance: vec![provenance],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn geometry_round_trips_through_result() {
        let g = DetectorGeometry::new([512.0, 500.0], 250.0, 0.1, 0.7)
            .with_tilt(2f64.to_radians(), 40f64.to_radians());
        let prov = CalibrationProvenance {
            calibrant: "Si".into(),
            source: None,
            method: "test".into(),
            residual: 0.0,
        };
        let r = CalibrationResult::from_geometry(&g, 0.0, prov);
        assert_eq!(r.len(), 1);
        assert_relative_eq!(r.tilt_azimuth_deg[0], 40.0, epsilon = 1e-9);
        let back = r.geometry(0, 0.1).unwrap();
        assert_relative_eq!(back.yaw_rad, g.yaw_rad, epsilon = 1e-12);
        assert_relative_eq!(back.roll_rad, g.roll_rad, epsilon = 1e-12);
        assert!(r.geometry(1, 0.1).is_none());
    }

    #[test]
    fn fixture_rings_need_no_points() {
        let json = r#"{ "pixel_size_mm": 0.2, "distance_mm": 259.0, "rings": [
            { "ellipse": { "cx": 1.0, "cy": 2.0, "a": 30.0, "b": 29.0, "angle": 0.1 },
              "d_spacing": 3.12 } ] }"#;
        let img: PerImageGeometry = serde_json::from_str(json).unwrap();
        assert!(img.rings[0].points.is_empty());
        let out = serde_json::to_string(&img).unwrap();
        assert!(!out.contains("points"));
    }

    #[test]
    fn shapes_convert_to_tagged_ellipses() {
        let circle = RingShape::Circle {
            centre: [10.0, 12.0],
            radius: 30.0,
        };
        let r = ResolutionEllipse::from_shape(&circle, 2.5).unwrap();
        assert_eq!(r.ellipse.a, 30.0);
        assert!(r.points.is_empty());

        let poly = RingShape::Polyline {
            points: Ellipse::circle(0.0, 0.0, 40.0).sample_points(12),
        };
        let r = ResolutionEllipse::from_shape(&poly, 1.5).unwrap();
        assert_relative_eq!(r.ellipse.a, 40.0, epsilon = 1e-6);
        assert_eq!(r.points.len(), 12);

        let short = RingShape::Polyline {
            points: vec![[0.0, 0.0], [1.0, 1.0]],
        };
        assert!(ResolutionEllipse::from_shape(&short, 1.0).is_none());
    }
}
