//! Flat-detector model: pixel ↔ lab transforms and the closed-form ring
//! ellipse traced by a diffraction cone.
//!
//! Lab frame: sample at the origin, beam along +z. The detector meets the
//! beam at `(0, 0, distance)`; its plane is tilted by the scaled-axis vector
//! `(roll, yaw, 0)`. A pure tilt has no in-plane rotation component.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::calibrant::two_theta;
use crate::conic::{normalize_angle, Ellipse};

/// Physical detector geometry for one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorGeometry {
    /// Pixel where the direct beam hits the detector, `[x, y]`.
    pub beam_centre_px: [f64; 2],
    /// Sample to detector along the beam, mm.
    pub distance_mm: f64,
    /// Square pixel pitch, mm.
    pub pixel_size_mm: f64,
    /// Wavelength, Å.
    pub wavelength_angstrom: f64,
    /// Rotation about the detector y axis, rad.
    pub yaw_rad: f64,
    /// Rotation about the detector x axis, rad.
    pub roll_rad: f64,
}

impl DetectorGeometry {
    /// Untilted detector.
    pub fn new(
        beam_centre_px: [f64; 2],
        distance_mm: f64,
        pixel_size_mm: f64,
        wavelength_angstrom: f64,
    ) -> Self {
        Self {
            beam_centre_px,
            distance_mm,
            pixel_size_mm,
            wavelength_angstrom,
            yaw_rad: 0.0,
            roll_rad: 0.0,
        }
    }

    /// Set the tilt from magnitude and azimuth (both radians).
    ///
    /// The azimuth is the in-plane direction, measured from +x toward +y,
    /// along which the detector surface moves away from the sample.
    pub fn with_tilt(mut self, tilt_rad: f64, azimuth_rad: f64) -> Self {
        self.roll_rad = tilt_rad * azimuth_rad.sin();
        self.yaw_rad = -tilt_rad * azimuth_rad.cos();
        self
    }

    /// Tilt magnitude, rad.
    pub fn tilt_rad(&self) -> f64 {
        self.roll_rad.hypot(self.yaw_rad)
    }

    /// Tilt azimuth in `[0, 2π)`; 0 for an untilted detector.
    pub fn tilt_azimuth_rad(&self) -> f64 {
        if self.tilt_rad() < 1e-15 {
            return 0.0;
        }
        self.roll_rad
            .atan2(-self.yaw_rad)
            .rem_euclid(2.0 * std::f64::consts::PI)
    }

    /// Detector orientation.
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(Vector3::new(self.roll_rad, self.yaw_rad, 0.0))
    }

    /// Lab position (mm) of a pixel.
    pub fn pixel_to_lab(&self, px: f64, py: f64) -> Vector3<f64> {
        let local = Vector3::new(
            (px - self.beam_centre_px[0]) * self.pixel_size_mm,
            (py - self.beam_centre_px[1]) * self.pixel_size_mm,
            0.0,
        );
        Vector3::new(0.0, 0.0, self.distance_mm) + self.rotation() * local
    }

    /// Scattering angle 2θ at a pixel, rad.
    pub fn two_theta_at_pixel(&self, px: f64, py: f64) -> f64 {
        let p = self.pixel_to_lab(px, py);
        let norm = p.norm();
        if norm <= 0.0 {
            return 0.0;
        }
        (p.z / norm).clamp(-1.0, 1.0).acos()
    }

    /// Momentum transfer `Q = 4π sin θ / λ` at a pixel, Å⁻¹.
    pub fn q_at_pixel(&self, px: f64, py: f64) -> f64 {
        let theta = 0.5 * self.two_theta_at_pixel(px, py);
        4.0 * std::f64::consts::PI * theta.sin() / self.wavelength_angstrom
    }

    /// Ellipse (pixels) traced by the ring of spacing `d_angstrom`.
    ///
    /// `None` when the reflection is unreachable or the cone section is not
    /// an ellipse (cone half-angle plus tilt reaches 90°).
    pub fn ring_ellipse(&self, d_angstrom: f64) -> Option<Ellipse> {
        let alpha = two_theta(d_angstrom, self.wavelength_angstrom)?;
        let tau = self.tilt_rad();
        let shape = cone_section(self.distance_mm, alpha, tau)?;
        let p = self.pixel_size_mm;
        let phi = self.tilt_azimuth_rad();
        let (sp, cp) = phi.sin_cos();
        Some(Ellipse {
            cx: self.beam_centre_px[0] + shape.centre_offset / p * cp,
            cy: self.beam_centre_px[1] + shape.centre_offset / p * sp,
            a: shape.semi_major / p,
            b: shape.semi_minor / p,
            angle: normalize_angle(phi),
        })
    }

    /// Radius (px) of the ring of spacing `d_angstrom` on an untilted detector.
    pub fn untilted_ring_radius_px(&self, d_angstrom: f64) -> Option<f64> {
        let alpha = two_theta(d_angstrom, self.wavelength_angstrom)?;
        if alpha >= std::f64::consts::FRAC_PI_2 {
            return None;
        }
        Some(self.distance_mm * alpha.tan() / self.pixel_size_mm)
    }
}

/// Axis lengths and centre shift of a cone section, in the units of `distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeSection {
    /// Half-length along the tilt azimuth.
    pub semi_major: f64,
    /// Half-length across the tilt azimuth.
    pub semi_minor: f64,
    /// Shift of the ellipse centre from the beam centre along the azimuth.
    pub centre_offset: f64,
}

/// Section of a cone of opening `alpha` (2θ) by a plane at `distance` tilted
/// by `tau`.
pub fn cone_section(distance: f64, alpha: f64, tau: f64) -> Option<ConeSection> {
    let (sa, ca) = alpha.sin_cos();
    let (st, ct) = tau.sin_cos();
    let denom = ca * ca - st * st;
    if denom.is_nan() || denom <= 1e-12 || distance.is_nan() || distance <= 0.0 {
        return None;
    }
    let semi_major = distance * sa * ca * ct / denom;
    let centre_offset = distance * sa * sa * st / denom;
    let tan_a = sa / ca;
    let minor_sq = (distance + centre_offset * st).powi(2) * tan_a * tan_a
        - centre_offset * centre_offset * ct * ct;
    if minor_sq.is_nan() || minor_sq <= 0.0 {
        return None;
    }
    Some(ConeSection {
        semi_major,
        semi_minor: minor_sq.sqrt(),
        centre_offset,
    })
}

/// Semi-major axis of a cone section given `sin τ` directly.
///
/// Used by the geometry fit, where each image provides `sin τ` rather than τ.
pub fn semi_major_from_sin_tilt(distance: f64, alpha: f64, sin_tau: f64) -> Option<f64> {
    let (sa, ca) = alpha.sin_cos();
    let cos_tau_sq = 1.0 - sin_tau * sin_tau;
    let denom = ca * ca - sin_tau * sin_tau;
    if denom.is_nan() || denom <= 1e-12 || cos_tau_sq.is_nan() || cos_tau_sq <= 0.0 {
        return None;
    }
    Some(distance * sa * ca * cos_tau_sq.sqrt() / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tilted() -> DetectorGeometry {
        DetectorGeometry::new([1024.0, 1000.0], 300.0, 0.2, 0.42).with_tilt(0.14, 130f64.to_radians())
    }

    #[test]
    fn tilt_parametrisation_roundtrip() {
        let g = tilted();
        assert_relative_eq!(g.tilt_rad(), 0.14, epsilon = 1e-12);
        assert_relative_eq!(g.tilt_azimuth_rad(), 130f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn detector_recedes_along_azimuth() {
        let g = tilted();
        let phi = g.tilt_azimuth_rad();
        let [bx, by] = g.beam_centre_px;
        let ahead = g.pixel_to_lab(bx + 50.0 * phi.cos(), by + 50.0 * phi.sin());
        let behind = g.pixel_to_lab(bx - 50.0 * phi.cos(), by - 50.0 * phi.sin());
        assert!(ahead.z > g.distance_mm && behind.z < g.distance_mm);
    }

    #[test]
    fn ring_ellipse_points_share_two_theta() {
        let g = tilted();
        let d = 3.1;
        let alpha = two_theta(d, g.wavelength_angstrom).unwrap();
        let e = g.ring_ellipse(d).expect("ellipse");
        for [x, y] in e.sample_points(36) {
            assert_relative_eq!(g.two_theta_at_pixel(x, y), alpha, epsilon = 1e-9);
            assert_relative_eq!(
                g.q_at_pixel(x, y),
                crate::calibrant::q_from_d(d),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn untilted_ring_is_a_centred_circle() {
        let g = DetectorGeometry::new([500.0, 400.0], 200.0, 0.1, 0.5);
        let e = g.ring_ellipse(2.0).unwrap();
        assert_relative_eq!(e.a, e.b, epsilon = 1e-9);
        assert_relative_eq!(e.cx, 500.0, epsilon = 1e-12);
        assert_relative_eq!(e.a, g.untilted_ring_radius_px(2.0).unwrap(), epsilon = 1e-9);
    }

    #[test]
    fn major_axis_identity_with_tilt_height() {
        let (dist, alpha, tau) = (289.0, 0.2, 0.15);
        let s = cone_section(dist, alpha, tau).unwrap();
        let h = dist / tau.sin();
        assert_relative_eq!(
            s.semi_major.powi(2),
            s.centre_offset.powi(2) + s.centre_offset * h,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            semi_major_from_sin_tilt(dist, alpha, tau.sin()).unwrap(),
            s.semi_major,
            max_relative = 1e-12
        );
    }

    #[test]
    fn grazing_cone_is_not_an_ellipse() {
        assert!(cone_section(100.0, 1.5, 0.2).is_none());
        let g = DetectorGeometry::new([0.0, 0.0], 100.0, 0.1, 2.0);
        assert!(g.ring_ellipse(0.9).is_none());
    }
}
