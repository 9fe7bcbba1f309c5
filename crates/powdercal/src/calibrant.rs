//! Calibrant d-spacing lists and the physical constants tied to them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CalibrationError;

/// hc in keV·Å, for the energy ↔ wavelength conversion.
pub const HC_KEV_ANGSTROM: f64 = 12.398_419_843_320_026;

/// Convert a photon energy in keV to a wavelength in Å.
pub fn energy_to_wavelength(energy_kev: f64) -> f64 {
    HC_KEV_ANGSTROM / energy_kev
}

/// Convert a wavelength in Å to a photon energy in keV.
pub fn wavelength_to_energy(wavelength_angstrom: f64) -> f64 {
    HC_KEV_ANGSTROM / wavelength_angstrom
}

/// Unit of the d-spacings in a [`CalibrantSpacing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    /// Ångström (the internal unit).
    #[default]
    Angstrom,
    /// Nanometre.
    Nanometre,
}

impl LengthUnit {
    /// Multiplier that converts a value in this unit to Å.
    pub fn to_angstrom_factor(self) -> f64 {
        match self {
            Self::Angstrom => 1.0,
            Self::Nanometre => 10.0,
        }
    }
}

/// Ordered d-spacing list of a reference material.
///
/// Order defines ring priority: index 0 is the innermost (largest d) ring the
/// caller cares about most.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrantSpacing {
    /// Human-readable material name, copied into result provenance.
    pub name: String,
    /// D-spacing values in `unit`.
    pub d_spacings: Vec<f64>,
    /// Unit of `d_spacings`.
    #[serde(default)]
    pub unit: LengthUnit,
}

impl CalibrantSpacing {
    /// Build a calibrant with spacings given in Å.
    pub fn new(name: impl Into<String>, d_spacings_angstrom: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            d_spacings: d_spacings_angstrom,
            unit: LengthUnit::Angstrom,
        }
    }

    /// Build a calibrant with an explicit unit.
    pub fn with_unit(name: impl Into<String>, d_spacings: Vec<f64>, unit: LengthUnit) -> Self {
        Self {
            name: name.into(),
            d_spacings,
            unit,
        }
    }

    /// Load a calibrant description from JSON.
    pub fn from_json_file(path: &Path) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        let cal: Self = serde_json::from_str(&text)?;
        Ok(cal)
    }

    /// D-spacings converted to Å, in calibrant order.
    ///
    /// This is the only place where the input unit is interpreted.
    pub fn d_spacings_angstrom(&self) -> Vec<f64> {
        let k = self.unit.to_angstrom_factor();
        self.d_spacings.iter().map(|d| d * k).collect()
    }

    /// Validate and return the usable (finite, positive) spacings in Å.
    pub fn validated_angstrom(&self) -> Result<Vec<f64>, CalibrationError> {
        let out: Vec<f64> = self
            .d_spacings_angstrom()
            .into_iter()
            .filter(|d| d.is_finite() && *d > 0.0)
            .collect();
        if out.is_empty() {
            return Err(CalibrationError::EmptyCalibrant(self.name.clone()));
        }
        Ok(out)
    }

    /// Number of spacings.
    pub fn len(&self) -> usize {
        self.d_spacings.len()
    }

    /// `true` when the list is empty.
    pub fn is_empty(&self) -> bool {
        self.d_spacings.is_empty()
    }
}

/// Bragg angle 2θ (radians) for spacing `d` at wavelength `lambda`, both in Å.
///
/// `None` when the reflection is not reachable (λ ≥ 2d).
pub fn two_theta(d_angstrom: f64, wavelength_angstrom: f64) -> Option<f64> {
    let s = wavelength_angstrom / (2.0 * d_angstrom);
    if !s.is_finite() || s <= 0.0 || s >= 1.0 {
        return None;
    }
    Some(2.0 * s.asin())
}

/// Momentum transfer Q = 2π/d in Å⁻¹.
pub fn q_from_d(d_angstrom: f64) -> f64 {
    2.0 * std::f64::consts::PI / d_angstrom
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn nanometre_spacings_are_scaled_once() {
        let cal = CalibrantSpacing::with_unit("CeO2", vec![0.3124, 0.2706], LengthUnit::Nanometre);
        let d = cal.d_spacings_angstrom();
        assert_relative_eq!(d[0], 3.124, epsilon = 1e-12);
        assert_relative_eq!(d[1], 2.706, epsilon = 1e-12);
    }

    #[test]
    fn empty_calibrant_is_rejected() {
        let cal = CalibrantSpacing::new("nothing", vec![]);
        assert!(matches!(
            cal.validated_angstrom(),
            Err(CalibrationError::EmptyCalibrant(_))
        ));
        let cal = CalibrantSpacing::new("bad", vec![-1.0, f64::NAN]);
        assert!(cal.validated_angstrom().is_err());
    }

    #[test]
    fn energy_wavelength_inverse() {
        let l = energy_to_wavelength(29.17);
        assert_relative_eq!(wavelength_to_energy(l), 29.17, epsilon = 1e-12);
        assert_relative_eq!(energy_to_wavelength(12.398_419_843_320_026), 1.0);
    }

    #[test]
    fn unreachable_reflection_has_no_angle() {
        assert!(two_theta(0.5, 1.2).is_none());
        let tt = two_theta(3.0, 1.0).unwrap();
        assert_relative_eq!((tt / 2.0).sin(), 1.0 / 6.0, epsilon = 1e-12);
    }
}
