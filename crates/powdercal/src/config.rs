//! Run configuration: ring search, floating parameters and the aggregate
//! [`CalibrationConfig`] loaded by the CLI.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::centre::CentreEstimatorConfig;
use crate::error::CalibrationError;
use crate::matcher::StandardMatcherConfig;
use crate::optim::OptimizerConfig;

/// Ring search and robust refit controls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSearchOptions {
    /// Search half-width inside the seed ring on the first pass, px.
    pub inner_halfwidth_px: f64,
    /// Search half-width outside the seed ring on the first pass, px.
    pub outer_halfwidth_px: f64,
    /// Symmetric half-width used when re-sampling around a fitted ellipse, px.
    pub refine_halfwidth_px: f64,
    /// Rays cast per ring.
    pub angular_samples: usize,
    /// Radial sampling step along each ray, px.
    pub radial_step_px: f64,
    /// A ray peak must exceed the ray median by this many robust standard
    /// deviations (1.4826 × MAD of the ray samples).
    pub min_peak_prominence: f64,
    /// Minimum share of searchable rays that must keep a point.
    pub min_point_fraction: f64,
    /// Largest accepted RMS Sampson residual of the final fit, px.
    pub max_rms_residual_px: f64,
    /// Outlier gate in robust standard deviations (1.4826 × MAD).
    pub outlier_sigma: f64,
    /// Lower bound of the outlier gate, px.
    pub min_outlier_px: f64,
    /// Hard cap on re-sample / re-fit rounds.
    pub max_refit_iterations: usize,
}

impl Default for RingSearchOptions {
    fn default() -> Self {
        Self {
            inner_halfwidth_px: 12.0,
            outer_halfwidth_px: 12.0,
            refine_halfwidth_px: 5.0,
            angular_samples: 180,
            radial_step_px: 0.5,
            min_peak_prominence: 5.0,
            min_point_fraction: 0.5,
            max_rms_residual_px: 1.0,
            outlier_sigma: 3.0,
            min_outlier_px: 1.0,
            max_refit_iterations: 10,
        }
    }
}

/// Which physical quantity is held fixed in the ellipse geometry fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "fixed", content = "value", rename_all = "snake_case")]
pub enum FixedParameter {
    /// Float both the reference distance and the wavelength.
    #[default]
    None,
    /// Wavelength fixed to the given value, Å.
    Wavelength(f64),
    /// Reference (last image) distance fixed to the given value, mm.
    Distance(f64),
}

/// Floating-parameter flags and ring selection limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParameters {
    /// Float the wavelength.
    pub float_wavelength: bool,
    /// Float the sample-detector distance.
    pub float_distance: bool,
    /// Float the beam-centre x coordinate.
    pub float_beam_centre_x: bool,
    /// Float the beam-centre y coordinate.
    pub float_beam_centre_y: bool,
    /// Float the yaw tilt component.
    pub float_yaw: bool,
    /// Float the roll tilt component.
    pub float_roll: bool,
    /// Use at most this many calibrant rings (in calibrant order).
    pub max_rings: usize,
    /// Restrict to these calibrant indices; `None` uses all.
    pub ring_selection: Option<Vec<usize>>,
    /// Polish each image's ellipse result with the point-based solver.
    pub refine_with_points: bool,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            float_wavelength: true,
            float_distance: true,
            float_beam_centre_x: true,
            float_beam_centre_y: true,
            float_yaw: true,
            float_roll: true,
            max_rings: 12,
            ring_selection: None,
            refine_with_points: false,
        }
    }
}

impl CalibrationParameters {
    /// Number of floating parameters.
    pub fn free_count(&self) -> usize {
        [
            self.float_wavelength,
            self.float_distance,
            self.float_beam_centre_x,
            self.float_beam_centre_y,
            self.float_yaw,
            self.float_roll,
        ]
        .into_iter()
        .filter(|f| *f)
        .count()
    }

    /// Everything except the wavelength floats.
    pub fn fixed_wavelength() -> Self {
        Self {
            float_wavelength: false,
            ..Self::default()
        }
    }

    /// Calibrant indices (into `d_spacings`) to search for.
    pub fn selected_rings(&self, n_spacings: usize) -> Vec<usize> {
        let base: Vec<usize> = match &self.ring_selection {
            Some(sel) => sel.iter().copied().filter(|&i| i < n_spacings).collect(),
            None => (0..n_spacings).collect(),
        };
        base.into_iter().take(self.max_rings.max(1)).collect()
    }
}

/// Full configuration of a calibration run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Ring finding.
    pub ring_search: RingSearchOptions,
    /// Beam-centre estimate.
    pub centre: CentreEstimatorConfig,
    /// Ring-radius seeding.
    pub matcher: StandardMatcherConfig,
    /// Floating parameters and ring limits.
    pub parameters: CalibrationParameters,
    /// Budget of the geometry and point optimisers.
    pub optimizer: OptimizerConfig,
}

impl CalibrationConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, CalibrationError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
