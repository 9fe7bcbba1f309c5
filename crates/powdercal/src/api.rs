//! High-level calibration API.
//!
//! [`Calibrator`] is the primary entry point. It wraps a
//! [`CalibrationConfig`] and an optional [`CancelFlag`] and offers the four
//! calibration operations; the free functions of the same names run them with
//! the default configuration.

use std::path::Path;

use tracing::{info, warn};

use crate::calibrant::CalibrantSpacing;
use crate::cancel::{check, CancelFlag};
use crate::config::{CalibrationConfig, CalibrationParameters, FixedParameter, RingSearchOptions};
use crate::ellipse_cal::{calibrate_images, find_image_rings};
use crate::error::CalibrationError;
use crate::frame::PowderImage;
use crate::geometry::DetectorGeometry;
use crate::point_cal::{solve_points, PointRing};
use crate::result::{CalibrationProvenance, CalibrationResult, ResolutionEllipse};
use crate::ring_fit::fit_ring;

/// Primary calibration interface.
///
/// Create once, calibrate many images.
///
/// # Examples
///
/// ```no_run
/// use powdercal::{CalibrantSpacing, Calibrator, PowderImage};
///
/// let ceo2 = CalibrantSpacing::new("CeO2", vec![3.1244, 2.7059, 1.9133, 1.6317]);
/// let image = PowderImage::from_raw(2048, 2048, vec![0.0; 2048 * 2048]).unwrap();
/// let calibrator = Calibrator::new();
/// let result = calibrator.calibrate_known_wavelength(&image, 0.425, 0.2, &ceo2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    config: CalibrationConfig,
    cancel: Option<CancelFlag>,
}

impl Calibrator {
    /// Calibrator with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with full config control.
    pub fn with_config(config: CalibrationConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Load the configuration from JSON.
    pub fn from_config_json_file(path: &Path) -> Result<Self, CalibrationError> {
        Ok(Self::with_config(CalibrationConfig::from_json_file(path)?))
    }

    /// Abort runs when `flag` is raised.
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Access the current configuration.
    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Mutable access to configuration for post-construction tuning.
    pub fn config_mut(&mut self) -> &mut CalibrationConfig {
        &mut self.config
    }

    /// Calibrate one image whose wavelength (Å) is known.
    pub fn calibrate_known_wavelength(
        &self,
        image: &PowderImage,
        wavelength_angstrom: f64,
        pixel_size_mm: f64,
        calibrant: &CalibrantSpacing,
    ) -> Result<CalibrationResult, CalibrationError> {
        if !(wavelength_angstrom.is_finite() && wavelength_angstrom > 0.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "wavelength {wavelength_angstrom} is not positive"
            )));
        }
        calibrate_images(
            std::slice::from_ref(image),
            &[0.0],
            pixel_size_mm,
            calibrant,
            FixedParameter::Wavelength(wavelength_angstrom),
            &self.config,
            self.cancel.as_ref(),
        )
    }

    /// Calibrate images taken at known relative `distances` (mm).
    ///
    /// `search` and `parameters` override the corresponding parts of the
    /// configuration for this run.
    #[allow(clippy::too_many_arguments)]
    pub fn calibrate_multiple_images(
        &self,
        images: &[PowderImage],
        distances: &[f64],
        pixel_size_mm: f64,
        calibrant: &CalibrantSpacing,
        fixed: FixedParameter,
        search: &RingSearchOptions,
        parameters: &CalibrationParameters,
    ) -> Result<CalibrationResult, CalibrationError> {
        let config = CalibrationConfig {
            ring_search: *search,
            parameters: parameters.clone(),
            ..self.config.clone()
        };
        calibrate_images(
            images,
            distances,
            pixel_size_mm,
            calibrant,
            fixed,
            &config,
            self.cancel.as_ref(),
        )
    }

    /// Calibrate one image from a caller-supplied starting geometry.
    ///
    /// Rings are fitted around the ellipses `seed` predicts and the geometry is
    /// refined directly against the ring points. The wavelength floats only
    /// when `refine_wavelength` is set.
    pub fn calibrate_single_image_manual_point(
        &self,
        image: &PowderImage,
        calibrant: &CalibrantSpacing,
        seed: &DetectorGeometry,
        refine_wavelength: bool,
    ) -> Result<CalibrationResult, CalibrationError> {
        image.validate()?;
        let d_spacings = calibrant.validated_angstrom()?;
        let selected = self.config.parameters.selected_rings(d_spacings.len());

        let mut rings = Vec::with_capacity(selected.len());
        for d in selected.into_iter().map(|i| d_spacings[i]) {
            let Some(predicted) = seed.ring_ellipse(d) else {
                continue;
            };
            match fit_ring(image, &predicted, &self.config.ring_search) {
                Ok(fit) => rings.push(PointRing {
                    d_spacing: d,
                    points: fit.points,
                }),
                Err(e) => warn!(d, error = %e, "ring dropped"),
            }
        }
        check(self.cancel.as_ref())?;

        let params = CalibrationParameters {
            float_wavelength: refine_wavelength,
            ..self.config.parameters.clone()
        };
        let fit = solve_points(&rings, seed, &params, &self.config.optimizer)?;
        info!(
            rings = rings.len(),
            points = fit.point_count,
            residual = fit.residual,
            "manual point calibration"
        );
        let provenance = CalibrationProvenance {
            calibrant: calibrant.name.clone(),
            source: image.source().map(str::to_owned),
            method: "point calibration".into(),
            residual: fit.residual,
        };
        Ok(CalibrationResult::from_geometry(
            &fit.geometry,
            fit.residual,
            provenance,
        ))
    }

    /// Fitted calibrant rings of one image, tagged with their d-spacings.
    pub fn find_matched_ellipses(
        &self,
        image: &PowderImage,
        pixel_size_mm: f64,
        calibrant: &CalibrantSpacing,
    ) -> Result<Vec<ResolutionEllipse>, CalibrationError> {
        if !(pixel_size_mm.is_finite() && pixel_size_mm > 0.0) {
            return Err(CalibrationError::InvalidInput(format!(
                "pixel size {pixel_size_mm} is not positive"
            )));
        }
        let d_spacings = calibrant.validated_angstrom()?;
        find_image_rings(image, pixel_size_mm, &d_spacings, None, &self.config)
    }
}

/// [`Calibrator::calibrate_known_wavelength`] with default configuration.
pub fn calibrate_known_wavelength(
    image: &PowderImage,
    wavelength_angstrom: f64,
    pixel_size_mm: f64,
    calibrant: &CalibrantSpacing,
) -> Result<CalibrationResult, CalibrationError> {
    Calibrator::new().calibrate_known_wavelength(image, wavelength_angstrom, pixel_size_mm, calibrant)
}

/// [`Calibrator::calibrate_multiple_images`] with default configuration.
#[allow(clippy::too_many_arguments)]
pub fn calibrate_multiple_images(
    images: &[PowderImage],
    distances: &[f64],
    pixel_size_mm: f64,
    calibrant: &CalibrantSpacing,
    fixed: FixedParameter,
    search: &RingSearchOptions,
    parameters: &CalibrationParameters,
) -> Result<CalibrationResult, CalibrationError> {
    Calibrator::new().calibrate_multiple_images(
        images,
        distances,
        pixel_size_mm,
        calibrant,
        fixed,
        search,
        parameters,
    )
}

/// [`Calibrator::calibrate_single_image_manual_point`] with default configuration.
pub fn calibrate_single_image_manual_point(
    image: &PowderImage,
    calibrant: &CalibrantSpacing,
    seed: &DetectorGeometry,
    refine_wavelength: bool,
) -> Result<CalibrationResult, CalibrationError> {
    Calibrator::new().calibrate_single_image_manual_point(image, calibrant, seed, refine_wavelength)
}

/// [`Calibrator::find_matched_ellipses`] with default configuration.
pub fn find_matched_ellipses(
    image: &PowderImage,
    pixel_size_mm: f64,
    calibrant: &CalibrantSpacing,
) -> Result<Vec<ResolutionEllipse>, CalibrationError> {
    Calibrator::new().find_matched_ellipses(image, pixel_size_mm, calibrant)
}
