//! powdercal: geometry calibration of flat area detectors from powder
//! diffraction rings.
//!
//! Given images of a calibrant with known d-spacings, the crate recovers the
//! beam centre, the detector tilt, the sample-detector distance and,
//! optionally, the wavelength. The pipeline stages are:
//!
//! 1. **Centre** – rough beam centre from the point symmetry of the pattern.
//! 2. **Match** – coarse ring radii from a radial profile matched against the
//!    calibrant over an (energy, distance) grid.
//! 3. **Ring fit** – robust per-ring ellipse fits with outlier rejection.
//! 4. **Ellipse calibration** – centre line, beam intercept and a joint
//!    distance/wavelength fit across images.
//! 5. **Point calibration** – optional direct fit of the geometry to the
//!    ring points in reciprocal space.
//!
//! # Public API
//! - [`Calibrator`] and the free functions [`calibrate_known_wavelength`],
//!   [`calibrate_multiple_images`], [`calibrate_single_image_manual_point`]
//!   and [`find_matched_ellipses`]
//! - [`calibrate_ellipses`] for callers that already have ring ellipses
//! - [`conic`] fitting primitives for callers that trace their own rings
//! - configuration, geometry and result structures
//!
//! Units: Å for wavelength and d-spacing, mm for distances and pixel size,
//! pixels for image coordinates. Angles are radians internally; results
//! report tilt and azimuth in degrees.

mod api;
mod calibrant;
mod cancel;
mod centre;
mod config;
pub mod conic;
mod ellipse_cal;
mod error;
mod frame;
mod geometry;
mod matcher;
mod optim;
mod point_cal;
mod profile;
mod result;
mod ring_fit;
mod ring_shape;
pub mod synthetic;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::{
    calibrate_known_wavelength, calibrate_multiple_images, calibrate_single_image_manual_point,
    find_matched_ellipses, Calibrator,
};
pub use calibrant::{
    energy_to_wavelength, q_from_d, two_theta, wavelength_to_energy, CalibrantSpacing,
    LengthUnit, HC_KEV_ANGSTROM,
};
pub use cancel::CancelFlag;
pub use centre::{estimate_centre, CentreEstimatorConfig};
pub use config::{CalibrationConfig, CalibrationParameters, FixedParameter, RingSearchOptions};
pub use conic::Ellipse;
pub use ellipse_cal::{
    calibrate_ellipses, fit_centre_line, fit_geometry, fit_intercept, refine_with_points,
    CentreLine, EllipseCalibration, GeometryFit, ImageAxes, InterceptFit,
};
pub use error::CalibrationError;
pub use frame::{IntensityImage, PowderImage};
pub use geometry::{cone_section, ConeSection, DetectorGeometry};
pub use matcher::{match_standard, MatchedRing, StandardMatch, StandardMatcherConfig};
pub use optim::{OptimizeOutcome, OptimizerConfig};
pub use point_cal::{solve_points, PointFit, PointRing};
pub use profile::{radial_profile, RadialProfile};
pub use result::{CalibrationProvenance, CalibrationResult, PerImageGeometry, ResolutionEllipse};
pub use ring_fit::{fit_ring, FittedRing, RingFitError};
pub use ring_shape::RingShape;
