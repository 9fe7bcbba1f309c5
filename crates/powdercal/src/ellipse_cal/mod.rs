//! Calibration from fitted ring ellipses.
//!
//! The centres of a tilted detector's ring ellipses lie on a line through the
//! beam centre, along the tilt azimuth. [`line_fit`] finds that line,
//! [`intercept_fit`] locates the beam centre on it, [`geometry_fit`] fits the
//! distance and wavelength across images, and [`orchestrator`] runs the chain.

pub mod geometry_fit;
pub mod intercept_fit;
pub mod line_fit;
pub mod orchestrator;

pub use geometry_fit::{fit_geometry, GeometryFit, ImageAxes};
pub use intercept_fit::{fit_intercept, InterceptFit};
pub use line_fit::{fit_centre_line, CentreLine};
pub use orchestrator::{
    calibrate_ellipses, calibrate_images, find_image_rings, refine_with_points,
    EllipseCalibration,
};
