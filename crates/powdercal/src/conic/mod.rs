//! Ellipse / conic fitting primitives.
//!
//! - Direct least-squares conic fit (Fitzgibbon et al., "Direct Least Square
//!   Fitting of Ellipses", 1999).
//! - Algebraic circle fit for rings with only a handful of points.
//! - Conversion between general conic coefficients and geometric ellipses.
//! - Sampson (first-order geometric) residuals.

mod eigen;
mod fit;
mod types;

pub use fit::{fit_circle_algebraic, fit_conic_direct, fit_ellipse_direct, rms_sampson_distance};
pub use types::{conic_to_ellipse, ellipse_to_conic, ConicCoeffs, Ellipse};
pub(crate) use types::normalize_angle;
