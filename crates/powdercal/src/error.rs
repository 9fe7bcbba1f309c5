//! Error taxonomy for calibration runs.

use thiserror::Error;

/// Errors surfaced by the public calibration operations.
///
/// Ring-level failures ([`CalibrationError::RingNotFound`]) are normally
/// recovered inside a run by dropping the ring; they only reach the caller
/// from the low-level [`crate::fit_ring`] entry point.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    /// Malformed input that is not covered by a more specific variant.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Image and mask (or raw buffer) dimensions disagree.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected `[width, height]` or `[len, 1]`.
        expected: [usize; 2],
        /// Provided shape.
        got: [usize; 2],
    },
    /// The calibrant carries no usable d-spacings.
    #[error("calibrant '{0}' has no usable d-spacings")]
    EmptyCalibrant(String),
    /// Two per-image input lists have different lengths.
    #[error("{what}: expected {expected} entries, got {got}")]
    CountMismatch {
        /// Which list is inconsistent.
        what: &'static str,
        /// Number of entries expected (usually the image count).
        expected: usize,
        /// Number of entries provided.
        got: usize,
    },
    /// A single ring could not be fitted.
    #[error("ring near radius {radius_px:.1}px not found: {reason}")]
    RingNotFound {
        /// Seed radius (semi-major axis) in pixels.
        radius_px: f64,
        /// Short machine-friendly reason.
        reason: String,
    },
    /// Fewer usable rings than the geometry solve needs.
    #[error("image {image}: {found} usable rings, need at least {needed}")]
    InsufficientRings {
        /// Index of the offending image.
        image: usize,
        /// Rings left after dropping failed fits.
        found: usize,
        /// Minimum number required.
        needed: usize,
    },
    /// The point-based solver has more free parameters than constraints.
    #[error("under-determined: {free} floating parameters, {available} constraints")]
    UnderDetermined {
        /// Number of floating parameters requested.
        free: usize,
        /// Constraints available (points, or rings when too few).
        available: usize,
    },
    /// An intermediate estimate is unusable (e.g. peak on the image border).
    #[error("degenerate estimate: {0}")]
    DegenerateEstimate(String),
    /// The run was cancelled between stages.
    #[error("calibration cancelled")]
    Cancelled,
    /// Reading a JSON input failed.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(e.to_string())
    }
}
