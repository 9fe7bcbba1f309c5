//! Detector frame container with optional exclusion mask and sub-pixel sampling.

use image::{GrayImage, ImageBuffer, Luma};

use crate::error::CalibrationError;

/// Single-channel floating-point intensity image.
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Immutable calibration input: intensities plus an optional exclusion mask.
///
/// Mask entries are row-major and `true` marks an excluded pixel.
#[derive(Debug, Clone)]
pub struct PowderImage {
    pixels: IntensityImage,
    mask: Option<Vec<bool>>,
    source: Option<String>,
}

impl PowderImage {
    /// Wrap an intensity image without a mask.
    pub fn new(pixels: IntensityImage) -> Self {
        Self {
            pixels,
            mask: None,
            source: None,
        }
    }

    /// Build from a row-major buffer.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Result<Self, CalibrationError> {
        let len = data.len();
        let pixels = ImageBuffer::from_raw(width, height, data).ok_or(
            CalibrationError::ShapeMismatch {
                expected: [width as usize * height as usize, 1],
                got: [len, 1],
            },
        )?;
        Ok(Self::new(pixels))
    }

    /// Convert an 8-bit grayscale image (values kept on the 0–255 scale).
    pub fn from_gray(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let data = gray.as_raw().iter().map(|&v| v as f32).collect();
        Self::new(ImageBuffer::from_raw(w, h, data).unwrap_or_else(|| IntensityImage::new(w, h)))
    }

    /// Attach an exclusion mask of identical shape.
    pub fn with_mask(mut self, mask: Vec<bool>) -> Result<Self, CalibrationError> {
        let n = self.len();
        if mask.len() != n {
            return Err(CalibrationError::ShapeMismatch {
                expected: [self.width() as usize, self.height() as usize],
                got: [mask.len(), 1],
            });
        }
        self.mask = Some(mask);
        Ok(self)
    }

    /// Record where the image came from (copied into result provenance).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// `true` for a zero-sized image.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying intensity buffer.
    pub fn pixels(&self) -> &IntensityImage {
        &self.pixels
    }

    /// Optional source description.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Reject images that cannot be calibrated at all.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.width() < 8 || self.height() < 8 {
            return Err(CalibrationError::InvalidInput(format!(
                "image too small: {}x{}",
                self.width(),
                self.height()
            )));
        }
        if self.pixels.as_raw().iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidInput(
                "image contains non-finite intensities".to_string(),
            ));
        }
        Ok(())
    }

    /// `true` when the pixel is excluded (or outside the image).
    #[inline]
    pub fn is_masked(&self, x: u32, y: u32) -> bool {
        if x >= self.width() || y >= self.height() {
            return true;
        }
        match &self.mask {
            Some(m) => m[y as usize * self.width() as usize + x as usize],
            None => false,
        }
    }

    /// Intensity at integer pixel, `None` when masked or out of bounds.
    #[inline]
    pub fn value(&self, x: u32, y: u32) -> Option<f32> {
        if self.is_masked(x, y) {
            return None;
        }
        Some(self.pixels.as_raw()[y as usize * self.width() as usize + x as usize])
    }

    /// Bilinear sample at a sub-pixel position.
    ///
    /// Returns `None` outside the image or when any of the four neighbours is
    /// masked.
    #[inline]
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (w, h) = (self.width(), self.height());
        if w < 2 || h < 2 || !(x >= 0.0) || !(y >= 0.0) {
            return None;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        if x0 >= w - 1 || y0 >= h - 1 {
            return None;
        }
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;
        let p00 = self.value(x0, y0)? as f64;
        let p10 = self.value(x0 + 1, y0)? as f64;
        let p01 = self.value(x0, y0 + 1)? as f64;
        let p11 = self.value(x0 + 1, y0 + 1)? as f64;
        Some(
            (1.0 - fx) * (1.0 - fy) * p00
                + fx * (1.0 - fy) * p10
                + (1.0 - fx) * fy * p01
                + fx * fy * p11,
        )
    }
}
