//! Shared helpers for image-based unit tests.

use image::Luma;
use rand::prelude::*;

use crate::conic::Ellipse;
use crate::frame::{IntensityImage, PowderImage};

/// One ring drawn as a Gaussian ridge around an ellipse.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RingSpec {
    pub ellipse: Ellipse,
    pub sigma: f64,
    pub amplitude: f64,
}

impl RingSpec {
    pub fn circle(cx: f64, cy: f64, r: f64, sigma: f64) -> Self {
        Self::ellipse(Ellipse::circle(cx, cy, r), sigma)
    }

    pub fn ellipse(ellipse: Ellipse, sigma: f64) -> Self {
        Self {
            ellipse,
            sigma,
            amplitude: 200.0,
        }
    }
}

/// Render rings over a flat background using the Sampson distance.
pub(crate) fn draw_rings(w: u32, h: u32, rings: &[RingSpec], background: f32) -> PowderImage {
    let mut img = IntensityImage::new(w, h);
    for (x, y, px) in img.enumerate_pixels_mut() {
        let mut v = background as f64;
        for r in rings {
            let d = r.ellipse.sampson_distance(x as f64, y as f64);
            v += r.amplitude * (-d * d / (2.0 * r.sigma * r.sigma)).exp();
        }
        *px = Luma([v as f32]);
    }
    PowderImage::new(img)
}

/// Gaussian blur plus uniform noise of half-width `noise`, seeded.
pub(crate) fn blur_and_noise(img: &PowderImage, sigma: f32, noise: f32, seed: u64) -> PowderImage {
    let mut blurred = imageproc::filter::gaussian_blur_f32(img.pixels(), sigma);
    let mut rng = StdRng::seed_from_u64(seed);
    for px in blurred.pixels_mut() {
        px.0[0] += rng.gen_range(-noise..=noise);
    }
    PowderImage::new(blurred)
}
