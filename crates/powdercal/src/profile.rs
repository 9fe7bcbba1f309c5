//! Azimuthal integration and 1D peak helpers shared by the matcher and the
//! ring fitter.

use serde::{Deserialize, Serialize};

use crate::frame::PowderImage;

/// Mean intensity in 1-px radius bins around a centre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadialProfile {
    /// Bin centre radius in pixels.
    pub radii: Vec<f64>,
    /// Mean unmasked intensity per bin (0 for empty bins).
    pub intensity: Vec<f64>,
}

impl RadialProfile {
    /// Number of bins.
    pub fn len(&self) -> usize {
        self.radii.len()
    }

    /// `true` when there are no bins.
    pub fn is_empty(&self) -> bool {
        self.radii.is_empty()
    }

    /// Largest radius covered.
    pub fn max_radius(&self) -> f64 {
        self.radii.last().copied().unwrap_or(0.0)
    }

    /// Peak-emphasising transform: 3-point smoothing, negated second
    /// derivative, negative values clipped to zero.
    pub fn sharpened(&self) -> Vec<f64> {
        let mut smooth = self.intensity.clone();
        smooth_3point(&mut smooth);
        let n = smooth.len();
        let mut out = vec![0.0; n];
        for i in 1..n.saturating_sub(1) {
            let d2 = smooth[i + 1] - 2.0 * smooth[i] + smooth[i - 1];
            out[i] = (-d2).max(0.0);
        }
        out
    }
}

/// Integrate `image` azimuthally around `centre`.
///
/// The profile extends to the farthest image corner.
pub fn radial_profile(image: &PowderImage, centre: [f64; 2]) -> RadialProfile {
    let (w, h) = (image.width(), image.height());
    let corners = [[0.0, 0.0], [w as f64, 0.0], [0.0, h as f64], [w as f64, h as f64]];
    let r_max = corners
        .iter()
        .map(|c| (c[0] - centre[0]).hypot(c[1] - centre[1]))
        .fold(0.0, f64::max);
    let nbins = r_max.ceil() as usize + 1;

    let mut sum = vec![0.0f64; nbins];
    let mut count = vec![0u32; nbins];
    for y in 0..h {
        for x in 0..w {
            let Some(v) = image.value(x, y) else {
                continue;
            };
            let r = (x as f64 - centre[0]).hypot(y as f64 - centre[1]);
            let bin = r.round() as usize;
            if bin < nbins {
                sum[bin] += v as f64;
                count[bin] += 1;
            }
        }
    }

    let intensity = sum
        .iter()
        .zip(&count)
        .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
        .collect();
    RadialProfile {
        radii: (0..nbins).map(|i| i as f64).collect(),
        intensity,
    }
}

/// 3-point moving average; boundary values unchanged, no-op below 5 samples.
pub fn smooth_3point(d: &mut [f64]) {
    let n = d.len();
    if n < 5 {
        return;
    }
    let mut left = d[0];
    let mut mid = d[1];
    for i in 1..(n - 1) {
        let right = d[i + 1];
        d[i] = (left + mid + right) / 3.0;
        left = mid;
        mid = right;
    }
}

/// Sub-sample offset of a peak from three neighbouring values, in `[-0.5, 0.5]`.
pub fn parabolic_offset(left: f64, mid: f64, right: f64) -> f64 {
    let denom = left - 2.0 * mid + right;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
}

/// Median (average of the two middle values for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let mid = v.len() / 2;
    Some(if v.len() % 2 == 0 {
        0.5 * (v[mid - 1] + v[mid])
    } else {
        v[mid]
    })
}

/// Median absolute deviation of `values` from `centre`; 0 when empty.
pub fn median_abs_deviation(values: &[f64], centre: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - centre).abs()).collect();
    median(&deviations).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::IntensityImage;
    use approx::assert_relative_eq;
    use image::Luma;

    #[test]
    fn ring_shows_up_in_profile() {
        let mut px = IntensityImage::new(64, 64);
        for y in 0..64u32 {
            for x in 0..64u32 {
                let r = (x as f64 - 32.0).hypot(y as f64 - 32.0);
                let v = (-(r - 20.0).powi(2) / 2.0).exp() as f32;
                px.put_pixel(x, y, Luma([v]));
            }
        }
        let prof = radial_profile(&PowderImage::new(px), [32.0, 32.0]);
        let peak = |v: &[f64]| {
            v.iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
        };
        assert_eq!(peak(&prof.intensity), Some(20));
        assert_eq!(peak(&prof.sharpened()), Some(20));
        assert!(prof.max_radius() >= 45.0);
    }

    #[test]
    fn parabola_vertex() {
        // y = -(x - 0.25)^2 sampled at -1, 0, 1
        let f = |x: f64| -(x - 0.25f64).powi(2);
        assert_relative_eq!(parabolic_offset(f(-1.0), f(0.0), f(1.0)), 0.25, epsilon = 1e-12);
        assert_eq!(parabolic_offset(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn robust_stats() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert!(median(&[]).is_none());
        assert_eq!(median_abs_deviation(&[1.0, 2.0, 9.0], 2.0), 1.0);
        assert_eq!(median_abs_deviation(&[], 0.0), 0.0);
    }
}
