//! Rough beam-centre estimate from the point symmetry of a ring pattern.
//!
//! A pattern symmetric about `c` satisfies `I(x) = I(2c − x)`, so its
//! self-convolution peaks at `2c`. The convolution is computed on a
//! block-averaged copy with zero padding (no wrap-around) and the peak is
//! refined with Gaussian fits to the row and column means of a small patch.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CalibrationError;
use crate::frame::PowderImage;
use crate::profile::parabolic_offset;

/// Centre estimator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentreEstimatorConfig {
    /// Longest side of the downsampled image, px.
    pub max_downsampled_side: u32,
    /// Half size of the refinement patch (3 → 7×7).
    pub patch_half_size: usize,
}

impl Default for CentreEstimatorConfig {
    fn default() -> Self {
        Self {
            max_downsampled_side: 256,
            patch_half_size: 3,
        }
    }
}

/// Estimate the beam centre `[x, y]` in full-resolution pixels.
pub fn estimate_centre(
    image: &PowderImage,
    cfg: &CentreEstimatorConfig,
) -> Result<[f64; 2], CalibrationError> {
    image.validate()?;
    let long = image.width().max(image.height());
    let factor = long.div_ceil(cfg.max_downsampled_side.max(8)).max(1) as usize;
    let half = cfg.patch_half_size.max(1);
    let (small, sw, sh) = block_average(image, factor);
    if sw < 2 * half + 1 || sh < 2 * half + 1 {
        return Err(CalibrationError::DegenerateEstimate(format!(
            "{}x{} image downsamples to {sw}x{sh}, too small for a {}-pixel patch",
            image.width(),
            image.height(),
            2 * half + 1
        )));
    }

    let (conv, pw, ph) = self_convolve(&small, sw, sh);
    let (kx, ky) = argmax(&conv, pw);
    if kx < half || ky < half || kx + half >= pw || ky + half >= ph {
        return Err(CalibrationError::DegenerateEstimate(format!(
            "self-convolution peak at ({kx}, {ky}) touches the border"
        )));
    }

    let side = 2 * half + 1;
    let mut col_mean = vec![0.0; side];
    let mut row_mean = vec![0.0; side];
    for dy in 0..side {
        for dx in 0..side {
            let v = conv[(ky + dy - half) * pw + (kx + dx - half)];
            col_mean[dx] += v / side as f64;
            row_mean[dy] += v / side as f64;
        }
    }
    let ox = gaussian_peak_offset(&col_mean);
    let oy = gaussian_peak_offset(&row_mean);

    // Peak index is twice the centre in downsampled pixels; block i covers
    // full-resolution pixels [i f, (i + 1) f).
    let f = factor as f64;
    let to_full = |k: f64| 0.5 * k * f + 0.5 * (f - 1.0);
    let centre = [to_full(kx as f64 + ox), to_full(ky as f64 + oy)];
    debug!(factor, kx, ky, ox, oy, cx = centre[0], cy = centre[1], "centre estimate");
    Ok(centre)
}

/// Mean of unmasked pixels over `factor × factor` blocks, background removed.
fn block_average(image: &PowderImage, factor: usize) -> (Vec<f64>, usize, usize) {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let sw = w / factor;
    let sh = h / factor;
    let mut out = vec![0.0; sw * sh];
    let mut valid = vec![false; sw * sh];
    for by in 0..sh {
        for bx in 0..sw {
            let mut sum = 0.0;
            let mut n = 0usize;
            for y in by * factor..(by + 1) * factor {
                for x in bx * factor..(bx + 1) * factor {
                    if let Some(v) = image.value(x as u32, y as u32) {
                        sum += v as f64;
                        n += 1;
                    }
                }
            }
            if n > 0 {
                out[by * sw + bx] = sum / n as f64;
                valid[by * sw + bx] = true;
            }
        }
    }
    let count = valid.iter().filter(|v| **v).count().max(1);
    let mean = out.iter().sum::<f64>() / count as f64;
    for (v, ok) in out.iter_mut().zip(&valid) {
        *v = if *ok { *v - mean } else { 0.0 };
    }
    (out, sw, sh)
}

/// Linear self-convolution through a zero-padded 2D FFT.
fn self_convolve(data: &[f64], w: usize, h: usize) -> (Vec<f64>, usize, usize) {
    let (pw, ph) = (2 * w, 2 * h);
    let mut buf = vec![Complex::new(0.0, 0.0); pw * ph];
    for y in 0..h {
        for x in 0..w {
            buf[y * pw + x].re = data[y * w + x];
        }
    }

    let mut planner = FftPlanner::<f64>::new();
    fft_2d(&mut planner, &mut buf, pw, ph, false);
    for c in buf.iter_mut() {
        *c = *c * *c;
    }
    fft_2d(&mut planner, &mut buf, pw, ph, true);

    let conv = buf.iter().map(|c| c.re).collect();
    (conv, pw, ph)
}

fn fft_2d(planner: &mut FftPlanner<f64>, buf: &mut [Complex<f64>], w: usize, h: usize, inverse: bool) {
    let row_fft = if inverse {
        planner.plan_fft_inverse(w)
    } else {
        planner.plan_fft_forward(w)
    };
    for row in buf.chunks_exact_mut(w) {
        row_fft.process(row);
    }

    let col_fft = if inverse {
        planner.plan_fft_inverse(h)
    } else {
        planner.plan_fft_forward(h)
    };
    let mut col = vec![Complex::new(0.0, 0.0); h];
    for x in 0..w {
        for y in 0..h {
            col[y] = buf[y * w + x];
        }
        col_fft.process(&mut col);
        for y in 0..h {
            buf[y * w + x] = col[y];
        }
    }
}

fn argmax(data: &[f64], w: usize) -> (usize, usize) {
    let mut best = 0usize;
    for (i, v) in data.iter().enumerate() {
        if *v > data[best] {
            best = i;
        }
    }
    (best % w, best / w)
}

/// Sub-sample offset of the peak of a sampled Gaussian-like profile from its
/// middle sample.
///
/// Uses the log-parabola through the middle sample and its neighbours (exact
/// for a Gaussian); falls back to a least-squares parabola over the whole
/// profile when those values are not all positive.
fn gaussian_peak_offset(profile: &[f64]) -> f64 {
    let m = profile.len() / 2;
    let (l, c, r) = (profile[m - 1], profile[m], profile[m + 1]);
    if l > 0.0 && c > 0.0 && r > 0.0 {
        return parabolic_offset(l.ln(), c.ln(), r.ln());
    }
    least_squares_vertex(profile).unwrap_or_else(|| parabolic_offset(l, c, r))
}

fn least_squares_vertex(profile: &[f64]) -> Option<f64> {
    use nalgebra::{Matrix3, Vector3};
    let m = (profile.len() / 2) as f64;
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    for (i, v) in profile.iter().enumerate() {
        let x = i as f64 - m;
        let row = Vector3::new(1.0, x, x * x);
        ata += row * row.transpose();
        atb += row * *v;
    }
    let c = ata.try_inverse()? * atb;
    if c[2] >= 0.0 {
        return None;
    }
    Some((-c[1] / (2.0 * c[2])).clamp(-1.0, 1.0))
}
