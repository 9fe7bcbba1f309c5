use crate::conic::Ellipse;
use crate::frame::PowderImage;
use crate::profile::{median, median_abs_deviation, parabolic_offset};

#[derive(Debug, Clone, Copy)]
pub(super) struct RaySampleConfig {
    pub(super) angular_samples: usize,
    /// Window sampled inside the predicted radius, px.
    pub(super) inner_px: f64,
    /// Window sampled outside the predicted radius, px.
    pub(super) outer_px: f64,
    /// Peaks are only accepted this close to the predicted radius, px.
    pub(super) search_px: f64,
    pub(super) r_step_px: f64,
    pub(super) min_peak_prominence: f64,
}

/// Ray peaks plus the number of rays that could be searched at all.
#[derive(Debug, Clone, Default)]
pub(super) struct RaySamples {
    pub(super) points: Vec<[f64; 2]>,
    pub(super) searchable_rays: usize,
}

/// Intensity peaks along rays cast from the centre of `ellipse`.
///
/// One point per ray at most; rays whose window leaves the image or crosses
/// only masked pixels are not searchable. Background and noise come from the
/// median and MAD of the whole ray window.
pub(super) fn sample_ring_points(
    image: &PowderImage,
    ellipse: &Ellipse,
    cfg: RaySampleConfig,
) -> RaySamples {
    let n_t = cfg.angular_samples.max(8);
    let step = cfg.r_step_px.clamp(0.1, 2.0);
    let n_r = (((cfg.inner_px + cfg.outer_px) / step).ceil() as usize).max(2) + 1;

    let mut values: Vec<Option<f64>> = Vec::with_capacity(n_r);
    let mut valid: Vec<f64> = Vec::with_capacity(n_r);
    let mut out = RaySamples {
        points: Vec::with_capacity(n_t),
        searchable_rays: 0,
    };

    for ti in 0..n_t {
        let theta = ti as f64 * 2.0 * std::f64::consts::PI / n_t as f64;
        let dir = [theta.cos(), theta.sin()];
        let Some(r_pred) = ellipse.radius_along(dir) else {
            continue;
        };
        let r0 = (r_pred - cfg.inner_px).max(0.5);

        values.clear();
        valid.clear();
        for k in 0..n_r {
            let r = r0 + k as f64 * step;
            let v = image.sample(ellipse.cx + dir[0] * r, ellipse.cy + dir[1] * r);
            if let Some(v) = v {
                valid.push(v);
            }
            values.push(v);
        }
        if valid.len() < 5 {
            continue;
        }
        out.searchable_rays += 1;

        let k_lo = ((r_pred - cfg.search_px - r0) / step).floor().max(0.0) as usize;
        let k_hi = (((r_pred + cfg.search_px - r0) / step).ceil() as usize).min(n_r - 1);
        let Some((k_best, v_best)) = values
            .iter()
            .enumerate()
            .take(k_hi + 1)
            .skip(k_lo)
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };
        // Peak must be interior to both the search range and the window.
        if k_best <= k_lo || k_best >= k_hi || k_best + 1 >= values.len() {
            continue;
        }
        let (Some(left), Some(right)) = (values[k_best - 1], values[k_best + 1]) else {
            continue;
        };

        let Some(background) = median(&valid) else {
            continue;
        };
        let noise = (1.4826 * median_abs_deviation(&valid, background))
            .max(1e-9 * background.abs().max(1.0));
        if v_best - background < cfg.min_peak_prominence * noise {
            continue;
        }

        let r = r0 + (k_best as f64 + parabolic_offset(left, v_best, right)) * step;
        out.points.push([ellipse.cx + dir[0] * r, ellipse.cy + dir[1] * r]);
    }
    out
}
