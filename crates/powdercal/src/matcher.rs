//! Coarse ring-radius seeds by brute-force matching of a radial profile to a
//! calibrant.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibrant::{energy_to_wavelength, two_theta, wavelength_to_energy};
use crate::profile::RadialProfile;

/// Search grid of the standard matcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardMatcherConfig {
    /// Lowest candidate energy, keV.
    pub energy_min_kev: f64,
    /// Highest candidate energy, keV.
    pub energy_max_kev: f64,
    /// Energy step, keV.
    pub energy_step_kev: f64,
    /// Shortest candidate distance, mm.
    pub distance_min_mm: f64,
    /// Longest candidate distance, mm.
    pub distance_max_mm: f64,
    /// Distance step, mm.
    pub distance_step_mm: f64,
    /// Half width of the binary window around each predicted radius, px.
    pub window_half_width_px: f64,
}

impl Default for StandardMatcherConfig {
    fn default() -> Self {
        Self {
            energy_min_kev: 5.0,
            energy_max_kev: 40.0,
            energy_step_kev: 0.5,
            distance_min_mm: 50.0,
            distance_max_mm: 1500.0,
            distance_step_mm: 1.0,
            window_half_width_px: 5.0,
        }
    }
}

impl StandardMatcherConfig {
    /// Same distance grid, single energy matching `wavelength_angstrom`.
    pub fn with_fixed_wavelength(mut self, wavelength_angstrom: f64) -> Self {
        let e = wavelength_to_energy(wavelength_angstrom);
        self.energy_min_kev = e;
        self.energy_max_kev = e;
        self
    }

    fn grid(min: f64, max: f64, step: f64) -> Vec<f64> {
        if !step.is_finite() || step <= 0.0 || max <= min {
            return vec![min];
        }
        let n = ((max - min) / step + 1e-9).floor() as usize;
        (0..=n).map(|i| min + step * i as f64).collect()
    }

    /// Candidate energies, keV.
    pub fn energies(&self) -> Vec<f64> {
        Self::grid(self.energy_min_kev, self.energy_max_kev, self.energy_step_kev)
    }

    /// Candidate distances, mm.
    pub fn distances(&self) -> Vec<f64> {
        Self::grid(self.distance_min_mm, self.distance_max_mm, self.distance_step_mm)
    }
}

/// Approximate radius of one calibrant ring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedRing {
    /// D-spacing, Å.
    pub d_spacing: f64,
    /// Predicted radius, px.
    pub radius_px: f64,
}

/// Best grid point and the radii it predicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardMatch {
    /// Winning energy, keV.
    pub energy_kev: f64,
    /// Winning distance, mm.
    pub distance_mm: f64,
    /// Sum of the sharpened profile under the ring windows.
    pub score: f64,
    /// Rings inside the profile range, in calibrant order.
    pub rings: Vec<MatchedRing>,
}

/// Match `profile` against `d_spacings` (Å, calibrant order).
///
/// Always returns the best grid point; ties keep the first candidate in
/// (energy, distance) order, so the result is deterministic.
pub fn match_standard(
    profile: &RadialProfile,
    d_spacings: &[f64],
    pixel_size_mm: f64,
    cfg: &StandardMatcherConfig,
) -> StandardMatch {
    let sharp = profile.sharpened();
    let n = sharp.len();
    let mut prefix = vec![0.0; n + 1];
    for (i, v) in sharp.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v;
    }
    let r_max = profile.max_radius();
    let hw = cfg.window_half_width_px;

    let mut best = (f64::NEG_INFINITY, cfg.energy_min_kev, cfg.distance_min_mm);
    let mut tan_cache = Vec::with_capacity(d_spacings.len());
    let mut windows: Vec<(usize, usize)> = Vec::with_capacity(d_spacings.len());

    for energy in cfg.energies() {
        let lambda = energy_to_wavelength(energy);
        tan_cache.clear();
        tan_cache.extend(
            d_spacings
                .iter()
                .filter_map(|&d| two_theta(d, lambda))
                .filter(|a| *a < std::f64::consts::FRAC_PI_2)
                .map(f64::tan),
        );

        for distance in cfg.distances() {
            windows.clear();
            for t in &tan_cache {
                let r = distance * t / pixel_size_mm;
                if r > r_max {
                    continue;
                }
                let lo = (r - hw).ceil().max(0.0) as usize;
                let hi = ((r + hw).floor() as usize).min(n.saturating_sub(1));
                if lo <= hi {
                    windows.push((lo, hi));
                }
            }
            let score = union_sum(&mut windows, &prefix);
            if score > best.0 {
                best = (score, energy, distance);
            }
        }
    }

    let (score, energy_kev, distance_mm) = best;
    let lambda = energy_to_wavelength(energy_kev);
    let rings = d_spacings
        .iter()
        .filter_map(|&d| {
            let a = two_theta(d, lambda)?;
            if a >= std::f64::consts::FRAC_PI_2 {
                return None;
            }
            let radius_px = distance_mm * a.tan() / pixel_size_mm;
            (radius_px <= r_max).then_some(MatchedRing {
                d_spacing: d,
                radius_px,
            })
        })
        .collect::<Vec<_>>();
    debug!(
        energy_kev,
        distance_mm,
        score,
        rings = rings.len(),
        "standard match"
    );
    StandardMatch {
        energy_kev,
        distance_mm,
        score: score.max(0.0),
        rings,
    }
}

/// Sum of `prefix`-encoded values over the union of inclusive index ranges.
fn union_sum(windows: &mut [(usize, usize)], prefix: &[f64]) -> f64 {
    windows.sort_unstable();
    let mut total = 0.0;
    let mut current: Option<(usize, usize)> = None;
    for &(lo, hi) in windows.iter() {
        current = match current {
            Some((clo, chi)) if lo <= chi + 1 => Some((clo, chi.max(hi))),
            Some((clo, chi)) => {
                total += prefix[chi + 1] - prefix[clo];
                Some((lo, hi))
            }
            None => Some((lo, hi)),
        };
    }
    if let Some((clo, chi)) = current {
        total += prefix[chi + 1] - prefix[clo];
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::DetectorGeometry;
    use crate::profile::radial_profile;
    use crate::synthetic::{render_pattern, RenderOptions};

    const CEO2: [f64; 5] = [3.1244, 2.7059, 1.9133, 1.6317, 1.5622];

    #[test]
    fn union_does_not_double_count() {
        let prefix: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let mut w = vec![(2, 5), (4, 6), (8, 8)];
        assert_eq!(union_sum(&mut w, &prefix), 6.0);
    }

    #[test]
    fn recovers_ring_radii_within_window() {
        let g = DetectorGeometry::new([300.0, 290.0], 120.0, 0.2, 0.7);
        let img = render_pattern(&g, &CEO2, 600, 600, &RenderOptions::default());
        let prof = radial_profile(&img, g.beam_centre_px);
        let cfg = StandardMatcherConfig {
            distance_min_mm: 60.0,
            distance_max_mm: 300.0,
            ..Default::default()
        };
        let m = match_standard(&prof, &CEO2, 0.2, &cfg);
        assert_eq!(m.rings.len(), CEO2.len());
        for ring in &m.rings {
            let truth = g.untilted_ring_radius_px(ring.d_spacing).unwrap();
            assert!(
                (ring.radius_px - truth).abs() < 6.0,
                "d={} got {} want {}",
                ring.d_spacing,
                ring.radius_px,
                truth
            );
        }
    }

    #[test]
    fn deterministic_and_total() {
        let flat = RadialProfile {
            radii: (0..50).map(f64::from).collect(),
            intensity: vec![1.0; 50],
        };
        let cfg = StandardMatcherConfig {
            distance_max_mm: 80.0,
            ..Default::default()
        };
        let a = match_standard(&flat, &CEO2, 0.1, &cfg);
        let b = match_standard(&flat, &CEO2, 0.1, &cfg);
        assert_eq!(a, b);
        assert_eq!(a.score, 0.0);
    }
}
