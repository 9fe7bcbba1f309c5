use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use powdercal::synthetic::{render_pattern, RenderOptions};
use powdercal::{
    calibrate_ellipses, estimate_centre, fit_ring, CentreEstimatorConfig, DetectorGeometry,
    Ellipse, FixedParameter, OptimizerConfig, PerImageGeometry, PowderImage, ResolutionEllipse,
    RingSearchOptions,
};

const CEO2: [f64; 5] = [3.1244, 2.7059, 1.9133, 1.6317, 1.5622];

fn tilted(distance_mm: f64) -> DetectorGeometry {
    DetectorGeometry::new([1030.4, 1011.7], distance_mm, 0.1, 0.5)
        .with_tilt(1.2f64.to_radians(), 130f64.to_radians())
}

fn make_pattern(side: u32, seed: u64) -> PowderImage {
    let clean = render_pattern(&tilted(200.0), &CEO2, side, side, &RenderOptions::default());
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pixels = clean.pixels().clone();
    for p in pixels.pixels_mut() {
        p.0[0] += rng.gen_range(-10.0f32..10.0f32);
    }
    PowderImage::new(pixels)
}

fn bench_centre(c: &mut Criterion) {
    let img = make_pattern(2048, 7);
    let cfg = CentreEstimatorConfig::default();
    c.bench_function("centre_estimate_2048", |b| {
        b.iter(|| black_box(estimate_centre(black_box(&img), black_box(&cfg))))
    });
}

fn bench_ring_fit(c: &mut Criterion) {
    let img = make_pattern(2048, 9);
    let truth = tilted(200.0)
        .ring_ellipse(CEO2[2])
        .expect("ring inside the detector");
    let seed = Ellipse::circle(truth.cx + 3.0, truth.cy - 2.0, truth.a - 4.0);
    let opts = RingSearchOptions::default();
    c.bench_function("ring_fit_180rays", |b| {
        b.iter(|| {
            let fit = fit_ring(black_box(&img), black_box(&seed), black_box(&opts))
                .expect("deterministic fixture should always fit");
            black_box(fit.points.len())
        })
    });
}

fn bench_ellipse_calibration(c: &mut Criterion) {
    let images: Vec<PerImageGeometry> = (0..5)
        .map(|k| {
            let d = 150.0 + 50.0 * k as f64;
            let g = tilted(d);
            PerImageGeometry {
                pixel_size_mm: 0.1,
                distance_mm: d,
                rings: CEO2
                    .iter()
                    .filter_map(|&s| {
                        g.ring_ellipse(s).map(|ellipse| ResolutionEllipse {
                            ellipse,
                            d_spacing: s,
                            points: Vec::new(),
                        })
                    })
                    .collect(),
            }
        })
        .collect();
    let cfg = OptimizerConfig::default();
    c.bench_function("ellipse_calibration_5img", |b| {
        b.iter(|| {
            let out = calibrate_ellipses(black_box(&images), FixedParameter::None, &cfg, None)
                .expect("analytic fixture should always calibrate");
            black_box(out.result.wavelength_angstrom)
        })
    });
}

criterion_group!(
    hotpaths,
    bench_centre,
    bench_ring_fit,
    bench_ellipse_calibration
);
criterion_main!(hotpaths);
