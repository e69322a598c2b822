//! Integration tests: render synthetic swaths with a known spectrum and slit
//! function and verify that the decomposition recovers them.


use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use slitdec::{
    decompose, decompose_curved, Curvature, DecomposeConfig, DecomposeError, DecomposeStatus,
    SlitGeometry, Swath,
};
use test_data::{bump_slit, drifting_gaussian, render_straight, sweeping_trace, tilted_gaussian};

const NROWS: usize = 15;
const NCOLS: usize = 60;

fn true_spectrum(ncols: usize) -> DVector<f64> {
    DVector::from_fn(ncols, |x, _| 1000.0 + 300.0 * (x as f64 * 0.2).sin())
}

fn unsmoothed() -> DecomposeConfig {
    DecomposeConfig {
        smoothing_spectrum: 0.0,
        smoothing_slit: 0.0,
        ..Default::default()
    }
}

#[test]
fn test_noiseless_recovery() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let trace = sweeping_trace(7.0, NCOLS);
    let slit = bump_slit(NROWS + 2, 1);
    let spectrum = true_spectrum(NCOLS);
    let image = render_straight(&trace, NROWS, 1, &spectrum, &slit);

    let result = decompose(&Swath::new(image.clone()), &trace, &unsmoothed())
        .expect("decomposition should succeed");

    println!("Diagnostics: {:?}", result.diagnostics);
    assert_eq!(result.diagnostics.status, DecomposeStatus::Converged);
    assert_eq!(result.diagnostics.rejected_pixels, 0);
    assert!(result.mask.iter().all(|&m| m), "noiseless pixels must all be kept");

    for x in 0..NCOLS {
        let rel = (result.spectrum[x] - spectrum[x]).abs() / spectrum[x];
        assert!(rel < 1e-7, "column {x}: {} vs {}", result.spectrum[x], spectrum[x]);
    }
    assert!((&result.slit - &slit).amax() < 1e-7);
    assert!((&result.model - &image).amax() < 1e-7 * image.amax());
    assert!(result.uncertainty.iter().all(|&u| u.is_finite() && u >= 0.0));
}

#[test]
fn test_repeated_calls_are_identical() {
    let trace = vec![6.35; 40];
    let image = tilted_gaussian(&trace, 13, 1.6, 0.0, |x| 500.0 + 5.0 * x);
    let swath = Swath::new(image);
    let config = DecomposeConfig {
        oversampling: 4,
        ..Default::default()
    };

    let first = decompose(&swath, &trace, &config).unwrap();
    let second = decompose(&swath, &trace, &config).unwrap();
    assert_eq!(first.spectrum, second.spectrum);
    assert_eq!(first.slit, second.slit);
    assert_eq!(first.model, second.model);
    assert_eq!(first.mask, second.mask);
    assert_eq!(first.diagnostics, second.diagnostics);
}

#[test]
fn test_cosmic_ray_is_rejected() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let trace = sweeping_trace(7.0, NCOLS);
    let slit = bump_slit(NROWS + 2, 1);
    let spectrum = true_spectrum(NCOLS);
    let mut image = render_straight(&trace, NROWS, 1, &spectrum, &slit);

    // Hit the brightest pixel of one column with 100× its flux.
    let col = 30;
    let row = image.column(col).imax();
    image[(row, col)] *= 100.0;

    let result = decompose(&Swath::new(image), &trace, &unsmoothed()).unwrap();

    assert!(!result.mask[(row, col)], "cosmic ray should be masked");
    assert_eq!(result.diagnostics.rejected_pixels, 1);
    for x in 0..NCOLS {
        let rel = (result.spectrum[x] - spectrum[x]).abs() / spectrum[x];
        assert!(rel < 1e-6, "column {x} shifted by {rel:.3e}");
    }
}

#[test]
fn test_slit_normalization_is_flux_independent() {
    let trace = vec![5.6; 30];
    let base = tilted_gaussian(&trace, 11, 1.3, 0.0, |x| 200.0 + x);
    let osample = 3;
    let config = DecomposeConfig {
        oversampling: osample,
        ..Default::default()
    };

    let reference = decompose(&Swath::new(base.clone()), &trace, &config).unwrap();
    assert_eq!(reference.slit.len(), osample * (11 + 1) + 1);
    assert!((reference.slit.sum() - osample as f64).abs() < 1e-9);

    for scale in [1e-3, 1e3] {
        let result = decompose(&Swath::new(&base * scale), &trace, &config).unwrap();
        assert_eq!(result.slit.len(), reference.slit.len());
        assert!((result.slit.sum() - osample as f64).abs() < 1e-9);
        assert!(
            (&result.slit - &reference.slit).amax() < 1e-6 * reference.slit.amax(),
            "slit function changed with flux scale {scale}"
        );
        for x in 0..30 {
            let expected = reference.spectrum[x] * scale;
            assert!((result.spectrum[x] - expected).abs() < 1e-6 * expected.abs());
        }
    }
}

#[test]
fn test_curved_edges_are_zeroed() {
    let trace = vec![7.4; 50];
    let image = tilted_gaussian(&trace, 15, 1.5, 0.3, |x| 800.0 + 2.0 * x);
    let curvature = Curvature::new(0.3, 0.0);
    let config = DecomposeConfig {
        oversampling: 2,
        ..Default::default()
    };

    let dx = SlitGeometry::curved(&trace, &curvature, 15, 2).unwrap().dx;
    assert!(dx > 0);

    let result = decompose_curved(&Swath::new(image), &trace, &curvature, &config).unwrap();
    assert_ne!(result.diagnostics.status, DecomposeStatus::Degenerate);
    for x in 0..dx {
        assert_eq!(result.spectrum[x], 0.0);
        assert_eq!(result.spectrum[50 - 1 - x], 0.0);
    }
    for x in dx..50 - dx {
        assert!(result.spectrum[x] > 0.0, "column {x} should carry flux");
    }
}

#[test]
fn test_curved_recovers_tilted_order() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let trace: Vec<f64> = (0..80).map(|x| 8.2 + 0.02 * x as f64).collect();
    let sigma: f64 = 1.4;
    let norm = (2.0 * std::f64::consts::PI).sqrt() * sigma;
    let flux = |x: f64| 3000.0 + 400.0 * (x * 0.1).sin();
    let image = tilted_gaussian(&trace, 17, sigma, 0.2, |x| flux(x) / norm);
    let curvature = Curvature::new(0.2, 0.0);
    let config = DecomposeConfig {
        oversampling: 4,
        ..Default::default()
    };

    let result = decompose_curved(&Swath::new(image.clone()), &trace, &curvature, &config).unwrap();
    let dx = SlitGeometry::curved(&trace, &curvature, 17, 4).unwrap().dx;

    println!("Diagnostics: {:?}", result.diagnostics.to_array());
    // Columns within dx of an edge receive light from outside the swath.
    let interior = dx + 2..80 - dx - 2;
    let residual = interior
        .clone()
        .map(|x| (result.model.column(x) - image.column(x)).amax())
        .fold(0.0, f64::max)
        / image.amax();
    assert!(residual < 0.02, "model residual {residual:.3e}");
    for x in interior {
        let expected = flux(x as f64);
        let rel = (result.spectrum[x] - expected).abs() / expected;
        assert!(rel < 0.02, "column {x}: relative error {rel:.3e}");
    }
}

#[test]
fn test_constant_trace_without_smoothing() {
    // Same fractional offset in every column, including an integer trace.
    for centre in [6.0, 6.3] {
        let trace = vec![centre; 40];
        let image = tilted_gaussian(&trace, 13, 1.5, 0.0, |x| 2000.0 + 20.0 * x);
        let result = decompose(&Swath::new(image.clone()), &trace, &unsmoothed()).unwrap();

        assert_eq!(result.diagnostics.status, DecomposeStatus::Converged, "trace {centre}");
        assert!(result.mask.iter().all(|&m| m));
        for x in 0..40 {
            let total = image.column(x).sum();
            let rel = (result.spectrum[x] - total).abs() / total;
            assert!(rel < 1e-9, "trace {centre}, column {x}: relative error {rel:.3e}");
        }
        assert!((&result.model - &image).amax() < 1e-9 * image.amax());
    }
}

#[test]
fn test_constant_trace_oversampled_at_default_smoothing() {
    let trace = vec![6.3; 40];
    let image = tilted_gaussian(&trace, 13, 1.5, 0.0, |x| 2000.0 + 20.0 * x);
    let config = DecomposeConfig {
        oversampling: 4,
        ..Default::default()
    };
    let result = decompose(&Swath::new(image.clone()), &trace, &config).unwrap();

    assert_ne!(result.diagnostics.status, DecomposeStatus::Degenerate);
    for x in 0..40 {
        let total = image.column(x).sum();
        let rel = (result.spectrum[x] - total).abs() / total;
        assert!(rel < 2e-3, "column {x}: relative error {rel:.3e}");
    }
}

#[test]
fn test_drifting_gaussian_at_default_config() {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let flux = |x: f64| 4000.0 + 500.0 * (x * 0.15).sin();
    let (trace, clean) = drifting_gaussian(13, 60, 1.5, 6.2, 0.01, flux);
    let mut hit = clean.clone();
    hit[(6, 30)] *= 100.0;

    // Oversampling 1 is the default; 4 resolves the drift within a pixel.
    for (osample, clean_tol, shift_tol) in [(1, 1e-2, 1.5e-2), (4, 5e-3, 5e-3)] {
        let config = DecomposeConfig {
            oversampling: osample,
            ..Default::default()
        };
        let reference = decompose(&Swath::new(clean.clone()), &trace, &config).unwrap();
        let result = decompose(&Swath::new(hit.clone()), &trace, &config).unwrap();
        println!("osample {osample}: {:?}", result.diagnostics);

        assert_ne!(reference.diagnostics.status, DecomposeStatus::Degenerate);
        assert!(!result.mask[(6, 30)], "osample {osample}: outlier should be masked");
        for x in 0..60 {
            let total = clean.column(x).sum();
            let rel = (reference.spectrum[x] - total).abs() / total;
            assert!(rel < clean_tol, "osample {osample}, column {x}: error {rel:.3e}");

            let shift = (result.spectrum[x] - reference.spectrum[x]).abs() / reference.spectrum[x];
            assert!(shift < shift_tol, "osample {osample}, column {x}: shifted by {shift:.3e}");
        }
    }
}

#[test]
fn test_iteration_cap_is_reported() {
    let trace = sweeping_trace(7.0, NCOLS);
    let image = tilted_gaussian(&trace, NROWS, 1.6, 0.0, |x| 900.0 + 3.0 * x);
    let config = DecomposeConfig {
        max_iterations: 1,
        ..Default::default()
    };

    let result = decompose(&Swath::new(image), &trace, &config).unwrap();
    assert_eq!(result.diagnostics.status, DecomposeStatus::MaxIterations);
    assert_eq!(result.diagnostics.iterations, 1);
    assert_eq!(result.diagnostics.to_array()[3], 1.0);
    assert!(result.diagnostics.model_change.is_infinite());
    assert!(result.spectrum.iter().all(|&v| v > 0.0), "last iterate is still returned");
}

#[test]
fn test_singular_system_is_degenerate() {
    // Pixels cover whole pairs of nodes and nothing ties the pair together.
    let trace = vec![6.0; 20];
    let image = tilted_gaussian(&trace, 13, 1.5, 0.0, |x| 1500.0 + x);
    let config = DecomposeConfig {
        oversampling: 2,
        ..unsmoothed()
    };

    let result = decompose(&Swath::new(image), &trace, &config)
        .expect("a singular system is not an error");
    assert_eq!(result.diagnostics.status, DecomposeStatus::Degenerate);
    assert_eq!(result.diagnostics.iterations, 1);
    assert_eq!(result.diagnostics.rejected_pixels, 0);
    assert!(result.mask.iter().all(|&m| !m), "no pixel entered a final fit");
    assert!(result.spectrum.iter().all(|&v| v == 0.0));
    assert!(result.slit.iter().all(|&v| v == 0.0));
    assert_eq!(result.slit.len(), 2 * 14 + 1);
}

#[test]
fn test_fully_masked_swath_is_degenerate() {
    let mask = DMatrix::from_element(10, 20, false);
    let swath = Swath::with_mask(DMatrix::from_element(10, 20, 1.0), mask).unwrap();
    let trace = vec![4.5; 20];

    let straight = decompose(&swath, &trace, &DecomposeConfig::default())
        .expect("a masked swath is not an error");
    let curved = decompose_curved(
        &swath,
        &trace,
        &Curvature::new(0.1, 0.0),
        &DecomposeConfig::default(),
    )
    .expect("a masked swath is not an error");

    for result in [straight, curved] {
        assert_eq!(result.diagnostics.status, DecomposeStatus::Degenerate);
        assert_eq!(result.diagnostics.to_array()[3], 2.0);
        assert_eq!(result.spectrum.len(), 20);
        assert!(result.spectrum.iter().all(|&v| v == 0.0));
        assert!(result.model.iter().all(|&v| v == 0.0));
        assert_eq!(result.slit.len(), 10 + 2);
        assert!(result.mask.iter().all(|&m| !m));
        assert_eq!(result.diagnostics.iterations, 0);
    }
}

#[test]
fn test_invalid_inputs_are_rejected() {
    let swath = Swath::new(DMatrix::from_element(6, 8, 10.0));
    let trace = vec![3.0; 8];
    let curvature = Curvature::default();
    let no_oversampling = DecomposeConfig {
        oversampling: 0,
        ..Default::default()
    };

    assert_eq!(
        decompose(&swath, &trace, &no_oversampling).unwrap_err(),
        DecomposeError::Oversampling(0)
    );
    assert_eq!(
        decompose_curved(&swath, &trace, &curvature, &no_oversampling).unwrap_err(),
        DecomposeError::Oversampling(0)
    );

    let short = vec![3.0; 7];
    let expected = DecomposeError::TraceLength { ncols: 8, got: 7 };
    let config = DecomposeConfig::default();
    assert_eq!(decompose(&swath, &short, &config).unwrap_err(), expected);
    assert_eq!(
        decompose_curved(&swath, &short, &curvature, &config).unwrap_err(),
        expected
    );

    let bad_tilt = Curvature::new(vec![0.1; 5], 0.0);
    assert!(matches!(
        decompose_curved(&swath, &trace, &bad_tilt, &config),
        Err(DecomposeError::CurvatureLength { name: "tilt", .. })
    ));
}

#[test]
fn test_noisy_recovery() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let trace = sweeping_trace(7.0, NCOLS);
    let slit = bump_slit(NROWS + 2, 1);
    let spectrum = true_spectrum(NCOLS) * 5.0;
    let clean = render_straight(&trace, NROWS, 1, &spectrum, &slit);

    let mut rng = StdRng::seed_from_u64(42);
    let normal = Normal::new(0.0, 1.0)?;
    let noisy = clean.map(|v| v + v.max(1.0).sqrt() * normal.sample(&mut rng));

    let result = decompose(&Swath::new(noisy), &trace, &DecomposeConfig::default())?;
    println!("Diagnostics: {:?}", result.diagnostics);
    assert_ne!(result.diagnostics.status, DecomposeStatus::Degenerate);

    let mut sum_rel = 0.0;
    let mut sum_unc_ratio = 0.0;
    for x in 0..NCOLS {
        let rel = (result.spectrum[x] - spectrum[x]).abs() / spectrum[x];
        assert!(rel < 0.1, "column {x}: relative error {rel:.3e}");
        sum_rel += rel;
        sum_unc_ratio += result.uncertainty[x] / spectrum[x].sqrt();
    }
    let mean_rel = sum_rel / NCOLS as f64;
    let mean_unc_ratio = sum_unc_ratio / NCOLS as f64;
    println!("Mean relative error {mean_rel:.3e}, uncertainty / sqrt(flux) {mean_unc_ratio:.3}");
    assert!(mean_rel < 0.03);
    assert!(
        (0.3..3.0).contains(&mean_unc_ratio),
        "uncertainty should track photon noise"
    );
    Ok(())
}
