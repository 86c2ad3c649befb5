//! Calibrator contract tests: stratified ECE, conservatism under high
//! nuisance, and the confidence inversion between clean-early and
//! noisy-late beliefs.

use bvm_core::RngFabric;
use epistemic_core::{
    stratified_split, synthetic_calibration_set, BeliefState, ConfidenceCalibrator, EceTracker,
};

fn trained_calibrator() -> ConfidenceCalibrator {
    let fabric = RngFabric::new(7);
    let samples = synthetic_calibration_set(&fabric, 200);
    ConfidenceCalibrator::train(&samples, "v1").unwrap()
}

/// Fresh stratified set with the same deterministic label rates but
/// independently drawn features.
fn evaluation_set() -> Vec<epistemic_core::CalibrationSample> {
    let fabric = RngFabric::new(1234);
    synthetic_calibration_set(&fabric, 200)
}

#[test]
fn stratified_ece_below_ten_percent() {
    let calibrator = trained_calibrator();
    let mut tracker = EceTracker::new();
    for sample in evaluation_set() {
        tracker.record(calibrator.predict_confidence(&sample.belief), sample.correct);
    }
    assert!(tracker.is_stable());
    let ece = tracker.ece();
    assert!(ece < 0.10, "held-out ECE {ece} >= 0.10");
}

#[test]
fn high_nuisance_bin_is_conservative() {
    let calibrator = trained_calibrator();
    let eval = evaluation_set();
    let high: Vec<_> = eval
        .iter()
        .filter(|s| s.belief.nuisance_fraction >= 0.4)
        .collect();
    assert!(high.len() >= 100);
    let mean_conf: f64 = high
        .iter()
        .map(|s| calibrator.predict_confidence(&s.belief))
        .sum::<f64>()
        / high.len() as f64;
    let mean_acc: f64 =
        high.iter().filter(|s| s.correct).count() as f64 / high.len() as f64;
    assert!(
        mean_conf <= mean_acc + 0.05,
        "high-nuisance bin overconfident: conf {mean_conf} vs acc {mean_acc}"
    );
}

#[test]
fn low_nuisance_bin_is_not_paranoid() {
    let calibrator = trained_calibrator();
    let eval = evaluation_set();
    let low: Vec<_> = eval
        .iter()
        .filter(|s| s.belief.nuisance_fraction < 0.2)
        .collect();
    assert!(low.len() >= 100);
    let mean_conf: f64 = low
        .iter()
        .map(|s| calibrator.predict_confidence(&s.belief))
        .sum::<f64>()
        / low.len() as f64;
    let mean_acc: f64 =
        low.iter().filter(|s| s.correct).count() as f64 / low.len() as f64;
    assert!(
        (mean_conf - mean_acc).abs() < 0.10,
        "low-nuisance bin miscalibrated: conf {mean_conf} vs acc {mean_acc}"
    );
}

#[test]
fn calibration_inversion_between_clean_and_noisy_beliefs() {
    let calibrator = trained_calibrator();

    // A sharp early read in a clean context.
    let belief_a = BeliefState {
        top_probability: 0.95,
        margin: 0.7,
        entropy_bits: 0.4,
        nuisance_fraction: 0.10,
        timepoint_h: 10.0,
        dose_relative: 1.0,
        viability: 0.7,
    };
    // A weaker late read drowning in nuisance.
    let belief_b = BeliefState {
        top_probability: 0.80,
        margin: 0.3,
        entropy_bits: 1.5,
        nuisance_fraction: 0.53,
        timepoint_h: 18.0,
        dose_relative: 1.0,
        viability: 0.5,
    };

    let p_a = calibrator.predict_confidence(&belief_a);
    let p_b = calibrator.predict_confidence(&belief_b);
    assert!(p_a >= 0.88, "clean belief under-trusted: {p_a}");
    assert!(p_b <= 0.60, "noisy belief over-trusted: {p_b}");
}

#[test]
fn split_is_deterministic_for_a_seed() {
    let fabric = RngFabric::new(7);
    let samples = synthetic_calibration_set(&fabric, 50);
    let (train_a, held_a) = stratified_split(&samples, &fabric);
    let (train_b, held_b) = stratified_split(&samples, &fabric);
    assert_eq!(train_a.len(), train_b.len());
    assert_eq!(held_a.len(), held_b.len());
    assert!(!held_a.is_empty());
    assert!(train_a.len() > held_a.len());
}

#[test]
fn versioning_survives_the_frozen_blob() {
    let calibrator = trained_calibrator();
    assert_eq!(calibrator.version(), "v1");
    let blob = calibrator.to_bytes();
    let reloaded = ConfidenceCalibrator::from_bytes(&blob).unwrap();
    assert_eq!(reloaded.version(), "v1");
    let retrained = {
        let fabric = RngFabric::new(7);
        let samples = synthetic_calibration_set(&fabric, 200);
        ConfidenceCalibrator::train(&samples, "v2").unwrap()
    };
    assert_eq!(retrained.version(), "v2");
}
