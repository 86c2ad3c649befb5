use bvm_core::rng::ROOT_CALIBRATOR_SPLIT;
use bvm_core::RngFabric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EpistemicError;
use crate::posterior::BeliefState;

/// One labelled training event: the belief the agent held, and whether the
/// top mechanism was in fact correct.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub belief: BeliefState,
    pub correct: bool,
}

const FEATURES: usize = 4;
const GD_ITERATIONS: usize = 10_000;
const GD_LEARNING_RATE: f64 = 0.8;
const GD_L2: f64 = 1e-5;

/// Maps belief state to P(correct). Platt-style: logistic regression on the
/// logit of top probability with affine corrections in nuisance fraction,
/// timepoint, and entropy.
///
/// Frozen once trained: there are no mutating methods. Replacing a
/// calibrator requires training a new one under a new version tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceCalibrator {
    version: String,
    /// bias followed by one weight per feature.
    weights: [f64; FEATURES + 1],
    feature_means: [f64; FEATURES],
    feature_stds: [f64; FEATURES],
}

impl ConfidenceCalibrator {
    /// Train on stratified samples. The set is re-balanced into equal
    /// low/medium/high nuisance thirds before fitting, so no regime
    /// dominates the loss.
    pub fn train(
        samples: &[CalibrationSample],
        version: &str,
    ) -> Result<ConfidenceCalibrator, EpistemicError> {
        let balanced = balance_by_nuisance(samples);
        if balanced.is_empty() {
            return Err(EpistemicError::DegenerateTraining);
        }
        let positives = balanced.iter().filter(|s| s.correct).count();
        if positives == 0 || positives == balanced.len() {
            return Err(EpistemicError::DegenerateTraining);
        }

        let raw: Vec<[f64; FEATURES]> =
            balanced.iter().map(|s| features(&s.belief)).collect();
        let labels: Vec<f64> = balanced
            .iter()
            .map(|s| if s.correct { 1.0 } else { 0.0 })
            .collect();

        let n = raw.len() as f64;
        let mut feature_means = [0.0; FEATURES];
        for row in &raw {
            for (m, v) in feature_means.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }
        let mut feature_stds = [0.0; FEATURES];
        for row in &raw {
            for ((s, v), m) in feature_stds
                .iter_mut()
                .zip(row.iter())
                .zip(feature_means.iter())
            {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in feature_stds.iter_mut() {
            *s = s.sqrt().max(1e-6);
        }

        let standardized: Vec<[f64; FEATURES]> = raw
            .iter()
            .map(|row| {
                let mut out = [0.0; FEATURES];
                for i in 0..FEATURES {
                    out[i] = (row[i] - feature_means[i]) / feature_stds[i];
                }
                out
            })
            .collect();

        // Full-batch gradient descent on the convex logistic loss.
        let mut weights = [0.0; FEATURES + 1];
        for _ in 0..GD_ITERATIONS {
            let mut grad = [0.0; FEATURES + 1];
            for (row, y) in standardized.iter().zip(labels.iter()) {
                let mut z = weights[0];
                for i in 0..FEATURES {
                    z += weights[i + 1] * row[i];
                }
                let err = sigmoid(z) - y;
                grad[0] += err / n;
                for i in 0..FEATURES {
                    grad[i + 1] += err * row[i] / n;
                }
            }
            weights[0] -= GD_LEARNING_RATE * grad[0];
            for i in 0..FEATURES {
                weights[i + 1] -=
                    GD_LEARNING_RATE * (grad[i + 1] + GD_L2 * weights[i + 1]);
            }
        }

        Ok(ConfidenceCalibrator {
            version: version.to_string(),
            weights,
            feature_means,
            feature_stds,
        })
    }

    pub fn predict_confidence(&self, belief: &BeliefState) -> f64 {
        let raw = features(belief);
        let mut z = self.weights[0];
        for i in 0..FEATURES {
            let x = (raw[i] - self.feature_means[i]) / self.feature_stds[i];
            z += self.weights[i + 1] * x;
        }
        sigmoid(z).clamp(0.0, 1.0)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Serialized blob for `calibrator.bin`.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ConfidenceCalibrator, EpistemicError> {
        serde_json::from_slice(bytes)
            .map_err(|e| EpistemicError::CalibratorDecode(e.to_string()))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn features(belief: &BeliefState) -> [f64; FEATURES] {
    let top = belief.top_probability.clamp(0.02, 0.98);
    [
        (top / (1.0 - top)).ln(),
        belief.nuisance_fraction,
        belief.timepoint_h / 24.0,
        belief.entropy_bits,
    ]
}

/// Sort by nuisance, cut into terciles, and truncate each tercile to the
/// smallest size so the regimes contribute equally.
fn balance_by_nuisance(samples: &[CalibrationSample]) -> Vec<CalibrationSample> {
    if samples.len() < 3 {
        return samples.to_vec();
    }
    let mut sorted: Vec<CalibrationSample> = samples.to_vec();
    sorted.sort_by(|a, b| {
        a.belief
            .nuisance_fraction
            .total_cmp(&b.belief.nuisance_fraction)
    });
    let third = sorted.len() / 3;
    let terciles = [
        &sorted[..third],
        &sorted[third..2 * third],
        &sorted[2 * third..],
    ];
    let take = terciles.iter().map(|t| t.len()).min().unwrap_or(0);
    let mut balanced = Vec::with_capacity(take * 3);
    for tercile in terciles {
        balanced.extend_from_slice(&tercile[..take]);
    }
    balanced
}

/// Deterministic train/held-out split keyed off the `calibrator_split`
/// fabric stream.
pub fn stratified_split(
    samples: &[CalibrationSample],
    fabric: &RngFabric,
) -> (Vec<CalibrationSample>, Vec<CalibrationSample>) {
    let mut rng = fabric.fabric_stream(ROOT_CALIBRATOR_SPLIT);
    let mut train = Vec::new();
    let mut held_out = Vec::new();
    for sample in samples {
        if rng.gen_bool(0.25) {
            held_out.push(sample.clone());
        } else {
            train.push(sample.clone());
        }
    }
    (train, held_out)
}

/// Synthetic stratified training set spanning low/medium/high nuisance
/// regimes with accuracy falling as nuisance rises. Used to bootstrap the
/// calibrator before any real campaign history exists.
pub fn synthetic_calibration_set(
    fabric: &RngFabric,
    per_stratum: usize,
) -> Vec<CalibrationSample> {
    let mut rng = fabric.fabric_stream("calibrator_split|synthetic");
    let mut samples = Vec::with_capacity(per_stratum * 3);

    for i in 0..per_stratum {
        // Low nuisance: sharp beliefs, almost always right.
        samples.push(CalibrationSample {
            belief: BeliefState {
                top_probability: rng.gen_range(0.88..0.98),
                margin: rng.gen_range(0.5..0.9),
                entropy_bits: rng.gen_range(0.2..0.8),
                nuisance_fraction: rng.gen_range(0.05..0.18),
                timepoint_h: rng.gen_range(8.0..14.0),
                dose_relative: rng.gen_range(0.5..2.0),
                viability: rng.gen_range(0.55..0.9),
            },
            correct: i % 33 != 0,
        });
        // Medium nuisance.
        samples.push(CalibrationSample {
            belief: BeliefState {
                top_probability: rng.gen_range(0.75..0.90),
                margin: rng.gen_range(0.3..0.6),
                entropy_bits: rng.gen_range(0.8..1.5),
                nuisance_fraction: rng.gen_range(0.22..0.38),
                timepoint_h: rng.gen_range(12.0..20.0),
                dose_relative: rng.gen_range(0.5..2.0),
                viability: rng.gen_range(0.4..0.8),
            },
            correct: i % 25 < 18,
        });
        // High nuisance: the posterior still looks confident, but the
        // batch structure means it is often wrong.
        samples.push(CalibrationSample {
            belief: BeliefState {
                top_probability: rng.gen_range(0.70..0.90),
                margin: rng.gen_range(0.2..0.5),
                entropy_bits: rng.gen_range(1.2..2.0),
                nuisance_fraction: rng.gen_range(0.42..0.65),
                timepoint_h: rng.gen_range(14.0..24.0),
                dose_relative: rng.gen_range(0.3..1.5),
                viability: rng.gen_range(0.3..0.7),
            },
            correct: i % 50 < 19,
        });
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_rejects_single_class() {
        let fabric = RngFabric::new(3);
        let mut samples = synthetic_calibration_set(&fabric, 30);
        for s in samples.iter_mut() {
            s.correct = true;
        }
        assert!(matches!(
            ConfidenceCalibrator::train(&samples, "v1"),
            Err(EpistemicError::DegenerateTraining)
        ));
    }

    #[test]
    fn blob_round_trip_preserves_predictions() {
        let fabric = RngFabric::new(3);
        let samples = synthetic_calibration_set(&fabric, 120);
        let calibrator = ConfidenceCalibrator::train(&samples, "v1").unwrap();
        let reloaded = ConfidenceCalibrator::from_bytes(&calibrator.to_bytes()).unwrap();
        assert_eq!(reloaded.version(), "v1");
        for sample in samples.iter().take(20) {
            assert_eq!(
                calibrator.predict_confidence(&sample.belief),
                reloaded.predict_confidence(&sample.belief)
            );
        }
    }

    #[test]
    fn confidence_monotone_in_nuisance() {
        let fabric = RngFabric::new(3);
        let samples = synthetic_calibration_set(&fabric, 200);
        let calibrator = ConfidenceCalibrator::train(&samples, "v1").unwrap();
        let mut belief = BeliefState {
            top_probability: 0.85,
            margin: 0.4,
            entropy_bits: 1.0,
            nuisance_fraction: 0.1,
            timepoint_h: 14.0,
            dose_relative: 1.0,
            viability: 0.6,
        };
        let clean = calibrator.predict_confidence(&belief);
        belief.nuisance_fraction = 0.55;
        let dirty = calibrator.predict_confidence(&belief);
        assert!(clean > dirty);
    }
}
