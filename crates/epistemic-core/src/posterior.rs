use std::collections::BTreeMap;

use bvm_core::Mechanism;
use serde::{Deserialize, Serialize};

use crate::error::EpistemicError;
use crate::nuisance::NuisanceModel;

/// Learned 3-D Gaussian signature of one mechanism in
/// (log actin, log mito, log ER) feature space.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MechanismSignature {
    pub mean: [f64; 3],
    pub cov: [[f64; 3]; 3],
}

/// Signature library over the closed mechanism set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MechanismLibrary {
    entries: BTreeMap<Mechanism, MechanismSignature>,
}

impl MechanismLibrary {
    /// Signatures derived from the morphology directions, unit-normalized so
    /// that exposure magnitude cancels out of the comparison.
    pub fn reference() -> Self {
        let mut entries = BTreeMap::new();
        for mechanism in Mechanism::ALL {
            let sig = mechanism.morphology_signature();
            let mean = normalize3([sig[0], sig[1], sig[2]]);
            entries.insert(
                mechanism,
                MechanismSignature {
                    mean,
                    cov: diag3(0.04),
                },
            );
        }
        Self { entries }
    }

    pub fn get(&self, mechanism: Mechanism) -> Option<&MechanismSignature> {
        self.entries.get(&mechanism)
    }
}

/// Posterior over mechanisms with its summary statistics.
/// Entropy is in bits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MechanismPosterior {
    pub probabilities: BTreeMap<Mechanism, f64>,
    pub top_mechanism: Mechanism,
    pub top_probability: f64,
    /// top − second probability.
    pub margin: f64,
    pub entropy_bits: f64,
}

impl MechanismPosterior {
    pub fn uniform() -> Self {
        let p = 1.0 / Mechanism::ALL.len() as f64;
        let probabilities = Mechanism::ALL.iter().map(|m| (*m, p)).collect();
        Self {
            probabilities,
            top_mechanism: Mechanism::ALL[0],
            top_probability: p,
            margin: 0.0,
            entropy_bits: (Mechanism::ALL.len() as f64).log2(),
        }
    }

    pub fn probability(&self, mechanism: Mechanism) -> f64 {
        self.probabilities.get(&mechanism).copied().unwrap_or(0.0)
    }
}

/// Realized information gain between two posteriors, in bits.
pub fn information_gain_bits(prior: &MechanismPosterior, posterior: &MechanismPosterior) -> f64 {
    prior.entropy_bits - posterior.entropy_bits
}

/// Summary of belief handed to the calibrator and the planner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeliefState {
    pub top_probability: f64,
    pub margin: f64,
    pub entropy_bits: f64,
    pub nuisance_fraction: f64,
    pub timepoint_h: f64,
    /// Dose relative to the probe compound's IC50.
    pub dose_relative: f64,
    pub viability: f64,
}

/// Evaluate the mechanism posterior for one observed feature vector.
///
/// Likelihood per mechanism is Gaussian with the signature mean displaced by
/// the nuisance shifts and the covariance inflated by the nuisance variance.
/// This layer applies no nuisance penalty to the probabilities themselves;
/// discounting belief under nuisance is the calibrator's job.
pub fn compute_posterior(
    features: [f64; 3],
    library: &MechanismLibrary,
    nuisance: &NuisanceModel,
    priors: Option<&BTreeMap<Mechanism, f64>>,
) -> Result<MechanismPosterior, EpistemicError> {
    let observed = normalize3(features);
    let shift = nuisance.total_shift();
    let inflation = nuisance.nuisance_var_total();

    let mut log_likelihoods = Vec::with_capacity(Mechanism::ALL.len());
    for mechanism in Mechanism::ALL {
        let signature = library
            .get(mechanism)
            .ok_or(EpistemicError::SingularCovariance)?;
        let mut cov = signature.cov;
        for (i, row) in cov.iter_mut().enumerate() {
            row[i] += inflation;
        }
        let mean = [
            signature.mean[0] + shift[0],
            signature.mean[1] + shift[1],
            signature.mean[2] + shift[2],
        ];
        let ll = log_gaussian3(observed, mean, cov)?;
        let prior = priors
            .and_then(|p| p.get(&mechanism).copied())
            .unwrap_or(1.0 / Mechanism::ALL.len() as f64);
        log_likelihoods.push((mechanism, ll + prior.max(1e-300).ln()));
    }

    let max_ll = log_likelihoods
        .iter()
        .map(|(_, ll)| *ll)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_ll.is_finite() {
        return Err(EpistemicError::DegeneratePosterior(
            "all log-likelihoods non-finite".into(),
        ));
    }

    let mut probabilities = BTreeMap::new();
    let mut total = 0.0;
    for (mechanism, ll) in &log_likelihoods {
        let w = (ll - max_ll).exp();
        probabilities.insert(*mechanism, w);
        total += w;
    }
    for p in probabilities.values_mut() {
        *p /= total;
    }

    let mut ranked: Vec<(Mechanism, f64)> =
        probabilities.iter().map(|(m, p)| (*m, *p)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (top_mechanism, top_probability) = ranked[0];
    let second = ranked.get(1).map(|(_, p)| *p).unwrap_or(0.0);

    let entropy_bits = -probabilities
        .values()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.log2())
        .sum::<f64>();

    Ok(MechanismPosterior {
        probabilities,
        top_mechanism,
        top_probability,
        margin: top_probability - second,
        entropy_bits,
    })
}

// --- small dense 3x3 helpers --------------------------------------------

fn normalize3(v: [f64; 3]) -> [f64; 3] {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if norm <= 1e-12 {
        v
    } else {
        [v[0] / norm, v[1] / norm, v[2] / norm]
    }
}

fn diag3(variance: f64) -> [[f64; 3]; 3] {
    let mut m = [[0.0; 3]; 3];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = variance;
    }
    m
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inv3(m: [[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = det3(m);
    if det.abs() < 1e-18 {
        return None;
    }
    let inv_det = 1.0 / det;
    let mut inv = [[0.0; 3]; 3];
    inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
    inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
    inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
    inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
    inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
    inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
    inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
    inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
    inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;
    Some(inv)
}

fn log_gaussian3(
    x: [f64; 3],
    mean: [f64; 3],
    cov: [[f64; 3]; 3],
) -> Result<f64, EpistemicError> {
    let det = det3(cov);
    if det <= 0.0 {
        return Err(EpistemicError::SingularCovariance);
    }
    let inv = inv3(cov).ok_or(EpistemicError::SingularCovariance)?;
    let d = [x[0] - mean[0], x[1] - mean[1], x[2] - mean[2]];
    let mut quad = 0.0;
    for i in 0..3 {
        for j in 0..3 {
            quad += d[i] * inv[i][j] * d[j];
        }
    }
    let norm = (2.0 * std::f64::consts::PI).powi(3) * det;
    Ok(-0.5 * (quad + norm.ln()))
}
