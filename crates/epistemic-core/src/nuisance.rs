use serde::{Deserialize, Serialize};

/// Additive shifts and variance components of everything in an observation
/// that is not biology: batch effects, instrument drift, well artifacts,
/// population heterogeneity.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NuisanceModel {
    pub context_shift: [f64; 3],
    pub pipeline_shift: [f64; 3],
    pub artifact_var: f64,
    pub heterogeneity_var: f64,
    pub context_var: f64,
    pub pipeline_var: f64,
    pub signal_var: f64,
}

impl NuisanceModel {
    pub fn total_shift(&self) -> [f64; 3] {
        [
            self.context_shift[0] + self.pipeline_shift[0],
            self.context_shift[1] + self.pipeline_shift[1],
            self.context_shift[2] + self.pipeline_shift[2],
        ]
    }

    pub fn nuisance_var_total(&self) -> f64 {
        self.artifact_var + self.heterogeneity_var + self.context_var + self.pipeline_var
    }

    /// Share of observation variance attributable to non-biological factors.
    pub fn nuisance_fraction(&self) -> f64 {
        let nuisance = self.nuisance_var_total();
        let denom = nuisance + self.signal_var;
        if denom <= 0.0 {
            0.0
        } else {
            nuisance / denom
        }
    }

    /// Estimate from replicate feature vectors of nominally identical wells.
    /// Replicate scatter becomes artifact variance; the mean displacement
    /// magnitude becomes signal variance.
    pub fn estimate(replicates: &[[f64; 3]], context_bias: [f64; 3]) -> NuisanceModel {
        if replicates.is_empty() {
            return NuisanceModel {
                context_shift: context_bias,
                ..NuisanceModel::default()
            };
        }
        let n = replicates.len() as f64;
        let mut mean = [0.0; 3];
        for r in replicates {
            for (m, v) in mean.iter_mut().zip(r.iter()) {
                *m += v / n;
            }
        }
        let mut scatter = 0.0;
        for r in replicates {
            for (m, v) in mean.iter().zip(r.iter()) {
                scatter += (v - m).powi(2);
            }
        }
        let artifact_var = if replicates.len() > 1 {
            scatter / ((n - 1.0) * 3.0)
        } else {
            0.0
        };
        let signal_var = mean.iter().map(|m| m.powi(2)).sum::<f64>() / 3.0;
        let context_var = context_bias.iter().map(|b| b.powi(2)).sum::<f64>() / 3.0;

        NuisanceModel {
            context_shift: context_bias,
            pipeline_shift: [0.0; 3],
            artifact_var,
            heterogeneity_var: artifact_var * 0.5,
            context_var,
            pipeline_var: 0.25 * artifact_var,
            signal_var,
        }
    }
}
