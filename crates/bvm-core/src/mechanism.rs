use serde::{Deserialize, Serialize};

/// Closed set of stress mechanisms the platform reasons about.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Mechanism {
    ErStress,
    Mitochondrial,
    Microtubule,
    Oxidative,
    Proteasome,
    DnaDamage,
}

impl Mechanism {
    pub const ALL: [Mechanism; 6] = [
        Mechanism::ErStress,
        Mechanism::Mitochondrial,
        Mechanism::Microtubule,
        Mechanism::Oxidative,
        Mechanism::Proteasome,
        Mechanism::DnaDamage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Mechanism::ErStress => "ER_STRESS",
            Mechanism::Mitochondrial => "MITOCHONDRIAL",
            Mechanism::Microtubule => "MICROTUBULE",
            Mechanism::Oxidative => "OXIDATIVE",
            Mechanism::Proteasome => "PROTEASOME",
            Mechanism::DnaDamage => "DNA_DAMAGE",
        }
    }

    pub fn from_label(label: &str) -> Option<Mechanism> {
        Mechanism::ALL.into_iter().find(|m| m.label() == label)
    }

    /// Stress axis key used for subpopulation threshold buckets.
    pub fn stress_axis(self) -> &'static str {
        match self {
            Mechanism::ErStress => "er_stress",
            Mechanism::Mitochondrial => "mitochondrial",
            Mechanism::Microtubule => "microtubule",
            Mechanism::Oxidative => "oxidative",
            Mechanism::Proteasome => "proteasome",
            Mechanism::DnaDamage => "dna_damage",
        }
    }

    /// Direction the latent morphology folds move per unit accumulated
    /// hazard, in channel order (actin, mito, er, nucleus, rna).
    ///
    /// These directions are what make mechanisms separable in the 3-channel
    /// feature space the posterior works in.
    pub fn morphology_signature(self) -> [f64; 5] {
        match self {
            Mechanism::ErStress => [0.10, 0.20, 1.20, 0.10, 0.30],
            Mechanism::Mitochondrial => [0.10, -1.00, 0.20, 0.00, 0.10],
            Mechanism::Microtubule => [1.10, 0.10, 0.10, 0.40, 0.10],
            Mechanism::Oxidative => [0.30, 0.80, 0.30, 0.20, 0.20],
            Mechanism::Proteasome => [0.50, 0.40, 0.80, 0.30, 0.50],
            Mechanism::DnaDamage => [0.10, 0.10, 0.10, 1.00, 0.60],
        }
    }
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
