use crate::catalog::{Catalog, StressBuckets};
use crate::error::BvmError;
use crate::mechanism::Mechanism;
use crate::vessel::{DeathMode, VesselState};

/// Media age in hours after which starvation hazard begins.
pub const STARVATION_ONSET_H: f64 = 48.0;
/// pH below which acidosis hazard begins.
pub const PH_HAZARD_ONSET: f64 = 6.9;
/// Confluence above which contact death begins.
pub const CONFLUENCE_HAZARD_ONSET: f64 = 0.85;

/// One mechanism's proposed hazard rate for a substep.
#[derive(Clone, Debug)]
pub struct HazardProposal {
    pub mode: DeathMode,
    pub mechanism: Option<Mechanism>,
    /// Bucket-weighted aggregate rate, per hour. Non-negative.
    pub lambda_per_h: f64,
    /// Per-bucket rates for compound hazards: (stress axis, rates per bucket).
    pub per_bucket: Option<(String, [f64; 3])>,
}

/// Propose competing-risk hazards for the current vessel state.
///
/// Each mechanism proposes independently; aggregation into survival happens
/// in the step function. Compound hazards are computed per subpopulation
/// bucket and weighted by bucket fraction.
pub fn propose_hazards(
    vessel: &VesselState,
    catalog: &Catalog,
) -> Result<Vec<HazardProposal>, BvmError> {
    let line = catalog.cell_line(&vessel.cell_line)?;
    let mut proposals = Vec::new();

    // Evaporation concentrates whatever is dissolved in the media.
    let concentration_factor = if vessel.media_volume_ul > 0.0 {
        vessel.initial_volume_ul / vessel.media_volume_ul
    } else {
        // Dry well: treat as fully concentrated.
        10.0
    };

    for (compound_id, state) in &vessel.compounds {
        let spec = catalog.compound(compound_id)?;
        let axis = spec.mechanism.stress_axis();
        let buckets = vessel
            .subpopulations
            .get(axis)
            .copied()
            .unwrap_or_else(StressBuckets::mixed);

        let effective_um = state.concentration_um * concentration_factor;
        let mut per_bucket = [0.0; 3];
        let weights = buckets.weights();
        let mut lambda = 0.0;
        for (i, shift) in StressBuckets::SHIFTS.iter().enumerate() {
            per_bucket[i] = hill_rate(
                effective_um,
                spec.ic50_um * shift,
                spec.hill_coefficient,
                spec.max_kill_rate_per_h,
            );
            lambda += weights[i] * per_bucket[i];
        }
        let weight_total = buckets.total();
        if weight_total > 0.0 {
            lambda /= weight_total;
        }

        proposals.push(HazardProposal {
            mode: DeathMode::Compound,
            mechanism: Some(spec.mechanism),
            lambda_per_h: lambda.max(0.0),
            per_bucket: Some((axis.to_string(), per_bucket)),
        });
    }

    let over = ((vessel.confluence - CONFLUENCE_HAZARD_ONSET)
        / (1.0 - CONFLUENCE_HAZARD_ONSET))
        .clamp(0.0, 2.0);
    proposals.push(HazardProposal {
        mode: DeathMode::Confluence,
        mechanism: None,
        lambda_per_h: line.confluence_rate_per_h * over,
        per_bucket: None,
    });

    let starved = ((vessel.media_age_h - STARVATION_ONSET_H) / 24.0).max(0.0);
    proposals.push(HazardProposal {
        mode: DeathMode::Starvation,
        mechanism: None,
        lambda_per_h: line.starvation_rate_per_h * starved,
        per_bucket: None,
    });

    let acidosis = (PH_HAZARD_ONSET - vessel.ph_proxy).max(0.0);
    proposals.push(HazardProposal {
        mode: DeathMode::Ph,
        mechanism: None,
        lambda_per_h: line.ph_rate_per_h * acidosis,
        per_bucket: None,
    });

    Ok(proposals)
}

/// Hill response scaled to a saturating kill rate.
fn hill_rate(conc_um: f64, ic50_um: f64, hill: f64, max_rate: f64) -> f64 {
    if conc_um <= 0.0 || ic50_um <= 0.0 {
        return 0.0;
    }
    let cn = conc_um.powf(hill);
    let kn = ic50_um.powf(hill);
    max_rate * cn / (cn + kn)
}
