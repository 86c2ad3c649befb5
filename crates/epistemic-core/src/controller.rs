use std::collections::{BTreeMap, VecDeque};

use bvm_core::ConditionKey;
use serde::{Deserialize, Serialize};

use crate::error::EpistemicInvariantError;

/// What kind of action a claim covers.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionType {
    Observation,
    Exploration,
    Commit,
    Rescue,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimStatus {
    Open,
    Resolved,
    Provisional,
}

/// Receipt for an announced information-gain claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub action_type: ActionType,
    pub expected_gain_bits: f64,
    pub issued_at_cycle: u64,
    pub status: ClaimStatus,
}

/// Everything known at resolution time.
#[derive(Clone, Debug)]
pub struct ResolveOutcome {
    pub realized_bits: f64,
    pub nuisance_fraction: f64,
    /// Whether the measurement carried a dose or timepoint contrast.
    pub had_contrast: bool,
    pub condition: Option<ConditionKey>,
}

/// Result of resolving one claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resolution {
    pub claim_id: String,
    pub claimed_bits: f64,
    pub realized_bits: f64,
    pub credited_bits: f64,
    pub debt_delta: f64,
    pub novelty_factor: f64,
    pub sandbagging_active: bool,
}

/// A penalty booked against an exploratory claim, settling over real
/// simulation hours rather than action count.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionalPenalty {
    pub claim_id: String,
    pub amount_bits: f64,
    pub age_h: f64,
    pub settlement_time_h: f64,
}

/// Tunable policy constants for the controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerParams {
    /// Cost inflation per bit of debt.
    pub alpha: f64,
    pub mult_cap: f64,
    pub settlement_time_h: f64,
    pub volatility_window: usize,
    pub volatility_threshold_bits: f64,
    pub stability_window: usize,
    pub stability_threshold: f64,
    pub sandbag_window: usize,
    pub sandbag_ratio: f64,
    pub sandbag_discount: f64,
    /// Credit factor for ordinary (non-sandbagging) underclaims.
    pub underclaim_credit: f64,
    pub entropy_penalty_weight: f64,
    pub horizon_base: u32,
    pub horizon_min: u32,
    pub horizon_shrink_per_bit: f64,
    pub marginal_novelty_floor: f64,
    pub global_inflation_step: f64,
    pub global_inflation_cap: f64,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            mult_cap: 3.0,
            settlement_time_h: 12.0,
            volatility_window: 8,
            volatility_threshold_bits: 1.0,
            stability_window: 8,
            stability_threshold: 0.08,
            sandbag_window: 6,
            sandbag_ratio: 2.0,
            sandbag_discount: 0.5,
            underclaim_credit: 0.75,
            entropy_penalty_weight: 0.25,
            horizon_base: 8,
            horizon_min: 2,
            horizon_shrink_per_bit: 0.5,
            marginal_novelty_floor: 0.25,
            global_inflation_step: 0.02,
            global_inflation_cap: 2.0,
        }
    }
}

/// Read-only snapshot of controller state, exposed as a copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpistemicStats {
    pub total_debt_bits: f64,
    pub credited_bits: f64,
    pub cost_multiplier: f64,
    pub global_inflation: f64,
    pub planning_horizon: u32,
    pub open_claims: usize,
    pub provisional_penalties: usize,
    pub volatility: f64,
    pub stability_variance: f64,
    pub mean_surprise_ratio: f64,
    pub sandbagging_active: bool,
    pub productive_widenings: u64,
    pub unproductive_widenings: u64,
}

/// Ledger of claims, debt, and the enforcement mechanisms that keep claimed
/// information gain honest. Single writer (the agent loop); readers get
/// copies through `stats()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpistemicController {
    params: ControllerParams,
    claims: BTreeMap<String, ClaimRecord>,
    total_debt_bits: f64,
    credited_bits: f64,
    global_inflation: f64,
    provisional: Vec<ProvisionalPenalty>,
    claim_history: VecDeque<f64>,
    calibration_errors: VecDeque<f64>,
    surprise_ratios: VecDeque<f64>,
    condition_visits: BTreeMap<String, u32>,
    productive_widenings: u64,
    unproductive_widenings: u64,
    cycle: u64,
}

impl Default for EpistemicController {
    fn default() -> Self {
        Self::new(ControllerParams::default())
    }
}

impl EpistemicController {
    pub fn new(params: ControllerParams) -> Self {
        Self {
            params,
            claims: BTreeMap::new(),
            total_debt_bits: 0.0,
            credited_bits: 0.0,
            global_inflation: 1.0,
            provisional: Vec::new(),
            claim_history: VecDeque::new(),
            calibration_errors: VecDeque::new(),
            surprise_ratios: VecDeque::new(),
            condition_visits: BTreeMap::new(),
            productive_widenings: 0,
            unproductive_widenings: 0,
            cycle: 0,
        }
    }

    pub fn begin_cycle(&mut self, cycle: u64) {
        self.cycle = cycle;
    }

    /// Open a claim before acting. Duplicate ids violate the single-receipt
    /// covenant.
    pub fn claim(
        &mut self,
        claim_id: &str,
        action_type: ActionType,
        expected_gain_bits: f64,
    ) -> Result<(), EpistemicInvariantError> {
        if self.claims.contains_key(claim_id) {
            return Err(EpistemicInvariantError::duplicate_claim(claim_id));
        }
        self.claims.insert(
            claim_id.to_string(),
            ClaimRecord {
                claim_id: claim_id.to_string(),
                action_type,
                expected_gain_bits,
                issued_at_cycle: self.cycle,
                status: ClaimStatus::Open,
            },
        );
        self.claim_history.push_back(expected_gain_bits);
        while self.claim_history.len() > self.params.volatility_window + 1 {
            self.claim_history.pop_front();
        }
        Ok(())
    }

    /// Close a claim against its realized gain and run every enforcement
    /// mechanism that applies.
    pub fn resolve(
        &mut self,
        claim_id: &str,
        outcome: &ResolveOutcome,
    ) -> Result<Resolution, EpistemicInvariantError> {
        let record = self
            .claims
            .get_mut(claim_id)
            .ok_or_else(|| EpistemicInvariantError::claim_without_receipt(claim_id))?;
        if record.status == ClaimStatus::Resolved {
            return Err(EpistemicInvariantError::claim_without_receipt(claim_id));
        }
        let claimed = record.expected_gain_bits;
        let action_type = record.action_type;
        let realized = outcome.realized_bits;

        // Sandbagging detector: consistent large underclaiming.
        if claimed > 1e-9 {
            self.surprise_ratios.push_back(realized.max(0.0) / claimed);
            while self.surprise_ratios.len() > self.params.sandbag_window {
                self.surprise_ratios.pop_front();
            }
        }
        let sandbagging_active = self.sandbagging_active();

        // Marginal gain accounting: redundant conditions earn diminishing
        // credit.
        let novelty_factor = match &outcome.condition {
            Some(key) => {
                let visits = self
                    .condition_visits
                    .entry(key.canonical_string())
                    .or_insert(0);
                let factor = 0.5f64
                    .powi(*visits as i32)
                    .max(self.params.marginal_novelty_floor);
                *visits += 1;
                factor
            }
            None => 1.0,
        };

        let mut debt_delta = 0.0;
        let mut credited;

        if realized >= claimed {
            // Underclaim: surplus is discounted, not forgiven.
            let surplus = realized - claimed;
            let discount = if sandbagging_active {
                self.params.sandbag_discount
            } else {
                self.params.underclaim_credit
            };
            credited = claimed + surplus * discount;
        } else {
            // Overclaim: the shortfall becomes debt.
            let shortfall = claimed - realized.max(0.0);
            debt_delta += shortfall.max(0.0);
            credited = realized.max(0.0);

            // Persistent inflation resists debt farming.
            self.global_inflation = (self.global_inflation
                + self.params.global_inflation_step)
                .min(self.params.global_inflation_cap);
        }

        // Entropy accounting for posterior widening.
        if realized < 0.0 {
            if outcome.had_contrast && outcome.nuisance_fraction < 0.3 {
                self.productive_widenings += 1;
            } else {
                self.unproductive_widenings += 1;
            }
            if action_type == ActionType::Exploration {
                // Tagged exploration: book a provisional penalty that
                // settles over real simulation time.
                self.provisional.push(ProvisionalPenalty {
                    claim_id: claim_id.to_string(),
                    amount_bits: -realized * self.params.entropy_penalty_weight,
                    age_h: 0.0,
                    settlement_time_h: self.params.settlement_time_h,
                });
                self.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Provisional;
            } else {
                debt_delta += -realized * self.params.entropy_penalty_weight;
                self.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Resolved;
            }
        } else {
            self.claims.get_mut(claim_id).unwrap().status = ClaimStatus::Resolved;
        }

        credited *= novelty_factor;
        // Positive credited gain redeems outstanding provisional penalties,
        // oldest first.
        let mut redeemable = credited.max(0.0);
        for penalty in self.provisional.iter_mut() {
            if redeemable <= 0.0 {
                break;
            }
            let redeemed = penalty.amount_bits.min(redeemable);
            penalty.amount_bits -= redeemed;
            redeemable -= redeemed;
        }
        self.provisional.retain(|p| p.amount_bits > 1e-12);

        self.total_debt_bits += debt_delta;
        self.credited_bits += credited.max(0.0);

        Ok(Resolution {
            claim_id: claim_id.to_string(),
            claimed_bits: claimed,
            realized_bits: realized,
            credited_bits: credited,
            debt_delta,
            novelty_factor,
            sandbagging_active,
        })
    }

    /// Age provisional penalties by elapsed real simulation hours. Penalties
    /// that reach their settlement time convert to debt. Rapid cheap actions
    /// that advance no simulated time age nothing.
    pub fn tick(&mut self, elapsed_h: f64) {
        if elapsed_h <= 0.0 {
            return;
        }
        let mut settled = 0.0;
        for penalty in self.provisional.iter_mut() {
            penalty.age_h += elapsed_h;
            if penalty.age_h >= penalty.settlement_time_h {
                settled += penalty.amount_bits;
                penalty.amount_bits = 0.0;
            }
        }
        if settled > 0.0 {
            tracing::debug!(settled_bits = settled, "provisional penalties settled into debt");
            self.total_debt_bits += settled;
        }
        self.provisional.retain(|p| p.amount_bits > 1e-12);
    }

    /// Record one calibration outcome (confidence vs. correctness).
    pub fn record_calibration_event(&mut self, confidence: f64, correct: bool) {
        let error = (confidence - if correct { 1.0 } else { 0.0 }).abs();
        self.calibration_errors.push_back(error);
        while self.calibration_errors.len() > self.params.stability_window {
            self.calibration_errors.pop_front();
        }
    }

    /// Cost multiplier applied to planned actions: debt inflation, bounded
    /// by the cap, times the persistent global inflation, plus a volatility
    /// surcharge when claims thrash.
    pub fn cost_multiplier(&self) -> f64 {
        let debt_term = (1.0 + self.params.alpha * self.total_debt_bits)
            .min(self.params.mult_cap);
        let volatility_term = if self.volatility() > self.params.volatility_threshold_bits {
            1.0 + 0.25 * (self.volatility() - self.params.volatility_threshold_bits)
        } else {
            1.0
        };
        debt_term * self.global_inflation * volatility_term
    }

    /// Planning horizon contracts as debt accumulates.
    pub fn planning_horizon(&self) -> u32 {
        let shrink = (self.total_debt_bits * self.params.horizon_shrink_per_bit).floor() as u32;
        self.params
            .horizon_base
            .saturating_sub(shrink)
            .max(self.params.horizon_min)
    }

    /// Mean absolute delta between consecutive claims in the window.
    pub fn volatility(&self) -> f64 {
        if self.claim_history.len() < 2 {
            return 0.0;
        }
        let deltas: Vec<f64> = self
            .claim_history
            .iter()
            .zip(self.claim_history.iter().skip(1))
            .map(|(a, b)| (b - a).abs())
            .collect();
        deltas.iter().sum::<f64>() / deltas.len() as f64
    }

    /// Variance of recent calibration errors.
    pub fn stability_variance(&self) -> f64 {
        let n = self.calibration_errors.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.calibration_errors.iter().sum::<f64>() / n as f64;
        self.calibration_errors
            .iter()
            .map(|e| (e - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64
    }

    pub fn sandbagging_active(&self) -> bool {
        if self.surprise_ratios.len() < self.params.sandbag_window {
            return false;
        }
        let mean =
            self.surprise_ratios.iter().sum::<f64>() / self.surprise_ratios.len() as f64;
        mean > self.params.sandbag_ratio
    }

    pub fn open_claim_count(&self) -> usize {
        self.claims
            .values()
            .filter(|c| c.status == ClaimStatus::Open)
            .count()
    }

    pub fn claim_record(&self, claim_id: &str) -> Option<&ClaimRecord> {
        self.claims.get(claim_id)
    }

    pub fn stats(&self) -> EpistemicStats {
        EpistemicStats {
            total_debt_bits: self.total_debt_bits,
            credited_bits: self.credited_bits,
            cost_multiplier: self.cost_multiplier(),
            global_inflation: self.global_inflation,
            planning_horizon: self.planning_horizon(),
            open_claims: self.open_claim_count(),
            provisional_penalties: self.provisional.len(),
            volatility: self.volatility(),
            stability_variance: self.stability_variance(),
            mean_surprise_ratio: if self.surprise_ratios.is_empty() {
                1.0
            } else {
                self.surprise_ratios.iter().sum::<f64>() / self.surprise_ratios.len() as f64
            },
            sandbagging_active: self.sandbagging_active(),
            productive_widenings: self.productive_widenings,
            unproductive_widenings: self.unproductive_widenings,
        }
    }
}
