use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use beam_planner::{
    BeamPlanner, PlanAction, PlanOutcome, PlannerError, RescueTarget, RolloutFn,
    RolloutObservation,
};
use bvm_core::{
    cell_painting, count_cells, feed, scalar_viability, seed_vessel, step, treat, washout,
    AssayEnv, Catalog, CellPaintingReadout, ConditionAggregator, ConditionKey, Mechanism,
    RngFabric, RunContext, StepEnv, StepEvent, VesselState,
};
use design_bridge::{
    default_positions, persist, persist_rejected, to_design_json, validate, Design,
    PlateAssignment, Proposal, Scaffold, ScaffoldRegistry, ValidatorMode, WellSpec,
};
use epistemic_core::{
    compute_posterior, information_gain_bits, stratified_split, synthetic_calibration_set,
    ActionType, BeliefState, ConfidenceCalibrator, EceTracker, EpistemicController,
    MechanismLibrary, MechanismPosterior, NuisanceModel, ResolveOutcome,
};

use crate::artifacts::RunArtifacts;
use crate::config::CampaignConfig;
use crate::error::CampaignError;
use crate::evidence::{BeliefLedger, EvidenceEvent};
use crate::receipts::{regime_label, DecisionReceipt};

const PLATE_ID: &str = "P1";
const WASHOUT_EXCHANGE: f64 = 0.8;

/// Outcome of a finished (or aborted) campaign.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CampaignSummary {
    pub status: String,
    pub reason: String,
    pub last_cycle: u64,
    pub exit_code: i32,
    pub committed_mechanism: Option<Mechanism>,
}

struct PendingClaim {
    claim_id: String,
    had_contrast: bool,
    condition: ConditionKey,
}

/// The closed-loop research campaign: propose, bridge, execute, observe,
/// update belief, decide. One instance owns all run state; catalogs and
/// context are immutable after construction.
pub struct Campaign {
    config: CampaignConfig,
    catalog: Catalog,
    fabric: RngFabric,
    context: RunContext,
    run_id: String,
    artifacts: RunArtifacts,
    scaffold: Scaffold,
    registry: ScaffoldRegistry,
    calibrator: ConfidenceCalibrator,
    library: MechanismLibrary,
    controller: EpistemicController,
    ledger: BeliefLedger,
    aggregator: ConditionAggregator,
    ece: EceTracker,
    true_mechanism: Mechanism,
    vessels: Vec<VesselState>,
    posterior: MechanismPosterior,
    nuisance: NuisanceModel,
    pending: Option<PendingClaim>,
    committed: Option<Mechanism>,
    cycle: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl Campaign {
    pub fn new(
        config: CampaignConfig,
        seed: u64,
        run_id: &str,
        run_root: &Path,
    ) -> Result<Self, CampaignError> {
        config.validate()?;
        let catalog = Catalog::reference_library();
        let fabric = RngFabric::new(seed);
        let class = catalog.vessel_class(&config.vessel_class)?;
        let context = RunContext::generate(&fabric, &config.context, &[(PLATE_ID, class)]);
        let artifacts = RunArtifacts::create(run_root)?;

        let scaffold = Scaffold::reference();
        let registry = ScaffoldRegistry::with_frozen(&scaffold);

        // Train and freeze the calibrator before the first cycle; the frozen
        // blob is part of the run's artifacts.
        let samples =
            synthetic_calibration_set(&fabric, config.calibrator_samples_per_stratum);
        let (train, _held_out) = stratified_split(&samples, &fabric);
        let calibrator = ConfidenceCalibrator::train(&train, &config.calibrator_version)?;
        artifacts.write_calibrator(&calibrator)?;

        let true_mechanism = catalog.compound(&config.compound)?.mechanism;
        let controller = EpistemicController::new(config.controller.clone());

        Ok(Self {
            config,
            catalog,
            fabric,
            context,
            run_id: run_id.to_string(),
            artifacts,
            scaffold,
            registry,
            calibrator,
            library: MechanismLibrary::reference(),
            controller,
            ledger: BeliefLedger::new(),
            aggregator: ConditionAggregator::new(),
            ece: EceTracker::new(),
            true_mechanism,
            vessels: Vec::new(),
            posterior: MechanismPosterior::uniform(),
            nuisance: NuisanceModel::default(),
            pending: None,
            committed: None,
            cycle: 0,
            cancel: None,
        })
    }

    /// Install a cancellation flag checked at cycle boundaries.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    pub fn artifacts(&self) -> &RunArtifacts {
        &self.artifacts
    }

    /// Run the campaign to completion, commit, cancellation, or error.
    /// Always writes the final diagnostics summary line.
    pub fn run(&mut self) -> Result<CampaignSummary, CampaignError> {
        let result = self.run_inner();
        let summary = match &result {
            Ok(summary) => summary.clone(),
            Err(err) => CampaignSummary {
                status: "failed".into(),
                reason: err.to_string(),
                last_cycle: self.cycle,
                exit_code: err.exit_code(),
                committed_mechanism: None,
            },
        };
        let _ = self.artifacts.write_summary(
            &summary.status,
            &summary.reason,
            summary.last_cycle,
            summary.exit_code,
        );
        result
    }

    fn run_inner(&mut self) -> Result<CampaignSummary, CampaignError> {
        for cycle in 0..self.config.cycles {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::SeqCst) {
                    return Ok(CampaignSummary {
                        status: "cancelled".into(),
                        reason: "cancellation requested at cycle boundary".into(),
                        last_cycle: self.cycle,
                        exit_code: 0,
                        committed_mechanism: None,
                    });
                }
            }
            self.cycle = cycle;
            self.run_cycle()?;
            if self.committed.is_some() {
                break;
            }
        }

        let (status, reason) = match self.committed {
            Some(mechanism) => (
                "committed".to_string(),
                format!("mechanism identified: {mechanism}"),
            ),
            None => ("completed".to_string(), "cycle budget exhausted".to_string()),
        };
        Ok(CampaignSummary {
            status,
            reason,
            last_cycle: self.cycle,
            exit_code: 0,
            committed_mechanism: self.committed,
        })
    }

    fn run_cycle(&mut self) -> Result<(), CampaignError> {
        self.controller.begin_cycle(self.cycle);

        // 1-2. Observe and update belief through the evidence ledger.
        let belief = if self.vessels.is_empty() {
            None
        } else {
            Some(self.observe_and_update()?)
        };

        // 3. Resolve the previous cycle's claim against realized gain.
        self.resolve_pending()?;

        // 4-7. Plan, propose through the bridge, execute, and receipt.
        match belief {
            None => self.bootstrap_cycle()?,
            Some(belief) => self.planned_cycle(&belief)?,
        }

        // Provisional penalties age by simulated hours, not by cycle count.
        self.controller.tick(self.config.cycle_hours);
        Ok(())
    }

    // --- observation ------------------------------------------------------

    fn assay_env(&self) -> AssayEnv<'_> {
        AssayEnv {
            context: &self.context,
            fabric: &self.fabric,
            cycle: self.cycle,
            day: self.cycle as u32 + 1,
            operator: "op-a",
            edge_well: false,
        }
    }

    fn observe_and_update(&mut self) -> Result<BeliefState, CampaignError> {
        let env = self.assay_env();
        let class = self.catalog.vessel_class(&self.config.vessel_class)?;

        let mut treated = Vec::new();
        let mut baseline = Vec::new();
        let mut viability_reads = Vec::new();
        let mut events = Vec::new();

        for vessel in &self.vessels {
            let mut well_env = env;
            well_env.edge_well = class.is_edge(&vessel.well_position);
            let readout = cell_painting(vessel, &well_env)?;
            let viability = scalar_viability(vessel, &well_env)?;
            let cells = count_cells(vessel, &well_env)?;
            viability_reads.push(viability);

            let sentinel_entry = self
                .scaffold
                .entries
                .iter()
                .find(|e| e.position == vessel.well_position);
            match sentinel_entry {
                Some(entry) if entry.dose_um == 0.0 => baseline.push(readout.log_features3()),
                // Positive-control sentinels track drift, not the hypothesis.
                Some(_) => {}
                None if !vessel.compounds.is_empty() => {
                    treated.push(readout.log_features3())
                }
                None => {}
            }

            events.push(EvidenceEvent::Assay {
                cycle: self.cycle,
                vessel_id: vessel.vessel_id.clone(),
                timepoint_h: vessel.clock_h,
                readout,
                scalar_viability: viability,
                cell_count: cells,
            });
        }
        for event in events {
            self.artifacts.append_evidence(&event)?;
            self.ledger.apply_event(event)?;
        }

        // Log-ratio against the vehicle sentinels cancels shared batch
        // factors; what remains is biology plus well-level nuisance.
        let baseline_mean = mean3(&baseline);
        let features = if treated.is_empty() {
            [0.0; 3]
        } else {
            let treated_mean = mean3(&treated);
            [
                treated_mean[0] - baseline_mean[0],
                treated_mean[1] - baseline_mean[1],
                treated_mean[2] - baseline_mean[2],
            ]
        };

        let mut nuisance = NuisanceModel::estimate(&baseline, self.context.context_bias);
        // Baseline wells carry no signal; the signal magnitude is the treated
        // displacement itself.
        nuisance.signal_var = features.iter().map(|f| f.powi(2)).sum::<f64>() / 3.0;
        self.nuisance = nuisance;
        let posterior =
            compute_posterior(features, &self.library, &self.nuisance, None)?;

        let mean_viability = if viability_reads.is_empty() {
            1.0
        } else {
            viability_reads.iter().sum::<f64>() / viability_reads.len() as f64
        };
        let timepoint_h = self
            .vessels
            .first()
            .map(|v| v.clock_h)
            .unwrap_or(0.0);
        let ic50 = self.catalog.compound(&self.config.compound)?.ic50_um;
        let belief = BeliefState {
            top_probability: posterior.top_probability,
            margin: posterior.margin,
            entropy_bits: posterior.entropy_bits,
            nuisance_fraction: self.nuisance.nuisance_fraction(),
            timepoint_h,
            dose_relative: self.config.dose_um / ic50,
            viability: mean_viability,
        };

        self.ece
            .record(posterior.top_probability, posterior.top_mechanism == self.true_mechanism);
        self.controller.record_calibration_event(
            self.calibrator.predict_confidence(&belief),
            posterior.top_mechanism == self.true_mechanism,
        );
        if self.ece.is_stable() && self.ece.ece() > 0.15 {
            self.artifacts.append_diagnostic(&serde_json::json!({
                "event": "ece_alert",
                "cycle": self.cycle,
                "ece": self.ece.ece(),
            }))?;
        }

        let update = EvidenceEvent::BeliefUpdate {
            cycle: self.cycle,
            posterior: posterior.clone(),
            belief: belief.clone(),
        };
        self.artifacts.append_evidence(&update)?;
        self.ledger.apply_event(update)?;
        self.posterior = posterior;
        Ok(belief)
    }

    fn resolve_pending(&mut self) -> Result<(), CampaignError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let prior = MechanismPosterior::uniform();
        let realized = information_gain_bits(&prior, &self.posterior)
            - self.resolved_baseline_bits();
        let outcome = ResolveOutcome {
            realized_bits: realized,
            nuisance_fraction: self.nuisance.nuisance_fraction(),
            had_contrast: pending.had_contrast,
            condition: Some(pending.condition),
        };
        let resolution = self.controller.resolve(&pending.claim_id, &outcome)?;
        let event = EvidenceEvent::ClaimResolved {
            cycle: self.cycle,
            resolution,
        };
        self.artifacts.append_evidence(&event)?;
        self.ledger.apply_event(event)?;
        Ok(())
    }

    /// Information already banked before the pending claim's measurement.
    fn resolved_baseline_bits(&self) -> f64 {
        // The uniform prior has log2(6) bits; whatever entropy was already
        // removed before this claim was opened is not this claim's gain.
        let baseline = self.ledger.events().iter().rev().find_map(|e| match e {
            EvidenceEvent::BeliefUpdate { cycle, belief, .. }
                if *cycle < self.cycle =>
            {
                Some((Mechanism::ALL.len() as f64).log2() - belief.entropy_bits)
            }
            _ => None,
        });
        baseline.unwrap_or(0.0)
    }

    // --- acting -----------------------------------------------------------

    fn bootstrap_cycle(&mut self) -> Result<(), CampaignError> {
        let action = PlanAction::Continue {
            dose_fraction: 1.0,
            washout: false,
            feed: false,
        };
        let accepted = self.propose_and_execute(&action, None)?;
        let receipt = DecisionReceipt {
            cycle: self.cycle,
            template: "continue".into(),
            forced: true,
            trigger: "bootstrap".into(),
            regime: "low_nuisance".into(),
            gate_state: "commit_gate_blocked".into(),
            enforcement_layer: (!accepted).then(|| "design_bridge".to_string()),
            attempted_template: (!accepted).then(|| "continue".to_string()),
            calibration_plan: None,
        };
        self.artifacts.append_decision(&receipt)
    }

    fn planned_cycle(&mut self, belief: &BeliefState) -> Result<(), CampaignError> {
        let mut params = self.config.planner.clone();
        // Horizon shrinkage: debt contracts how far the planner looks.
        params.horizon = params.horizon.min(self.controller.planning_horizon());
        let planner = BeamPlanner::new(params);

        let outcome = {
            let rollout = WorldRollout {
                campaign: &*self,
                base_belief: belief.clone(),
            };
            planner.plan(&rollout, self.cycle)?
        };
        for record in &outcome.forensics {
            self.artifacts.append_diagnostic(&serde_json::json!({
                "event": "commit_forensics",
                "record": record,
            }))?;
        }
        self.act_on(&outcome, belief)
    }

    fn act_on(
        &mut self,
        outcome: &PlanOutcome,
        belief: &BeliefState,
    ) -> Result<(), CampaignError> {
        let regime = regime_label(belief.nuisance_fraction).to_string();
        let confidence = self.calibrator.predict_confidence(belief);
        let threshold = self.config.planner.commit_conf_threshold;

        if outcome.committed {
            let mechanism = match outcome.best.schedule.last() {
                Some(PlanAction::Commit { mechanism }) => *mechanism,
                _ => self.posterior.top_mechanism,
            };
            self.committed = Some(mechanism);
            let receipt = DecisionReceipt {
                cycle: self.cycle,
                template: "commit".into(),
                forced: false,
                trigger: "planner".into(),
                regime,
                gate_state: format!("commit_gate_passed conf={confidence:.3} thr={threshold}"),
                enforcement_layer: None,
                attempted_template: None,
                calibration_plan: None,
            };
            return self.artifacts.append_decision(&receipt);
        }

        let action = outcome
            .best
            .schedule
            .first()
            .cloned()
            .unwrap_or(PlanAction::Continue {
                dose_fraction: 0.0,
                washout: false,
                feed: false,
            });
        let (template, calibration_plan) = match &action {
            PlanAction::Continue { .. } => ("continue".to_string(), None),
            PlanAction::Rescue { target } => match target {
                RescueTarget::Timepoint => ("rescue_timepoint".to_string(), None),
                RescueTarget::CalibrationWells => (
                    "rescue_calibration_wells".to_string(),
                    Some("sentinel_reread".to_string()),
                ),
                RescueTarget::DoseContrast => ("rescue_dose_contrast".to_string(), None),
            },
            PlanAction::Commit { .. } => ("commit".to_string(), None),
        };

        let accepted = self.propose_and_execute(&action, Some(belief))?;
        let receipt = DecisionReceipt {
            cycle: self.cycle,
            template: template.clone(),
            forced: false,
            trigger: if accepted {
                "planner".into()
            } else {
                "bridge_refusal".into()
            },
            regime,
            gate_state: format!("commit_gate_blocked conf={confidence:.3} thr={threshold}"),
            enforcement_layer: (!accepted).then(|| "design_bridge".to_string()),
            attempted_template: (!accepted).then_some(template),
            calibration_plan,
        };
        self.artifacts.append_decision(&receipt)
    }

    /// Bridge a proposal derived from the chosen action, then execute it on
    /// the vessels. Returns false when the bridge refused.
    fn propose_and_execute(
        &mut self,
        action: &PlanAction,
        belief: Option<&BeliefState>,
    ) -> Result<bool, CampaignError> {
        let class = self.catalog.vessel_class(&self.config.vessel_class)?;
        let timepoint_h = self.config.cycle_hours * (self.cycle + 1) as f64;

        let dose_for = |index: usize| -> f64 {
            let base = match action {
                PlanAction::Continue { dose_fraction, .. } => {
                    self.config.dose_um * dose_fraction
                }
                PlanAction::Rescue {
                    target: RescueTarget::DoseContrast,
                } => {
                    if index % 2 == 0 {
                        self.config.dose_um
                    } else {
                        self.config.dose_um * 0.25
                    }
                }
                _ => 0.0,
            };
            // Alternating full/half doses keep a dose contrast in view.
            if matches!(action, PlanAction::Continue { dose_fraction, .. } if *dose_fraction > 0.0)
            {
                if index % 2 == 0 {
                    base
                } else {
                    base * 0.5
                }
            } else {
                base
            }
        };

        let proposal = Proposal {
            design_id: format!("d-{}-{:03}", self.run_id, self.cycle),
            hypothesis: format!(
                "{} acts via {} ({})",
                self.config.compound,
                self.posterior.top_mechanism,
                match action {
                    PlanAction::Continue { .. } => "continue exposure",
                    PlanAction::Rescue { .. } => "rescue",
                    PlanAction::Commit { .. } => "commit",
                }
            ),
            wells: (0..self.config.wells_per_cycle)
                .map(|i| WellSpec {
                    cell_line: self.config.cell_line.clone(),
                    compound: self.config.compound.clone(),
                    dose_um: dose_for(i),
                    timepoint_h,
                })
                .collect(),
        };

        let assignment = PlateAssignment {
            plate_id: PLATE_ID.into(),
            vessel_class: self.config.vessel_class.clone(),
            day: self.cycle as u32 + 1,
            operator: "op-a".into(),
        };
        let reserved: Vec<String> = self
            .scaffold
            .entries
            .iter()
            .map(|e| e.position.clone())
            .collect();
        let positions = default_positions(class, proposal.wells.len(), &reserved);
        let design = to_design_json(
            &proposal,
            self.cycle,
            &self.run_id,
            &assignment,
            &positions,
            &self.scaffold,
            None,
        )
        .map_err(design_bridge::BridgeError::Invalid)?;

        match validate(&design, &self.catalog, &self.registry, ValidatorMode::Full) {
            Ok(()) => {
                persist(&design, &self.artifacts.designs_dir(), &self.run_id, self.cycle)?;
                self.execute_design(&design, action, belief)?;
                Ok(true)
            }
            Err(error) => {
                let (raised, _path) = persist_rejected(
                    &design,
                    error,
                    &self.artifacts.rejected_dir(),
                    &self.run_id,
                    self.cycle,
                    None,
                );
                let event = EvidenceEvent::Refusal {
                    cycle: self.cycle,
                    design_id: design.design_id.clone(),
                    violation_code: raised.violation_code.clone(),
                };
                self.artifacts.append_evidence(&event)?;
                self.ledger.apply_event(event)?;
                self.artifacts.append_diagnostic(&serde_json::json!({
                    "event": "refusal",
                    "cycle": self.cycle,
                    "design_id": design.design_id,
                    "violation_code": raised.violation_code,
                    "audit_degraded": raised.audit_degraded,
                }))?;
                if raised.audit_degraded {
                    return Err(CampaignError::AuditDegraded(raised.to_string()));
                }
                Ok(false)
            }
        }
    }

    /// Apply an accepted design to the live vessels and advance time.
    fn execute_design(
        &mut self,
        design: &Design,
        action: &PlanAction,
        belief: Option<&BeliefState>,
    ) -> Result<(), CampaignError> {
        let env = StepEnv {
            catalog: &self.catalog,
            context: &self.context,
            fabric: &self.fabric,
            cycle: self.cycle,
        };

        let mut by_position: BTreeMap<String, usize> = self
            .vessels
            .iter()
            .enumerate()
            .map(|(i, v)| (v.well_position.clone(), i))
            .collect();

        let bootstrap = self.vessels.is_empty();
        for well in &design.wells {
            let index = match by_position.get(&well.well_pos) {
                Some(&index) => index,
                None => {
                    let vessel = seed_vessel(
                        &self.catalog,
                        &well.cell_line,
                        &self.config.vessel_class,
                        &format!("{}-{}", well.plate_id, well.well_pos),
                        &well.plate_id,
                        &well.well_pos,
                        self.config.seed_cells,
                    )?;
                    self.vessels.push(vessel);
                    let index = self.vessels.len() - 1;
                    by_position.insert(well.well_pos.clone(), index);
                    index
                }
            };
            let vessel = &mut self.vessels[index];

            if let PlanAction::Continue { washout: true, .. } = action {
                if !well.is_sentinel {
                    washout(vessel, WASHOUT_EXCHANGE, &env)?;
                }
            }
            if let PlanAction::Continue { feed: true, .. } = action {
                if !well.is_sentinel {
                    feed(vessel, &env)?;
                }
            }
            let dose_now = if well.is_sentinel { bootstrap } else { true };
            if dose_now && well.dose_um > 0.0 && well.compound != "none" && well.compound != "dmso"
            {
                treat(vessel, &well.compound, well.dose_um, &env)?;
                self.aggregator.insert(
                    ConditionKey::new(
                        &well.cell_line,
                        &well.compound,
                        well.dose_um,
                        well.timepoint_h,
                        "cell_painting",
                        "interior",
                    ),
                    well.dose_um * 1000.0,
                    well.timepoint_h,
                );
            }
        }

        let hours = match action {
            PlanAction::Rescue {
                target: RescueTarget::Timepoint,
            } => self.config.cycle_hours * 1.5,
            _ => self.config.cycle_hours,
        };
        let events = step_all(&mut self.vessels, hours, &env, self.config.workers)?;
        for event in &events {
            if let StepEvent::ConservationWarning { .. } = event {
                self.artifacts.append_diagnostic(&serde_json::json!({
                    "event": "conservation_warning",
                    "cycle": self.cycle,
                    "detail": event,
                }))?;
            }
        }

        // Open the claim for this action; it resolves after the next
        // observation.
        let doses: Vec<i64> = design
            .experimental_wells()
            .map(|w| (w.dose_um * 1000.0).round() as i64)
            .collect();
        let had_contrast = doses.windows(2).any(|pair| pair[0] != pair[1]);
        let expected = match belief {
            Some(b) => (b.entropy_bits * 0.3).clamp(0.05, 2.0),
            None => 1.0,
        };
        let claim_id = format!("claim-{}-{:03}", self.run_id, self.cycle);
        let action_type = match action {
            PlanAction::Rescue { .. } => ActionType::Exploration,
            PlanAction::Commit { .. } => ActionType::Commit,
            PlanAction::Continue { .. } => ActionType::Observation,
        };
        self.controller.claim(&claim_id, action_type, expected)?;
        self.pending = Some(PendingClaim {
            claim_id,
            had_contrast,
            condition: ConditionKey::new(
                &self.config.cell_line,
                &self.config.compound,
                self.config.dose_um,
                self.config.cycle_hours * (self.cycle + 1) as f64,
                "cell_painting",
                "interior",
            ),
        });
        Ok(())
    }
}

// --- rollouts ------------------------------------------------------------

/// Rollout oracle over an immutable snapshot of the campaign world. Each
/// rollout clones the vessels and replays the schedule through the real
/// BVM / assay / posterior / calibrator stack.
struct WorldRollout<'a> {
    campaign: &'a Campaign,
    base_belief: BeliefState,
}

impl RolloutFn for WorldRollout<'_> {
    fn rollout(&self, schedule: &[PlanAction]) -> Result<RolloutObservation, PlannerError> {
        self.simulate(schedule)
            .map_err(|e| PlannerError::Rollout(e.to_string()))
    }
}

impl WorldRollout<'_> {
    fn simulate(&self, schedule: &[PlanAction]) -> Result<RolloutObservation, CampaignError> {
        let campaign = self.campaign;
        let mut vessels = campaign.vessels.clone();
        let env = StepEnv {
            catalog: &campaign.catalog,
            context: &campaign.context,
            fabric: &campaign.fabric,
            cycle: campaign.cycle,
        };

        let mut margins = vec![self.base_belief.margin];
        let mut elapsed = 0.0;
        let mut posterior = campaign.posterior.clone();
        let mut belief = self.base_belief.clone();

        for (offset, action) in schedule.iter().enumerate() {
            let mut hours = campaign.config.cycle_hours;
            match action {
                PlanAction::Commit { .. } => continue,
                PlanAction::Continue {
                    dose_fraction,
                    washout: do_washout,
                    feed: do_feed,
                } => {
                    for vessel in vessels.iter_mut() {
                        let sentinel = campaign
                            .scaffold
                            .entries
                            .iter()
                            .any(|e| e.position == vessel.well_position);
                        if sentinel {
                            continue;
                        }
                        if *do_washout {
                            washout(vessel, WASHOUT_EXCHANGE, &env)?;
                        }
                        if *do_feed {
                            feed(vessel, &env)?;
                        }
                        if *dose_fraction > 0.0 {
                            treat(
                                vessel,
                                &campaign.config.compound,
                                campaign.config.dose_um * dose_fraction,
                                &env,
                            )?;
                        }
                    }
                }
                PlanAction::Rescue { target } => match target {
                    RescueTarget::Timepoint => hours *= 1.5,
                    RescueTarget::DoseContrast => {
                        for (i, vessel) in vessels.iter_mut().enumerate() {
                            let sentinel = campaign
                                .scaffold
                                .entries
                                .iter()
                                .any(|e| e.position == vessel.well_position);
                            if !sentinel && i % 2 == 1 {
                                treat(
                                    vessel,
                                    &campaign.config.compound,
                                    campaign.config.dose_um * 0.25,
                                    &env,
                                )?;
                            }
                        }
                    }
                    RescueTarget::CalibrationWells => {}
                },
            }

            step_all(&mut vessels, hours, &env, 1)?;
            elapsed += hours;

            let (new_posterior, new_belief) =
                self.observe_snapshot(&vessels, offset as u64 + 1, elapsed)?;
            margins.push(new_posterior.margin);
            posterior = new_posterior;
            belief = new_belief;
        }

        let margin = posterior.margin;
        let margin_gradient = if margins.len() > 1 {
            (margins[margins.len() - 1] - margins[0]) / (margins.len() - 1) as f64
        } else {
            0.0
        };
        let reversals = margins
            .windows(2)
            .filter(|pair| pair[1] < pair[0])
            .count() as f64;
        let cleanliness = if margins.len() > 1 {
            1.0 - reversals / (margins.len() - 1) as f64
        } else {
            1.0
        };
        let viability = if vessels.is_empty() {
            1.0
        } else {
            vessels.iter().map(|v| v.viability).sum::<f64>() / vessels.len() as f64
        };

        Ok(RolloutObservation {
            calibrated_confidence: campaign.calibrator.predict_confidence(&belief),
            top_mechanism: posterior.top_mechanism,
            nuisance_fraction: belief.nuisance_fraction,
            margin,
            margin_gradient,
            trajectory_cleanliness: cleanliness,
            viability,
            elapsed_h: elapsed,
            belief,
        })
    }

    fn observe_snapshot(
        &self,
        vessels: &[VesselState],
        rollout_step: u64,
        elapsed: f64,
    ) -> Result<(MechanismPosterior, BeliefState), CampaignError> {
        let campaign = self.campaign;
        // Rollout assays live in their own stream namespace via the cycle
        // tag, far above any real cycle index.
        let env = AssayEnv {
            context: &campaign.context,
            fabric: &campaign.fabric,
            cycle: 1_000_000 + campaign.cycle * 1_000 + rollout_step,
            day: campaign.cycle as u32 + 1,
            operator: "op-a",
            edge_well: false,
        };

        let mut treated = Vec::new();
        let mut baseline = Vec::new();
        let mut viability_reads = Vec::new();
        for vessel in vessels {
            let readout: CellPaintingReadout = cell_painting(vessel, &env)?;
            viability_reads.push(scalar_viability(vessel, &env)?);
            let sentinel_entry = campaign
                .scaffold
                .entries
                .iter()
                .find(|e| e.position == vessel.well_position);
            match sentinel_entry {
                Some(entry) if entry.dose_um == 0.0 => baseline.push(readout.log_features3()),
                Some(_) => {}
                None if !vessel.compounds.is_empty() => {
                    treated.push(readout.log_features3())
                }
                None => {}
            }
        }

        let baseline_mean = mean3(&baseline);
        let features = if treated.is_empty() {
            [0.0; 3]
        } else {
            let treated_mean = mean3(&treated);
            [
                treated_mean[0] - baseline_mean[0],
                treated_mean[1] - baseline_mean[1],
                treated_mean[2] - baseline_mean[2],
            ]
        };
        let mut nuisance = NuisanceModel::estimate(&baseline, campaign.context.context_bias);
        nuisance.signal_var = features.iter().map(|f| f.powi(2)).sum::<f64>() / 3.0;
        let posterior = compute_posterior(features, &campaign.library, &nuisance, None)?;
        let mean_viability = if viability_reads.is_empty() {
            1.0
        } else {
            viability_reads.iter().sum::<f64>() / viability_reads.len() as f64
        };
        let ic50 = campaign.catalog.compound(&campaign.config.compound)?.ic50_um;
        let belief = BeliefState {
            top_probability: posterior.top_probability,
            margin: posterior.margin,
            entropy_bits: posterior.entropy_bits,
            nuisance_fraction: nuisance.nuisance_fraction(),
            timepoint_h: self.base_belief.timepoint_h + elapsed,
            dose_relative: campaign.config.dose_um / ic50,
            viability: mean_viability,
        };
        Ok((posterior, belief))
    }
}

// --- helpers -------------------------------------------------------------

fn mean3(rows: &[[f64; 3]]) -> [f64; 3] {
    if rows.is_empty() {
        return [0.0; 3];
    }
    let n = rows.len() as f64;
    let mut out = [0.0; 3];
    for row in rows {
        for (o, v) in out.iter_mut().zip(row.iter()) {
            *o += v / n;
        }
    }
    out
}

/// Step every vessel by `hours`. With more than one worker, vessels are
/// partitioned across scoped threads; each vessel is owned by exactly one
/// worker, and results are interleaving-independent because all streams are
/// name-scoped.
fn step_all(
    vessels: &mut [VesselState],
    hours: f64,
    env: &StepEnv<'_>,
    workers: usize,
) -> Result<Vec<StepEvent>, CampaignError> {
    if workers <= 1 || vessels.len() < 2 {
        let mut events = Vec::new();
        for vessel in vessels.iter_mut() {
            events.extend(step(vessel, hours, env)?.events);
        }
        return Ok(events);
    }

    let chunk_size = vessels.len().div_ceil(workers);
    let results: Vec<Result<Vec<StepEvent>, bvm_core::BvmError>> =
        std::thread::scope(|scope| {
            let handles: Vec<_> = vessels
                .chunks_mut(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        let mut events = Vec::new();
                        for vessel in chunk.iter_mut() {
                            events.extend(step(vessel, hours, env)?.events);
                        }
                        Ok(events)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| {
                    Err(bvm_core::BvmError::InvalidOperation(
                        "worker panicked".into(),
                    ))
                }))
                .collect()
        });

    let mut events = Vec::new();
    for result in results {
        events.extend(result?);
    }
    Ok(events)
}
