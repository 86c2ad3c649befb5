use std::path::Path;

use bvm_core::{
    cell_painting, count_cells, scalar_viability, seed_vessel, step, treat, AssayEnv, Catalog,
    RngFabric, RunContext, RunContextConfig, StepEnv,
};
use design_bridge::{load_design, validate, Design, Scaffold, ScaffoldRegistry, ValidatorMode};

use crate::artifacts::RunArtifacts;
use crate::error::CampaignError;
use crate::evidence::EvidenceEvent;

/// Re-execute a persisted design against the same catalogs and seed.
/// Byte-identical artifacts given identical inputs are the contract; replay
/// never invents randomness outside the named streams.
pub fn replay_design(
    design_path: &Path,
    seed: u64,
    out_root: &Path,
) -> Result<(), CampaignError> {
    let design = load_design(design_path)?;
    let catalog = Catalog::reference_library();
    let registry = ScaffoldRegistry::with_frozen(&Scaffold::reference());
    validate(&design, &catalog, &registry, ValidatorMode::Full)
        .map_err(design_bridge::BridgeError::Invalid)?;

    let artifacts = RunArtifacts::create(out_root)?;
    execute_replay(&design, seed, &catalog, &artifacts)?;

    artifacts.write_summary("replayed", "design re-executed", design.metadata.cycle, 0)?;
    Ok(())
}

fn execute_replay(
    design: &Design,
    seed: u64,
    catalog: &Catalog,
    artifacts: &RunArtifacts,
) -> Result<(), CampaignError> {
    let fabric = RngFabric::new(seed);
    let class = catalog.vessel_class(&design.metadata.vessel_class)?;
    let config = RunContextConfig::default();
    let plate_id = design
        .wells
        .first()
        .map(|w| w.plate_id.clone())
        .unwrap_or_else(|| "P1".to_string());
    let context = RunContext::generate(&fabric, &config, &[(plate_id.as_str(), class)]);

    let env = StepEnv {
        catalog,
        context: &context,
        fabric: &fabric,
        cycle: design.metadata.cycle,
    };
    let assay_env = AssayEnv {
        context: &context,
        fabric: &fabric,
        cycle: design.metadata.cycle,
        day: design.wells.first().map(|w| w.day).unwrap_or(1),
        operator: "op-a",
        edge_well: false,
    };

    design_bridge::persist(design, &artifacts.designs_dir(), &design.metadata.run_id, design.metadata.cycle)?;

    for well in &design.wells {
        let mut vessel = seed_vessel(
            catalog,
            &well.cell_line,
            &design.metadata.vessel_class,
            &format!("{}-{}", well.plate_id, well.well_pos),
            &well.plate_id,
            &well.well_pos,
            2.0e3,
        )?;
        if well.dose_um > 0.0 && catalog.has_compound(&well.compound) {
            treat(&mut vessel, &well.compound, well.dose_um, &env)?;
        }
        step(&mut vessel, well.timepoint_h, &env)?;

        let mut well_assay = assay_env;
        well_assay.edge_well = class.is_edge(&well.well_pos);
        let readout = cell_painting(&vessel, &well_assay)?;
        let viability = scalar_viability(&vessel, &well_assay)?;
        let cells = count_cells(&vessel, &well_assay)?;
        artifacts.append_evidence(&EvidenceEvent::Assay {
            cycle: design.metadata.cycle,
            vessel_id: vessel.vessel_id.clone(),
            timepoint_h: vessel.clock_h,
            readout,
            scalar_viability: viability,
            cell_count: cells,
        })?;
    }
    Ok(())
}
