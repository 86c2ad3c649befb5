use serde::{Deserialize, Serialize};

use bvm_core::VesselClass;

use crate::error::{InvalidDesignError, ValidatorMode};
use crate::scaffold::Scaffold;

/// One requested experimental condition in a proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WellSpec {
    pub cell_line: String,
    pub compound: String,
    #[serde(rename = "dose_uM")]
    pub dose_um: f64,
    pub timepoint_h: f64,
}

/// An experiment intent produced by the planner, before plate assignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub design_id: String,
    pub hypothesis: String,
    pub wells: Vec<WellSpec>,
}

/// One fully assigned well in a design.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignWell {
    pub cell_line: String,
    pub compound: String,
    #[serde(rename = "dose_uM")]
    pub dose_um: f64,
    pub timepoint_h: f64,
    pub well_pos: String,
    pub plate_id: String,
    pub day: u32,
    pub operator: String,
    pub is_sentinel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel_type: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScaffoldMetadata {
    pub scaffold_id: String,
    pub scaffold_version: u32,
    pub scaffold_hash: String,
    pub scaffold_size: usize,
    pub scaffold_types: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SentinelSchema {
    pub scaffold_metadata: ScaffoldMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignMetadata {
    pub run_id: String,
    pub cycle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    pub vessel_class: String,
    pub sentinel_schema: SentinelSchema,
}

/// Canonical design document: the unit that is validated, hashed, persisted,
/// and executed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Design {
    pub design_id: String,
    pub design_type: String,
    pub description: String,
    pub metadata: DesignMetadata,
    pub wells: Vec<DesignWell>,
}

impl Design {
    pub fn experimental_wells(&self) -> impl Iterator<Item = &DesignWell> {
        self.wells.iter().filter(|w| !w.is_sentinel)
    }

    pub fn sentinel_wells(&self) -> impl Iterator<Item = &DesignWell> {
        self.wells.iter().filter(|w| w.is_sentinel)
    }
}

/// Where a proposal's wells land.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlateAssignment {
    pub plate_id: String,
    pub vessel_class: String,
    pub day: u32,
    pub operator: String,
}

/// Row-major free positions of a plate, skipping the scaffold's sentinel
/// positions.
pub fn default_positions(class: &VesselClass, count: usize, reserved: &[String]) -> Vec<String> {
    let mut positions = Vec::with_capacity(count);
    'outer: for row in 0..class.rows {
        for col in 0..class.cols {
            if positions.len() >= count {
                break 'outer;
            }
            let name = class.well_name(row, col);
            if !reserved.iter().any(|r| r == &name) {
                positions.push(name);
            }
        }
    }
    positions
}

/// Deterministic expansion of a proposal into a canonical design document,
/// including plate/well assignment and scaffold sentinel injection.
pub fn to_design_json(
    proposal: &Proposal,
    cycle: u64,
    run_id: &str,
    assignment: &PlateAssignment,
    positions: &[String],
    scaffold: &Scaffold,
    git_sha: Option<String>,
) -> Result<Design, InvalidDesignError> {
    if positions.len() < proposal.wells.len() {
        return Err(InvalidDesignError::new(
            "insufficient_positions",
            format!(
                "{} wells proposed but only {} positions available",
                proposal.wells.len(),
                positions.len()
            ),
            ValidatorMode::Full,
            String::new(),
        ));
    }

    let mut wells = Vec::with_capacity(proposal.wells.len() + scaffold.entries.len());
    for (spec, position) in proposal.wells.iter().zip(positions.iter()) {
        wells.push(DesignWell {
            cell_line: spec.cell_line.clone(),
            compound: spec.compound.clone(),
            dose_um: spec.dose_um,
            timepoint_h: spec.timepoint_h,
            well_pos: position.clone(),
            plate_id: assignment.plate_id.clone(),
            day: assignment.day,
            operator: assignment.operator.clone(),
            is_sentinel: false,
            sentinel_type: None,
        });
    }

    let sentinel_timepoint = proposal
        .wells
        .iter()
        .map(|w| w.timepoint_h)
        .fold(0.0f64, f64::max)
        .max(24.0);
    let sentinel_cell_line = proposal
        .wells
        .first()
        .map(|w| w.cell_line.clone())
        .unwrap_or_else(|| "A549".to_string());
    for entry in &scaffold.entries {
        wells.push(DesignWell {
            cell_line: sentinel_cell_line.clone(),
            compound: entry.compound.clone(),
            dose_um: entry.dose_um,
            timepoint_h: sentinel_timepoint,
            well_pos: entry.position.clone(),
            plate_id: assignment.plate_id.clone(),
            day: assignment.day,
            operator: assignment.operator.clone(),
            is_sentinel: true,
            sentinel_type: Some(entry.sentinel_type.clone()),
        });
    }

    Ok(Design {
        design_id: proposal.design_id.clone(),
        design_type: "perturbation_screen".into(),
        description: proposal.hypothesis.clone(),
        metadata: DesignMetadata {
            run_id: run_id.to_string(),
            cycle,
            git_sha,
            vessel_class: assignment.vessel_class.clone(),
            sentinel_schema: SentinelSchema {
                scaffold_metadata: ScaffoldMetadata {
                    scaffold_id: scaffold.scaffold_id.clone(),
                    scaffold_version: scaffold.version,
                    scaffold_hash: scaffold.hash(),
                    scaffold_size: scaffold.entries.len(),
                    scaffold_types: scaffold.sentinel_types(),
                },
            },
        },
        wells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bvm_core::Catalog;

    fn assignment() -> PlateAssignment {
        PlateAssignment {
            plate_id: "P1".into(),
            vessel_class: "plate_96".into(),
            day: 1,
            operator: "op-a".into(),
        }
    }

    #[test]
    fn expansion_is_deterministic() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let scaffold = Scaffold::reference();
        let reserved: Vec<String> =
            scaffold.entries.iter().map(|e| e.position.clone()).collect();
        let proposal = Proposal {
            design_id: "d-0001".into(),
            hypothesis: "cccp acts via the mitochondrial axis".into(),
            wells: vec![WellSpec {
                cell_line: "A549".into(),
                compound: "cccp".into(),
                dose_um: 4.0,
                timepoint_h: 24.0,
            }],
        };
        let positions = default_positions(class, proposal.wells.len(), &reserved);
        let a = to_design_json(&proposal, 3, "run-x", &assignment(), &positions, &scaffold, None)
            .unwrap();
        let b = to_design_json(&proposal, 3, "run-x", &assignment(), &positions, &scaffold, None)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        assert_eq!(a.wells.len(), 1 + scaffold.entries.len());
        assert_eq!(a.sentinel_wells().count(), scaffold.entries.len());
    }

    #[test]
    fn positions_skip_reserved_sentinels() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let reserved = vec!["A01".to_string(), "A02".to_string()];
        let positions = default_positions(class, 3, &reserved);
        assert_eq!(positions, vec!["A03", "A04", "A05"]);
    }

    #[test]
    fn too_many_wells_is_rejected() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let scaffold = Scaffold::reference();
        let proposal = Proposal {
            design_id: "d-0002".into(),
            hypothesis: "overfull".into(),
            wells: (0..4)
                .map(|_| WellSpec {
                    cell_line: "A549".into(),
                    compound: "cccp".into(),
                    dose_um: 4.0,
                    timepoint_h: 24.0,
                })
                .collect(),
        };
        let positions = default_positions(class, 2, &[]);
        let err = to_design_json(
            &proposal,
            0,
            "run-x",
            &assignment(),
            &positions,
            &scaffold,
            None,
        )
        .unwrap_err();
        assert_eq!(err.violation_code, "insufficient_positions");
    }
}
