use std::collections::{BTreeMap, BTreeSet};

use bvm_core::{round_half_even, Catalog};

use crate::design::Design;
use crate::error::{InvalidDesignError, ValidatorMode};
use crate::hash::compute_hash;
use crate::scaffold::{Scaffold, ScaffoldEntry, ScaffoldRegistry};

/// Validate a design against structural rules, the frozen scaffold, and
/// (in full mode) the catalog-driven lab constraints.
///
/// Failures are refusals, not crashes: the caller persists the rejection and
/// the run continues.
pub fn validate(
    design: &Design,
    catalog: &Catalog,
    registry: &ScaffoldRegistry,
    mode: ValidatorMode,
) -> Result<(), InvalidDesignError> {
    let hash = compute_hash(design);
    let reject = |code: &str, message: String| {
        Err(InvalidDesignError::new(code, message, mode, hash.clone()))
    };

    // Required fields.
    if design.design_id.trim().is_empty() {
        return reject("missing_design_id", "design_id is empty".into());
    }
    if design.wells.is_empty() {
        return reject("empty_design", "design contains no wells".into());
    }

    // Plate format.
    let class = match catalog.vessel_class(&design.metadata.vessel_class) {
        Ok(class) => class,
        Err(_) => {
            return reject(
                "unknown_vessel_class",
                format!("vessel class '{}'", design.metadata.vessel_class),
            )
        }
    };

    for well in &design.wells {
        if class.parse_well_pos(&well.well_pos).is_none() {
            return reject(
                "invalid_well_position",
                format!("'{}' outside {} format", well.well_pos, class.id),
            );
        }
        if !well.dose_um.is_finite() || well.dose_um < 0.0 {
            return reject(
                "negative_dose",
                format!("dose {} at {}", well.dose_um, well.well_pos),
            );
        }
        if !well.timepoint_h.is_finite() || well.timepoint_h <= 0.0 {
            return reject(
                "nonpositive_timepoint",
                format!("timepoint {} at {}", well.timepoint_h, well.well_pos),
            );
        }
    }

    // Duplicate positions within a plate.
    let mut seen = BTreeSet::new();
    for well in &design.wells {
        if !seen.insert((well.plate_id.clone(), well.well_pos.clone())) {
            return reject(
                "duplicate_well_positions",
                format!("{} assigned twice on {}", well.well_pos, well.plate_id),
            );
        }
    }

    // Scaffold hash against the frozen registry, recomputed from the
    // sentinel wells actually present in the design.
    let meta = &design.metadata.sentinel_schema.scaffold_metadata;
    let expected = match registry.expected_hash(&meta.scaffold_id) {
        Some(expected) => expected,
        None => {
            return reject(
                "unknown_scaffold",
                format!("scaffold '{}' is not frozen", meta.scaffold_id),
            )
        }
    };
    if meta.scaffold_hash != expected {
        return reject(
            "scaffold_hash_mismatch",
            format!(
                "declared hash {} != frozen {}",
                meta.scaffold_hash, expected
            ),
        );
    }
    let derived = Scaffold {
        scaffold_id: meta.scaffold_id.clone(),
        version: meta.scaffold_version,
        entries: design
            .sentinel_wells()
            .map(|w| ScaffoldEntry {
                position: w.well_pos.clone(),
                sentinel_type: w.sentinel_type.clone().unwrap_or_default(),
                compound: w.compound.clone(),
                dose_um: w.dose_um,
            })
            .collect(),
    };
    if derived.hash() != expected {
        return reject(
            "scaffold_hash_mismatch",
            format!(
                "sentinel wells hash to {} but frozen hash is {}",
                derived.hash(),
                expected
            ),
        );
    }

    // Condition multiset must be identical across timepoints per cell line,
    // so timepoints are comparable.
    let mut by_line: BTreeMap<&str, BTreeMap<i64, Vec<(String, i64)>>> = BTreeMap::new();
    for well in design.experimental_wells() {
        by_line
            .entry(well.cell_line.as_str())
            .or_default()
            .entry(round_half_even(well.timepoint_h * 60.0))
            .or_default()
            .push((well.compound.clone(), round_half_even(well.dose_um * 1000.0)));
    }
    for (cell_line, groups) in &by_line {
        let mut reference: Option<Vec<(String, i64)>> = None;
        for conditions in groups.values() {
            let mut sorted = conditions.clone();
            sorted.sort();
            match &reference {
                None => reference = Some(sorted),
                Some(expected) if *expected != sorted => {
                    return reject(
                        "timepoint_condition_mismatch",
                        format!("condition multiset differs across timepoints for {cell_line}"),
                    )
                }
                Some(_) => {}
            }
        }
    }

    if mode == ValidatorMode::Placeholder {
        return Ok(());
    }

    // Full validator: catalog-driven lab constraints.
    for well in &design.wells {
        if catalog.cell_line(&well.cell_line).is_err() {
            return reject(
                "unknown_cell_line",
                format!("'{}' at {}", well.cell_line, well.well_pos),
            );
        }
        // Zero dose means nothing is drawn from the library.
        if well.dose_um > 0.0 {
            let spec = match catalog.compound(&well.compound) {
                Ok(spec) => spec,
                Err(_) => {
                    return reject(
                        "unknown_compound",
                        format!("'{}' at {}", well.compound, well.well_pos),
                    )
                }
            };
            if well.dose_um < spec.min_dose_um || well.dose_um > spec.max_dose_um {
                return reject(
                    "dose_out_of_range",
                    format!(
                        "{} uM of {} outside [{}, {}]",
                        well.dose_um, well.compound, spec.min_dose_um, spec.max_dose_um
                    ),
                );
            }
        }
    }

    // Plate capacity and multi-day consistency.
    let mut per_plate: BTreeMap<&str, Vec<&crate::design::DesignWell>> = BTreeMap::new();
    for well in &design.wells {
        per_plate.entry(well.plate_id.as_str()).or_default().push(well);
    }
    for (plate_id, wells) in &per_plate {
        if wells.len() > class.well_count() {
            return reject(
                "plate_capacity_exceeded",
                format!(
                    "{} wells on {} exceed {} capacity {}",
                    wells.len(),
                    plate_id,
                    class.id,
                    class.well_count()
                ),
            );
        }
        let days: BTreeSet<u32> = wells.iter().map(|w| w.day).collect();
        if days.len() > 1 {
            return reject(
                "multi_day_inconsistency",
                format!("plate {plate_id} spans days {days:?}"),
            );
        }
        let operators: BTreeSet<&str> =
            wells.iter().map(|w| w.operator.as_str()).collect();
        if operators.len() > 1 {
            return reject(
                "operator_inconsistency",
                format!("plate {plate_id} spans operators {operators:?}"),
            );
        }
    }

    Ok(())
}
