use serde_json::json;
use sha2::{Digest, Sha256};

use crate::design::Design;

/// Hash of the execution-relevant content of a design: the design id plus
/// each well's {cell_line, compound, dose_uM, timepoint_h, well_pos,
/// plate_id, day, operator, is_sentinel}. Metadata such as timestamps,
/// descriptions, git SHAs, and paths is excluded, so provenance edits do not
/// move the hash while any change to what will be executed does.
///
/// Output: first 16 hex chars of SHA-256 over sorted canonical JSON.
pub fn compute_hash(design: &Design) -> String {
    let mut wells: Vec<serde_json::Value> = design
        .wells
        .iter()
        .map(|w| {
            json!({
                "cell_line": w.cell_line,
                "compound": w.compound,
                "dose_uM": w.dose_um,
                "timepoint_h": w.timepoint_h,
                "well_pos": w.well_pos,
                "plate_id": w.plate_id,
                "day": w.day,
                "operator": w.operator,
                "is_sentinel": w.is_sentinel,
            })
        })
        .collect();
    wells.sort_by(|a, b| a.to_string().cmp(&b.to_string()));

    let canonical = json!({
        "design_id": design.design_id,
        "wells": wells,
    })
    .to_string();

    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{
        to_design_json, PlateAssignment, Proposal, WellSpec,
    };
    use crate::scaffold::Scaffold;

    fn sample_design() -> Design {
        let proposal = Proposal {
            design_id: "d-hash".into(),
            hypothesis: "hash stability".into(),
            wells: vec![
                WellSpec {
                    cell_line: "A549".into(),
                    compound: "cccp".into(),
                    dose_um: 4.0,
                    timepoint_h: 24.0,
                },
                WellSpec {
                    cell_line: "A549".into(),
                    compound: "cccp".into(),
                    dose_um: 8.0,
                    timepoint_h: 24.0,
                },
            ],
        };
        let assignment = PlateAssignment {
            plate_id: "P1".into(),
            vessel_class: "plate_96".into(),
            day: 1,
            operator: "op-a".into(),
        };
        let positions = vec!["C03".to_string(), "C04".to_string()];
        to_design_json(
            &proposal,
            0,
            "run-h",
            &assignment,
            &positions,
            &Scaffold::reference(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn metadata_edits_do_not_move_the_hash() {
        let design = sample_design();
        let original = compute_hash(&design);

        let mut commented = design.clone();
        commented.description = "rewritten description".into();
        commented.metadata.git_sha = Some("deadbeef".into());
        commented.metadata.run_id = "renamed-run".into();
        assert_eq!(compute_hash(&commented), original);
    }

    #[test]
    fn execution_edits_move_the_hash() {
        let design = sample_design();
        let original = compute_hash(&design);

        let mut redosed = design.clone();
        redosed.wells[0].dose_um = 4.5;
        assert_ne!(compute_hash(&redosed), original);

        let mut moved = design.clone();
        moved.wells[0].well_pos = "C09".into();
        assert_ne!(compute_hash(&moved), original);

        let mut renamed = design.clone();
        renamed.design_id = "d-other".into();
        assert_ne!(compute_hash(&renamed), original);
    }

    #[test]
    fn well_order_does_not_move_the_hash() {
        let design = sample_design();
        let original = compute_hash(&design);
        let mut shuffled = design.clone();
        shuffled.wells.reverse();
        assert_eq!(compute_hash(&shuffled), original);
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let h = compute_hash(&sample_design());
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
