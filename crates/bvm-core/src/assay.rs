use rand_distr::{Distribution, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::context::{FieldType, RunContext};
use crate::error::BvmError;
use crate::rng::{RngFabric, StreamName, ROOT_ASSAY};
use crate::vessel::{VesselState, CHANNELS};

/// Edge wells read slightly brighter.
const EDGE_FACTOR: f64 = 1.03;
/// Lognormal sigma of per-well, per-channel read noise.
const WELL_NOISE_SIGMA: f64 = 0.05;
/// Lognormal sigma shared by a plate / day / operator batch.
const BATCH_NOISE_SIGMA: f64 = 0.04;
/// Lognormal sigma of the scalar viability reader.
const SCALAR_NOISE_SIGMA: f64 = 0.02;

/// Who and when is reading the plate. All reads are observer-independent:
/// they draw from `assay` streams only and never mutate the vessel.
#[derive(Clone, Copy)]
pub struct AssayEnv<'a> {
    pub context: &'a RunContext,
    pub fabric: &'a RngFabric,
    pub cycle: u64,
    pub day: u32,
    pub operator: &'a str,
    pub edge_well: bool,
}

/// Five-channel Cell Painting readout, in fold units relative to an
/// unstressed reference population.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellPaintingReadout {
    pub vessel_id: String,
    pub actin_fold: f64,
    pub mito_fold: f64,
    pub er_fold: f64,
    pub nucleus_fold: f64,
    pub rna_fold: f64,
}

impl CellPaintingReadout {
    pub fn folds(&self) -> [f64; 5] {
        [
            self.actin_fold,
            self.mito_fold,
            self.er_fold,
            self.nucleus_fold,
            self.rna_fold,
        ]
    }

    /// Log-folds of the three channels the mechanism posterior uses.
    pub fn log_features3(&self) -> [f64; 3] {
        [
            self.actin_fold.max(1e-6).ln(),
            self.mito_fold.max(1e-6).ln(),
            self.er_fold.max(1e-6).ln(),
        ]
    }
}

/// Read the latent morphology through the full nuisance stack:
/// plate × day × operator × well × edge × illumination field.
pub fn cell_painting(
    vessel: &VesselState,
    env: &AssayEnv,
) -> Result<CellPaintingReadout, BvmError> {
    let plate_factor = batch_factor(env, "plate", &vessel.plate_id)?;
    let day_factor = batch_factor(env, "day", &env.day.to_string())?;
    let operator_factor = batch_factor(env, "operator", env.operator)?;
    let edge = if env.edge_well { EDGE_FACTOR } else { 1.0 };
    let illumination = env.context.field_multiplier(
        &vessel.plate_id,
        FieldType::IlluminationGradient,
        &vessel.well_position,
    ) * env.context.illumination_bias;

    let viability_factor =
        vessel.viability.clamp(0.05, 1.0) * (1.0 + 0.5 * vessel.morphology.debris_level);

    let mut folds = [0.0; 5];
    for (i, channel) in CHANNELS.iter().enumerate() {
        let name = StreamName::root(ROOT_ASSAY)
            .vessel(&vessel.vessel_id)
            .cycle(env.cycle)
            .channel(channel)
            .tag("t_mh", &format!("{}", (vessel.clock_h * 1000.0).round() as i64));
        let mut rng = env.fabric.assay_stream("cell_painting", name.as_str())?;
        let z: f64 = StandardNormal.sample(&mut rng);
        let well_noise = (WELL_NOISE_SIGMA * z).exp();

        folds[i] = vessel.morphology.log_folds[i].exp()
            * plate_factor
            * day_factor
            * operator_factor
            * well_noise
            * edge
            * illumination
            * viability_factor;
    }

    Ok(CellPaintingReadout {
        vessel_id: vessel.vessel_id.clone(),
        actin_fold: folds[0],
        mito_fold: folds[1],
        er_fold: folds[2],
        nucleus_fold: folds[3],
        rna_fold: folds[4],
    })
}

/// Bulk viability read: reader_gain × true viability × noise.
/// The reader can over-report; output clamps to [0, 1.2].
pub fn scalar_viability(vessel: &VesselState, env: &AssayEnv) -> Result<f64, BvmError> {
    let name = StreamName::root(ROOT_ASSAY)
        .vessel(&vessel.vessel_id)
        .cycle(env.cycle)
        .tag("read", "scalar_viability")
        .tag("t_mh", &format!("{}", (vessel.clock_h * 1000.0).round() as i64));
    let mut rng = env.fabric.assay_stream("scalar_viability", name.as_str())?;
    let z: f64 = StandardNormal.sample(&mut rng);
    let value = env.context.reader_gain * vessel.viability * (SCALAR_NOISE_SIGMA * z).exp();
    Ok(value.clamp(0.0, 1.2))
}

/// Count attached cells. Poisson around the expected attached population.
pub fn count_cells(vessel: &VesselState, env: &AssayEnv) -> Result<u64, BvmError> {
    let expected = (vessel.cell_count * vessel.attached_fraction).max(1e-9);
    let name = StreamName::root(ROOT_ASSAY)
        .vessel(&vessel.vessel_id)
        .cycle(env.cycle)
        .tag("read", "count_cells")
        .tag("t_mh", &format!("{}", (vessel.clock_h * 1000.0).round() as i64));
    let mut rng = env.fabric.assay_stream("count_cells", name.as_str())?;
    let poisson = Poisson::new(expected)
        .map_err(|e| BvmError::InvalidAssayParameter(format!("poisson({expected}): {e}")))?;
    Ok(poisson.sample(&mut rng) as u64)
}

fn batch_factor(env: &AssayEnv, kind: &str, id: &str) -> Result<f64, BvmError> {
    let name = StreamName::root(ROOT_ASSAY).tag(kind, id);
    let mut rng = env.fabric.assay_stream("batch_factor", name.as_str())?;
    let z: f64 = StandardNormal.sample(&mut rng);
    Ok((BATCH_NOISE_SIGMA * z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::context::RunContextConfig;
    use crate::vessel::seed_vessel;

    fn setup() -> (Catalog, RngFabric, RunContext) {
        let catalog = Catalog::reference_library();
        let fabric = RngFabric::new(9);
        let class = catalog.vessel_class("plate_96").unwrap();
        let context = RunContext::generate(&fabric, &RunContextConfig::default(), &[("P1", class)]);
        (catalog, fabric, context)
    }

    #[test]
    fn assays_do_not_mutate_vessel() {
        let (catalog, fabric, context) = setup();
        let vessel = seed_vessel(&catalog, "A549", "plate_96", "v", "P1", "C05", 1e3).unwrap();
        let env = AssayEnv {
            context: &context,
            fabric: &fabric,
            cycle: 1,
            day: 1,
            operator: "op-a",
            edge_well: false,
        };
        let before = serde_json::to_string(&vessel).unwrap();
        cell_painting(&vessel, &env).unwrap();
        scalar_viability(&vessel, &env).unwrap();
        count_cells(&vessel, &env).unwrap();
        assert_eq!(serde_json::to_string(&vessel).unwrap(), before);
    }

    #[test]
    fn reads_are_deterministic_per_stream() {
        let (catalog, fabric, context) = setup();
        let vessel = seed_vessel(&catalog, "A549", "plate_96", "v", "P1", "C05", 1e3).unwrap();
        let env = AssayEnv {
            context: &context,
            fabric: &fabric,
            cycle: 1,
            day: 1,
            operator: "op-a",
            edge_well: false,
        };
        let a = cell_painting(&vessel, &env).unwrap();
        let b = cell_painting(&vessel, &env).unwrap();
        assert_eq!(a.folds(), b.folds());
    }

    #[test]
    fn scalar_viability_tracks_truth() {
        let (catalog, fabric, context) = setup();
        let mut vessel = seed_vessel(&catalog, "A549", "plate_96", "v", "P1", "C05", 1e3).unwrap();
        vessel.viability = 0.5;
        let env = AssayEnv {
            context: &context,
            fabric: &fabric,
            cycle: 1,
            day: 1,
            operator: "op-a",
            edge_well: false,
        };
        let read = scalar_viability(&vessel, &env).unwrap();
        assert!((read - 0.5).abs() < 0.15);
    }

    #[test]
    fn count_cells_scales_with_population() {
        let (catalog, fabric, context) = setup();
        let small = seed_vessel(&catalog, "A549", "plate_96", "s", "P1", "C05", 100.0).unwrap();
        let large = seed_vessel(&catalog, "A549", "plate_96", "l", "P1", "C06", 1e4).unwrap();
        let env = AssayEnv {
            context: &context,
            fabric: &fabric,
            cycle: 1,
            day: 1,
            operator: "op-a",
            edge_well: false,
        };
        let n_small = count_cells(&small, &env).unwrap();
        let n_large = count_cells(&large, &env).unwrap();
        assert!(n_large > n_small * 10);
    }
}
