use std::collections::BTreeMap;

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::catalog::VesselClass;
use crate::error::BvmError;
use crate::rng::{RngFabric, StreamName, ROOT_PLATE_FIELDS};

/// Recognized plate-level nuisance fields. Closed set: configuration with an
/// unknown field name is rejected at load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldType {
    TemperatureGradient,
    IlluminationGradient,
    EvaporationField,
    PipettingBias,
}

impl FieldType {
    pub const ALL: [FieldType; 4] = [
        FieldType::TemperatureGradient,
        FieldType::IlluminationGradient,
        FieldType::EvaporationField,
        FieldType::PipettingBias,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FieldType::TemperatureGradient => "temperature_gradient",
            FieldType::IlluminationGradient => "illumination_gradient",
            FieldType::EvaporationField => "evaporation_field",
            FieldType::PipettingBias => "pipetting_bias",
        }
    }

    pub fn from_label(label: &str) -> Option<FieldType> {
        FieldType::ALL.into_iter().find(|f| f.label() == label)
    }
}

/// Run-context options. Explicit record, no open-ended dictionaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunContextConfig {
    pub fields: Vec<FieldType>,
    pub base_evaporation_ul_per_h: f64,
    /// Correlation between the reader-gain and illumination-bias latents.
    /// Default 1.0; changing the default requires a version bump.
    pub instrument_rho: f64,
    /// Amplitude of plate-field gradients around 1.0.
    pub field_strength: f64,
}

impl Default for RunContextConfig {
    fn default() -> Self {
        Self {
            fields: FieldType::ALL.to_vec(),
            base_evaporation_ul_per_h: 0.25,
            instrument_rho: 1.0,
            field_strength: 0.03,
        }
    }
}

impl RunContextConfig {
    /// All nuisance fields disabled; used by deterministic physics tests.
    pub fn quiet() -> Self {
        Self {
            fields: Vec::new(),
            base_evaporation_ul_per_h: 0.0,
            instrument_rho: 1.0,
            field_strength: 0.0,
        }
    }

    /// Parse from JSON, rejecting unrecognized keys and field names.
    pub fn from_json(raw: &str) -> Result<Self, BvmError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| BvmError::CatalogLoad(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| BvmError::CatalogLoad("run context config must be an object".into()))?;

        let mut config = RunContextConfig::default();
        for (key, val) in obj {
            match key.as_str() {
                "fields" => {
                    let names = val.as_array().ok_or_else(|| {
                        BvmError::CatalogLoad("fields must be an array".into())
                    })?;
                    let mut fields = Vec::new();
                    for name in names {
                        let label = name.as_str().unwrap_or_default();
                        let field = FieldType::from_label(label)
                            .ok_or_else(|| BvmError::UnknownContextField(label.to_string()))?;
                        fields.push(field);
                    }
                    config.fields = fields;
                }
                "base_evaporation_ul_per_h" => {
                    config.base_evaporation_ul_per_h = val.as_f64().unwrap_or(0.0);
                }
                "instrument_rho" => {
                    config.instrument_rho = val.as_f64().unwrap_or(1.0);
                }
                "field_strength" => {
                    config.field_strength = val.as_f64().unwrap_or(0.0);
                }
                other => return Err(BvmError::UnknownContextField(other.to_string())),
            }
        }
        Ok(config)
    }
}

/// Smooth per-well multiplier grid for one (plate, field) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct WellGrid {
    rows: u8,
    cols: u8,
    values: Vec<f64>,
}

impl WellGrid {
    fn lookup(&self, pos: &str) -> Option<f64> {
        let bytes = pos.as_bytes();
        if bytes.len() != 3 || !bytes[0].is_ascii_uppercase() {
            return None;
        }
        let row = (bytes[0] - b'A') as usize;
        if !bytes[1].is_ascii_digit() || !bytes[2].is_ascii_digit() {
            return None;
        }
        let col_num = ((bytes[1] - b'0') * 10 + (bytes[2] - b'0')) as usize;
        if row >= self.rows as usize || col_num == 0 || col_num > self.cols as usize {
            return None;
        }
        self.values.get(row * self.cols as usize + (col_num - 1)).copied()
    }
}

/// Plate-level correlated nuisance fields plus the global instrument shift.
/// Immutable after generation; reads are thread-safe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunContext {
    pub instrument_rho: f64,
    pub reader_gain: f64,
    pub illumination_bias: f64,
    /// Additive context bias per posterior feature channel.
    pub context_bias: [f64; 3],
    pub base_evaporation_ul_per_h: f64,
    fields: BTreeMap<String, WellGrid>,
}

impl RunContext {
    /// Sample all plate fields and the instrument latent once. Draws only
    /// from the `plate_fields` fabric stream.
    pub fn generate(
        fabric: &RngFabric,
        config: &RunContextConfig,
        plates: &[(&str, &VesselClass)],
    ) -> RunContext {
        let mut fields = BTreeMap::new();
        for (plate_id, class) in plates {
            for field in &config.fields {
                let name = StreamName::root(ROOT_PLATE_FIELDS)
                    .plate(plate_id)
                    .tag("field", field.label());
                let mut rng = fabric.fabric_stream(name.as_str());

                let row_slope: f64 = rng.gen_range(-1.0..1.0);
                let col_slope: f64 = rng.gen_range(-1.0..1.0);
                let strength = config.field_strength;
                let rows = class.rows as usize;
                let cols = class.cols as usize;
                let mut values = Vec::with_capacity(rows * cols);
                for r in 0..rows {
                    for c in 0..cols {
                        let rn = if rows > 1 {
                            r as f64 / (rows - 1) as f64 - 0.5
                        } else {
                            0.0
                        };
                        let cn = if cols > 1 {
                            c as f64 / (cols - 1) as f64 - 0.5
                        } else {
                            0.0
                        };
                        let jitter: f64 = StandardNormal.sample(&mut rng);
                        let value = 1.0
                            + strength * (row_slope * rn + col_slope * cn)
                            + strength * 0.2 * jitter;
                        values.push(value.max(0.0));
                    }
                }
                fields.insert(
                    grid_key(plate_id, *field),
                    WellGrid {
                        rows: class.rows,
                        cols: class.cols,
                        values,
                    },
                );
            }
        }

        let mut instrument = fabric.fabric_stream(
            StreamName::root(ROOT_PLATE_FIELDS)
                .tag("latent", "instrument")
                .as_str(),
        );
        let z: f64 = StandardNormal.sample(&mut instrument);
        let z2: f64 = StandardNormal.sample(&mut instrument);
        let rho = config.instrument_rho.clamp(-1.0, 1.0);
        let reader_gain = 1.0 + 0.05 * z;
        let illumination_bias = 1.0 + 0.05 * (rho * z + (1.0 - rho * rho).sqrt() * z2);

        let mut bias_rng = fabric.fabric_stream(
            StreamName::root(ROOT_PLATE_FIELDS)
                .tag("latent", "context_bias")
                .as_str(),
        );
        let mut context_bias = [0.0; 3];
        for slot in context_bias.iter_mut() {
            let draw: f64 = StandardNormal.sample(&mut bias_rng);
            *slot = 0.02 * draw;
        }

        RunContext {
            instrument_rho: rho,
            reader_gain,
            illumination_bias,
            context_bias,
            base_evaporation_ul_per_h: config.base_evaporation_ul_per_h,
            fields,
        }
    }

    /// Multiplier for a well under one field; 1.0 when the field is disabled
    /// or the plate is unknown.
    pub fn field_multiplier(&self, plate_id: &str, field: FieldType, well_pos: &str) -> f64 {
        self.fields
            .get(&grid_key(plate_id, field))
            .and_then(|grid| grid.lookup(well_pos))
            .unwrap_or(1.0)
    }

    /// Evaporation in µL/h for a well, shaped by the evaporation field.
    pub fn evaporation_rate(&self, plate_id: &str, well_pos: &str) -> f64 {
        self.base_evaporation_ul_per_h
            * self.field_multiplier(plate_id, FieldType::EvaporationField, well_pos)
    }
}

fn grid_key(plate_id: &str, field: FieldType) -> String {
    format!("{}|{}", plate_id, field.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    #[test]
    fn unknown_config_key_rejected() {
        let err = RunContextConfig::from_json(r#"{"thermal_drift": 0.1}"#).unwrap_err();
        assert!(matches!(err, BvmError::UnknownContextField(_)));
    }

    #[test]
    fn unknown_field_name_rejected() {
        let err =
            RunContextConfig::from_json(r#"{"fields": ["humidity_gradient"]}"#).unwrap_err();
        assert!(matches!(err, BvmError::UnknownContextField(_)));
    }

    #[test]
    fn recognized_config_parses() {
        let config = RunContextConfig::from_json(
            r#"{"fields": ["temperature_gradient", "evaporation_field"], "instrument_rho": 0.8}"#,
        )
        .unwrap();
        assert_eq!(config.fields.len(), 2);
        assert_eq!(config.instrument_rho, 0.8);
    }

    #[test]
    fn generation_is_deterministic() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let fabric = RngFabric::new(11);
        let config = RunContextConfig::default();
        let a = RunContext::generate(&fabric, &config, &[("P1", class)]);
        let b = RunContext::generate(&fabric, &config, &[("P1", class)]);
        assert_eq!(a.reader_gain, b.reader_gain);
        assert_eq!(
            a.field_multiplier("P1", FieldType::TemperatureGradient, "C05"),
            b.field_multiplier("P1", FieldType::TemperatureGradient, "C05"),
        );
    }

    #[test]
    fn quiet_config_has_unit_fields() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let fabric = RngFabric::new(11);
        let ctx = RunContext::generate(&fabric, &RunContextConfig::quiet(), &[("P1", class)]);
        assert_eq!(
            ctx.field_multiplier("P1", FieldType::TemperatureGradient, "C05"),
            1.0
        );
        assert_eq!(ctx.evaporation_rate("P1", "C05"), 0.0);
    }

    #[test]
    fn rho_one_locks_gain_to_illumination() {
        let catalog = Catalog::reference_library();
        let class = catalog.vessel_class("plate_96").unwrap();
        let fabric = RngFabric::new(23);
        let ctx = RunContext::generate(&fabric, &RunContextConfig::default(), &[("P1", class)]);
        // With rho = 1.0 both latents are driven by the same z.
        let gain_shift = ctx.reader_gain - 1.0;
        let illum_shift = ctx.illumination_bias - 1.0;
        assert!((gain_shift - illum_shift).abs() < 1e-12);
    }
}
