//! Export the assembled model to JSON.
//!
//! The JSON file is the portable form of a run: everything the datacard holds,
//! keyed explicitly, plus a generation timestamp.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::domain::{Category, NuisanceRecord, RateModel};
use crate::error::AppError;
use crate::io::ModelSink;

#[derive(Debug, Serialize)]
struct RateEntry<'a> {
    category: &'a Category,
    process: &'a str,
    rate: f64,
}

#[derive(Debug, Serialize)]
struct ModelFile<'a> {
    tool: &'static str,
    generated_at: DateTime<Utc>,
    categories: &'a [Category],
    signals: &'a [String],
    backgrounds: &'a [String],
    observations: &'a BTreeMap<Category, f64>,
    rates: Vec<RateEntry<'a>>,
    nuisances: &'a [NuisanceRecord],
    groups: &'a BTreeMap<String, BTreeSet<String>>,
}

/// Writes a `RateModel` as pretty JSON.
pub struct JsonModelWriter<W: Write> {
    out: W,
    generated_at: DateTime<Utc>,
}

impl<W: Write> JsonModelWriter<W> {
    pub fn new(out: W) -> Self {
        Self::with_timestamp(out, Utc::now())
    }

    /// Fixed timestamp, for reproducible output.
    pub fn with_timestamp(out: W, generated_at: DateTime<Utc>) -> Self {
        Self { out, generated_at }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ModelSink for JsonModelWriter<W> {
    fn write_model(&mut self, model: &RateModel) -> Result<(), AppError> {
        let file = ModelFile {
            tool: "datacard",
            generated_at: self.generated_at,
            categories: &model.categories,
            signals: &model.signals,
            backgrounds: &model.backgrounds,
            observations: &model.observations,
            rates: model
                .rates
                .iter()
                .map(|(key, rate)| RateEntry {
                    category: &key.category,
                    process: &key.process,
                    rate: *rate,
                })
                .collect(),
            nuisances: &model.nuisances,
            groups: &model.groups,
        };
        serde_json::to_writer_pretty(&mut self.out, &file)
            .map_err(|e| AppError::new(4, format!("Failed to write model JSON: {e}")))?;
        self.out
            .flush()
            .map_err(|e| AppError::new(4, format!("Failed to write model JSON: {e}")))
    }
}

/// Write the model JSON to `path`.
pub fn write_model_json(path: &Path, model: &RateModel) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create model JSON '{}': {e}", path.display())))?;
    JsonModelWriter::new(BufWriter::new(file)).write_model(model)?;
    info!("wrote model JSON to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::domain::{BinKey, JetBucket, NuisanceValue};

    #[test]
    fn model_json_shape() {
        let c = Category::new("4l_2b", JetBucket::AtLeast(4));
        let model = RateModel {
            categories: vec![c.clone()],
            signals: vec!["ttH".to_string()],
            backgrounds: vec![],
            rates: BTreeMap::from([(BinKey::new(c.clone(), "ttH"), 0.5)]),
            observations: BTreeMap::from([(c.clone(), 0.5)]),
            nuisances: vec![NuisanceRecord {
                process: "ttH".to_string(),
                category: c.clone(),
                name: "JES".to_string(),
                value: NuisanceValue::Asymmetric { down: 0.95, up: 1.05 },
            }],
            groups: BTreeMap::from([("all".to_string(), BTreeSet::from(["JES".to_string()]))]),
        };

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut writer = JsonModelWriter::with_timestamp(Vec::new(), ts);
        writer.write_model(&model).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&writer.into_inner()).unwrap();

        assert_eq!(json["tool"], "datacard");
        assert_eq!(json["generated_at"], "2024-03-01T12:00:00Z");
        assert_eq!(json["categories"][0], "C_4l_2b_ge4j");
        assert_eq!(json["observations"]["C_4l_2b_ge4j"], 0.5);
        assert_eq!(json["rates"][0]["process"], "ttH");
        assert_eq!(json["nuisances"][0]["value"]["down"], 0.95);
        assert_eq!(json["groups"]["all"][0], "JES");
    }

    #[test]
    fn writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        write_model_json(&path, &RateModel::default()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["nuisances"].as_array().unwrap().is_empty());
    }
}
