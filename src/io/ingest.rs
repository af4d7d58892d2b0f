//! Yield source: CSV/JSON ingest of raw binned measurements.
//!
//! The pipeline only ever iterates a `YieldSource`; it never writes to it.
//!
//! CSV layout (long format, one row per sub-bin):
//!
//! ```text
//! label,bin,yield,error
//! 3l_ppp_1b.ttH_16D,1,0.82,0.05
//! 3l_ppp_1b.JESUP.ttH_16D,1,0.86,
//! ```
//!
//! JSON layout: `[{ "label": "...", "yields": [..], "errors": [..] }]` with
//! `errors` optional.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic ordering**: records keep their first-appearance order
//! - **Sparse bins**: a sub-bin with no row stays unmeasured, never zero

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{BinContent, RawRecord};
use crate::error::AppError;

/// Anything that can be iterated as raw measurements.
pub trait YieldSource {
    fn records(&self) -> &[RawRecord];
}

/// In-memory collection of raw measurements.
#[derive(Debug, Clone, Default)]
pub struct MeasurementSet {
    records: Vec<RawRecord>,
}

impl MeasurementSet {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl YieldSource for MeasurementSet {
    fn records(&self) -> &[RawRecord] {
        &self.records
    }
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub label: Option<String>,
    pub message: String,
}

/// Ingest output: the measurements plus what was skipped along the way.
#[derive(Debug, Clone)]
pub struct IngestedYields {
    pub measurements: MeasurementSet,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Load measurements from `path`, choosing the reader by extension.
pub fn load_yields(path: &Path) -> Result<IngestedYields, AppError> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open yields '{}': {e}", path.display())))?;

    let ingested = if is_json {
        read_json_yields(file)?
    } else {
        read_csv_yields(file)?
    };

    if ingested.measurements.is_empty() {
        return Err(AppError::new(
            3,
            format!("No valid measurements in '{}'.", path.display()),
        ));
    }
    if !ingested.row_errors.is_empty() {
        warn!(count = ingested.row_errors.len(), "skipped invalid input rows");
    }
    info!(
        records = ingested.measurements.len(),
        rows = ingested.rows_read,
        "loaded yields from {}",
        path.display()
    );
    Ok(ingested)
}

/// Read the long-format CSV layout.
pub fn read_csv_yields<R: std::io::Read>(reader: R) -> Result<IngestedYields, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    for column in ["label", "bin", "yield"] {
        if !header_map.contains_key(column) {
            return Err(AppError::new(2, format!("Missing required column: `{column}`")));
        }
    }

    let mut records: Vec<RawRecord> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header line, then 1-based lines.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    label: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let (label, bin, content) = match parse_row(&record, &header_map) {
            Ok(row) => row,
            Err(message) => {
                row_errors.push(RowError {
                    line,
                    label: get_optional(&record, &header_map, "label").map(str::to_string),
                    message,
                });
                continue;
            }
        };

        let slot = *index.entry(label.clone()).or_insert_with(|| {
            records.push(RawRecord {
                label: label.clone(),
                bins: BTreeMap::new(),
            });
            records.len() - 1
        });
        match records[slot].bins.entry(bin) {
            Entry::Vacant(e) => {
                e.insert(content);
            }
            Entry::Occupied(_) => row_errors.push(RowError {
                line,
                label: Some(label),
                message: format!("Duplicate `bin` {bin}; first row kept."),
            }),
        }
    }

    Ok(IngestedYields {
        measurements: MeasurementSet::new(records),
        row_errors,
        rows_read,
    })
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    label: String,
    yields: Vec<f64>,
    #[serde(default)]
    errors: Option<Vec<f64>>,
}

/// Read the JSON array layout.
pub fn read_json_yields<R: std::io::Read>(reader: R) -> Result<IngestedYields, AppError> {
    let raw: Vec<JsonRecord> =
        serde_json::from_reader(reader).map_err(|e| AppError::new(2, format!("Invalid yields JSON: {e}")))?;

    let mut records = Vec::with_capacity(raw.len());
    let mut row_errors = Vec::new();
    let rows_read = raw.len();

    for (idx, r) in raw.into_iter().enumerate() {
        if let Some(errors) = &r.errors {
            if errors.len() != r.yields.len() {
                row_errors.push(RowError {
                    line: idx + 1,
                    label: Some(r.label.clone()),
                    message: format!(
                        "`errors` has {} entries but `yields` has {}",
                        errors.len(),
                        r.yields.len()
                    ),
                });
                continue;
            }
        }
        let bins = (1u32..)
            .zip(r.yields.iter().enumerate())
            .map(|(bin, (i, &value))| {
                let content = BinContent {
                    value,
                    error: r.errors.as_ref().map(|e| e[i]),
                };
                (bin, content)
            })
            .collect();
        records.push(RawRecord { label: r.label, bins });
    }

    Ok(IngestedYields {
        measurements: MeasurementSet::new(records),
        row_errors,
        rows_read,
    })
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<(String, u32, BinContent), String> {
    let label = get_required(record, header_map, "label")?.to_string();
    let bin = get_required(record, header_map, "bin")?
        .parse::<u32>()
        .ok()
        .filter(|b| *b >= 1)
        .ok_or_else(|| "Invalid `bin` (must be an integer >= 1).".to_string())?;
    let value = parse_f64(get_required(record, header_map, "yield")?)
        .ok_or_else(|| "Missing/invalid `yield` value.".to_string())?;
    let error = match get_optional(record, header_map, "error") {
        Some(s) => Some(parse_f64(s).ok_or_else(|| "Invalid `error` value.".to_string())?),
        None => None,
    };
    Ok((label, bin, BinContent { value, error }))
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str) -> Option<f64> {
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}
