//! Combine-style text datacard sink.
//!
//! Layout:
//! - `imax/jmax/kmax` header
//! - `bin` / `observation` block (one column per admitted category)
//! - `bin` / `process` / index / `rate` block (one column per measured process per category)
//! - one `lnN` line per nuisance name, `-` where it does not apply
//! - one `<group> group = ...` line per nuisance group

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::domain::{BinKey, NuisanceValue, RateModel};
use crate::error::AppError;
use crate::io::ModelSink;

const RULE: &str = "----------------------------------------------------------------------------------------------------";

/// Writes a `RateModel` as a text datacard.
pub struct DatacardWriter<W: Write> {
    out: W,
}

impl<W: Write> DatacardWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ModelSink for DatacardWriter<W> {
    fn write_model(&mut self, model: &RateModel) -> Result<(), AppError> {
        let text = render_datacard(model);
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(|e| AppError::new(4, format!("Failed to write datacard: {e}")))
    }
}

/// Write the datacard to `path`.
pub fn write_datacard_file(path: &Path, model: &RateModel) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create datacard '{}': {e}", path.display())))?;
    DatacardWriter::new(BufWriter::new(file)).write_model(model)?;
    info!("wrote datacard to {}", path.display());
    Ok(())
}

/// Process index convention: signals `0, -1, -2, ...`, backgrounds `1, 2, ...`.
fn process_indices(model: &RateModel) -> HashMap<&str, i64> {
    let signals = model
        .signals
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), -(i as i64)));
    let backgrounds = model
        .backgrounds
        .iter()
        .enumerate()
        .map(|(i, p)| (p.as_str(), i as i64 + 1));
    signals.chain(backgrounds).collect()
}

/// `(category, process)` columns in datacard order.
fn columns(model: &RateModel) -> Vec<(BinKey, f64)> {
    let mut cols = Vec::new();
    for category in &model.categories {
        for process in model.signals.iter().chain(&model.backgrounds) {
            let key = BinKey::new(category.clone(), process.clone());
            if let Some(&rate) = model.rates.get(&key) {
                cols.push((key, rate));
            }
        }
    }
    cols
}

/// Render the whole datacard as text.
pub fn render_datacard(model: &RateModel) -> String {
    let names = model.nuisance_names();
    let cols = columns(model);
    let indices = process_indices(model);
    let process_count = model.signals.len() + model.backgrounds.len();

    let mut values: HashMap<(&str, &BinKey), NuisanceValue> = HashMap::new();
    let by_key: HashMap<BinKey, &BinKey> = cols.iter().map(|(k, _)| (k.clone(), k)).collect();
    for n in &model.nuisances {
        let key = BinKey::new(n.category.clone(), n.process.clone());
        if let Some(col) = by_key.get(&key) {
            values.entry((n.name.as_str(), *col)).or_insert(n.value);
        }
    }

    let mut out = String::new();
    out.push_str(&format!("imax {} number of channels\n", model.categories.len()));
    out.push_str(&format!("jmax {} number of backgrounds\n", process_count.saturating_sub(1)));
    out.push_str(&format!("kmax {} number of nuisance parameters\n", names.len()));
    out.push_str(RULE);
    out.push('\n');

    let mut obs_rows = vec![row("bin", ""), row("observation", "")];
    for category in &model.categories {
        obs_rows[0].push(category.to_string());
        obs_rows[1].push(fmt_rate(model.observations.get(category).copied().unwrap_or(0.0)));
    }
    out.push_str(&align(&obs_rows));
    out.push_str(RULE);
    out.push('\n');

    let mut rate_rows = vec![row("bin", ""), row("process", ""), row("process", ""), row("rate", "")];
    for (key, rate) in &cols {
        rate_rows[0].push(key.category.to_string());
        rate_rows[1].push(key.process.clone());
        rate_rows[2].push(indices.get(key.process.as_str()).copied().unwrap_or_default().to_string());
        rate_rows[3].push(fmt_rate(*rate));
    }
    let mut nuisance_rows = Vec::with_capacity(names.len());
    for name in &names {
        let mut r = row(name, "lnN");
        for (key, _) in &cols {
            r.push(
                values
                    .get(&(*name, key))
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        nuisance_rows.push(r);
    }

    // Rate and nuisance blocks share column widths.
    let mut block = rate_rows;
    let split = block.len();
    block.extend(nuisance_rows);
    let aligned = align(&block);
    let mut lines = aligned.lines();
    for line in lines.by_ref().take(split) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(RULE);
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }

    for (group, members) in &model.groups {
        let members: Vec<&str> = members.iter().map(String::as_str).collect();
        out.push_str(&format!("{group} group = {}\n", members.join(" ")));
    }
    out
}

fn row(label: &str, kind: &str) -> Vec<String> {
    vec![label.to_string(), kind.to_string()]
}

fn fmt_rate(v: f64) -> String {
    format!("{v:.6}")
}

/// Left-align a table of cells; each column padded to its widest cell.
fn align(rows: &[Vec<String>]) -> String {
    let ncols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..ncols)
        .map(|c| rows.iter().filter_map(|r| r.get(c)).map(String::len).max().unwrap_or(0))
        .collect();

    let mut out = String::new();
    for r in rows {
        let line: Vec<String> = r
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        out.push_str(line.join(" ").trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use crate::domain::{Category, JetBucket, NuisanceRecord};

    fn model() -> RateModel {
        let c1 = Category::new("3l_ppp_1b", JetBucket::Exact(2));
        let c2 = Category::new("3l_ppp_1b", JetBucket::AtLeast(5));
        let key = |c: &Category, p: &str| BinKey::new(c.clone(), p);
        let nuisance = |c: &Category, p: &str, name: &str, value| NuisanceRecord {
            process: p.to_string(),
            category: c.clone(),
            name: name.to_string(),
            value,
        };
        RateModel {
            categories: vec![c1.clone(), c2.clone()],
            signals: vec!["ttH".to_string(), "ttll".to_string()],
            backgrounds: vec!["fakes".to_string()],
            rates: BTreeMap::from([
                (key(&c1, "ttH"), 1.5),
                (key(&c1, "fakes"), 4.0),
                (key(&c2, "ttH"), 0.5),
                (key(&c2, "ttll"), 0.25),
            ]),
            observations: BTreeMap::from([(c1.clone(), 5.5), (c2.clone(), 0.75)]),
            nuisances: vec![
                nuisance(&c1, "ttH", "Lumi", NuisanceValue::Symmetric(1.025)),
                nuisance(&c1, "fakes", "FR_FF", NuisanceValue::Asymmetric { down: 0.8, up: 1.2 }),
                nuisance(&c2, "ttll", "Lumi", NuisanceValue::Symmetric(1.025)),
            ],
            groups: BTreeMap::from([
                ("all".to_string(), BTreeSet::from(["FR_FF".to_string(), "Lumi".to_string()])),
                ("datadriven".to_string(), BTreeSet::from(["FR_FF".to_string()])),
            ]),
        }
    }

    fn cells(text: &str, prefix: &str) -> Vec<Vec<String>> {
        text.lines()
            .filter(|l| l.starts_with(prefix))
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_counts() {
        let text = render_datacard(&model());
        assert!(text.starts_with("imax 2 number of channels\njmax 2 number of backgrounds\nkmax 2 "));
    }

    #[test]
    fn absent_processes_are_omitted_per_bin() {
        let text = render_datacard(&model());
        let process = cells(&text, "process");
        assert_eq!(process[0][1..], ["ttH", "fakes", "ttH", "ttll"]);
        assert_eq!(process[1][1..], ["0", "1", "0", "-1"]);
        let bins = cells(&text, "bin");
        assert_eq!(bins[0][1..], ["C_3l_ppp_1b_2j", "C_3l_ppp_1b_ge5j"]);
        assert_eq!(bins[1].len(), 5);
    }

    #[test]
    fn nuisance_lines_mark_absent_columns() {
        let text = render_datacard(&model());
        let lumi = &cells(&text, "Lumi")[0];
        assert_eq!(lumi[1..], ["lnN", "1.025", "-", "-", "1.025"]);
        let fr = &cells(&text, "FR_FF")[0];
        assert_eq!(fr[1..], ["lnN", "-", "0.8/1.2", "-", "-"]);
        assert!(text.contains("datadriven group = FR_FF\n"));
        assert!(text.contains("all group = FR_FF Lumi\n"));
    }

    #[test]
    fn writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.txt");
        write_datacard_file(&path, &model()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, render_datacard(&model()));
    }
}
