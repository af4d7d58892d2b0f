//! Formatted terminal output.
//!
//! Formatting lives in one place so the extraction/assembly code stays free of
//! presentation concerns.

use crate::app::pipeline::{count_anomalies, GateOutput, RunOutput};
use crate::config::ModelConfig;
use crate::domain::NuisanceValue;
use crate::nuisance::{Agreement, AgreementSplit, PeakAgreement};

/// Format the full run summary (input stats + gate + model + anomalies).
pub fn format_run_summary(run: &RunOutput, config: &ModelConfig) -> String {
    let mut out = String::new();
    let stats = &run.extraction.stats;

    out.push_str("=== datacard - Rate & Nuisance Model ===\n");
    out.push_str(&format!(
        "Records: n={} | nominal={} | systematic={} | data={} | skipped={}\n",
        stats.records_read,
        stats.nominal_records,
        stats.systematic_records,
        stats.data_records,
        stats.skipped_records,
    ));
    out.push_str(&format!(
        "Tables: rates={} | ratios={}\n",
        run.extraction.yields.len(),
        run.extraction.ratios.len(),
    ));
    out.push_str(&format!(
        "Categories: admitted={} | rejected={} (signal floor {})\n",
        run.admitted.len(),
        run.admitted.rejected().count(),
        config.signal_floor,
    ));

    let model = &run.model;
    out.push_str(&format!("Signals: {}\n", join_or_none(&model.signals)));
    out.push_str(&format!("Backgrounds: {}\n", join_or_none(&model.backgrounds)));

    let names = model.nuisance_names();
    let symmetric = model
        .nuisances
        .iter()
        .filter(|n| matches!(n.value, NuisanceValue::Symmetric(_)))
        .count();
    out.push_str(&format!(
        "Nuisances: names={} | entries={} (symmetric={}, asymmetric={})\n",
        names.len(),
        model.nuisances.len(),
        symmetric,
        model.nuisances.len() - symmetric,
    ));

    if !model.groups.is_empty() {
        out.push_str("\nGroups:\n");
        for (group, members) in &model.groups {
            out.push_str(&format!("- {group:<14} {}\n", members.len()));
        }
    }

    let counts = count_anomalies(&run.anomalies);
    if !counts.is_empty() {
        out.push_str("\nAnomalies:\n");
        for (kind, count) in counts {
            out.push_str(&format!("- {kind:<24} {count}\n"));
        }
    }

    out
}

/// Admitted and rejected categories with their summed signal rate.
pub fn format_categories(gate: &GateOutput, floor: f64) -> String {
    let mut out = String::new();
    out.push_str(format!("{:<32} {:>12} {:<8}\n", "category", "signal", "status").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<32} {:-<12} {:-<8}\n", "", "", "").trim_end());
    out.push('\n');

    let mut rows: Vec<_> = gate
        .admitted
        .iter()
        .map(|c| (c, gate.admitted.signal_sum(c).unwrap_or(0.0), "admitted"))
        .chain(gate.admitted.rejected().map(|(c, s)| (c, s, "rejected")))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    for (category, sum, status) in rows {
        out.push_str(&format!(
            "{:<32} {:>12.6} {status}\n",
            truncate(&category.to_string(), 32),
            sum
        ));
    }
    out.push_str(&format!(
        "\n{} admitted, {} rejected at floor {floor}\n",
        gate.admitted.len(),
        gate.admitted.rejected().count()
    ));
    out
}

/// Peak vs off-peak up/down agreement per family.
pub fn format_peak_agreement(summaries: &[PeakAgreement]) -> String {
    let mut out = String::new();
    if summaries.is_empty() {
        out.push_str("No peak families configured.\n");
        return out;
    }
    for s in summaries {
        out.push_str(&format!("=== {} ===\n", s.family));
        out.push_str(&format_split("peak", &s.peak));
        out.push_str(&format_split("off-peak", &s.off_peak));
        out.push('\n');
    }
    out
}

fn format_split(label: &str, split: &AgreementSplit) -> String {
    let mut out = String::new();
    out.push_str(&format_agreement(label, "all", &split.total));
    for (tag, counts) in &split.by_lepton {
        out.push_str(&format_agreement(label, tag, counts));
    }
    out
}

fn format_agreement(label: &str, tag: &str, a: &Agreement) -> String {
    let pct = |n: usize| {
        if a.total() == 0 {
            "n/a".to_string()
        } else {
            format!("{:.1}%", 100.0 * n as f64 / a.total() as f64)
        }
    };
    format!(
        "{label:<9} {tag:<4} same={:<5} ({:>6})  opposite={:<5} ({:>6})\n",
        a.same,
        pct(a.same),
        a.opposite,
        pct(a.opposite),
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
