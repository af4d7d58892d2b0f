//! Error types.
//!
//! - `AppError` aborts a run and carries the process exit code.
//! - `Anomaly` is a per-bin problem that is recovered locally and only reported.

use thiserror::Error;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Configuration/data mismatch the operator must fix (exit code 2).
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(2, format!("Configuration error: {}", message.into()))
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// A contained, non-fatal problem with one raw record or one bin.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Anomaly {
    #[error("no nominal rate for {process} in {category}; ratio for `{systematic}` omitted")]
    MissingNominal {
        category: String,
        process: String,
        systematic: String,
    },

    #[error("degenerate ratio {value} for `{systematic}` ({process}, {category}); floored")]
    DegenerateRatio {
        category: String,
        process: String,
        systematic: String,
        value: f64,
    },

    #[error("override `{family}` not applicable to {process} in {category}")]
    OverrideNotApplicable {
        family: String,
        category: String,
        process: String,
    },

    #[error("unknown process `{label}`; record skipped")]
    UnknownProcess { label: String },

    #[error("malformed record label `{label}`")]
    MalformedLabel { label: String },

    #[error("region `{region}` matches no region family; record `{label}` skipped")]
    UnknownRegion { region: String, label: String },

    #[error("duplicate nominal for {process} in {category} from `{label}`; first value kept")]
    DuplicateNominal {
        category: String,
        process: String,
        label: String,
    },

    #[error("duplicate nuisance `{name}` for {process} in {category}; first value kept")]
    DuplicateNuisance {
        category: String,
        process: String,
        name: String,
    },
}

impl Anomaly {
    /// Short stable tag used when summarizing anomalies by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::MissingNominal { .. } => "missing-nominal",
            Anomaly::DegenerateRatio { .. } => "degenerate-ratio",
            Anomaly::OverrideNotApplicable { .. } => "override-not-applicable",
            Anomaly::UnknownProcess { .. } => "unknown-process",
            Anomaly::MalformedLabel { .. } => "malformed-label",
            Anomaly::UnknownRegion { .. } => "unknown-region",
            Anomaly::DuplicateNominal { .. } => "duplicate-nominal",
            Anomaly::DuplicateNuisance { .. } => "duplicate-nuisance",
        }
    }
}
