//! Terminal reports: run summary, category table, peak agreement.

pub mod format;

pub use format::*;
