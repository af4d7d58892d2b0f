//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - canonical identifiers (`Category`, `JetBucket`, `BinKey`, `Role`)
//! - the yield and ratio tables produced by extraction
//! - emitted nuisances and the final `RateModel` handed to sinks

pub mod types;

pub use types::*;
