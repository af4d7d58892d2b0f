//! Input/output helpers.
//!
//! - yield ingest (CSV/JSON) + validation (`ingest`)
//! - text datacard sink (`datacard`)
//! - JSON model export (`export`)

use crate::domain::RateModel;
use crate::error::AppError;

pub mod datacard;
pub mod export;
pub mod ingest;

pub use datacard::*;
pub use export::*;
pub use ingest::*;

/// Consumer of an assembled model.
pub trait ModelSink {
    fn write_model(&mut self, model: &RateModel) -> Result<(), AppError>;
}
