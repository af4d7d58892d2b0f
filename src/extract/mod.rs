//! Extraction & normalization.
//!
//! - canonical category naming (`category`)
//! - raw process label resolution (`process`)
//! - two-pass yield/ratio extraction (`yields`)
//! - significance-based category admission (`gate`)

pub mod category;
pub mod gate;
pub mod process;
pub mod yields;

pub use category::*;
pub use gate::*;
pub use process::*;
pub use yields::*;
