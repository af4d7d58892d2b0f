//! Nuisance assembly: peak directions, symmetrization/overrides, final model.

pub mod assemble;
pub mod peak;
pub mod symmetrize;

pub use assemble::*;
pub use peak::*;
pub use symmetrize::*;
