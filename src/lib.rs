//! `datacard` library crate.
//!
//! The binary (`datacard`) is a thin wrapper around this library so that:
//!
//! - the extraction and assembly stages are testable without spawning processes
//! - other front-ends can drive the same pipeline with their own yield sources and sinks

pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod io;
pub mod nuisance;
pub mod report;
