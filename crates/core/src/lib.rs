//! goinfo-core
//!
//! Core library for extracting forensic metadata from compiled Go binaries.
//!
//! This crate defines the model reported by a Go binary analyzer, the feature
//! vocabulary consumed downstream, the extraction stages, and the loader that
//! opens a binary and classifies every way that can go wrong.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends (CLI, host plugin runtimes, etc.).

pub mod analysis;
pub mod config;
pub mod features;
pub mod model;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
