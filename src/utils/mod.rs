//! Utilities
//!
//! Output schema shared by the CLI and embedders.

pub mod json_schema;
