//! Configuration and shared types
//!
//! Run configuration loading and the closed status/error taxonomy.

pub mod settings;
pub mod types;
