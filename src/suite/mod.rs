//! Check suites described as data

pub mod manifest;

pub use manifest::{CheckManifest, CheckSpec, StepSpec};
