//! Outcomes, mismatches and result records
//!
//! A check body produces an outcome; the pipeline freezes it into a result.

pub mod mismatch;
pub mod outcome;
pub mod result;
