//! Memory diagnostics produced by the external memory checker.

pub mod leak;

pub use leak::{LeakEntry, LeakError, LeakReport};
