//! checkbox: dependency-ordered checks against programs under test
//! Drives submissions through interactive terminals, compares what they print,
//! and reports pass/fail/skip for every check in a suite.
//!
//! # Architecture
//!
//! ## OS Primitives ([`kernel`])
//! - [`kernel::pty`]: Pseudo-terminal allocation and non-blocking reads
//! - [`kernel::signal`]: Signal handling and shutdown requests
//!
//! ## Process Harness ([`exec`])
//! - [`exec::command`]: Shell command lines, environment, memory-checker wrapping
//! - [`exec::child`]: Interactive child with a sticky failure latch
//! - [`exec::expect`]: Expected output (pattern, literal, end of output)
//!
//! ## Outcomes ([`verdict`])
//! - [`verdict::mismatch`]: Expected/actual pairs shown to the student
//! - [`verdict::outcome`]: Pass, fail and skip with rationale and help
//! - [`verdict::result`]: Frozen per-check result records and logs
//!
//! ## Check Pipeline ([`pipeline`])
//! - [`pipeline::registry`]: Check registration and suite validation
//! - [`pipeline::context`]: Per-check context handed to bodies
//! - [`pipeline::runner`]: Sequential execution with skip propagation
//!
//! ## Suites as Data ([`suite`])
//! - [`suite::manifest`]: JSON check manifests compiled into suites
//!
//! ## Memory Diagnostics ([`diagnostics`])
//! - [`diagnostics::leak`]: Memory checker XML report aggregation
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::staging`]: Per-check staging directories
//! - [`safety::safe_cleanup`]: Symlink-safe tree removal
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: Run configuration and timeouts
//! - [`config::types`]: Closed status enums and the error taxonomy
//!
//! ## Utilities ([`utils`])
//! - [`utils::json_schema`]: Versioned JSON run report
//!
//! # Design Principles
//!
//! 1. **Never touch the submission** - Every check runs on a copy
//! 2. **First failure wins** - A child's failure latches and sticks
//! 3. **Skip, don't guess** - Unmet dependencies and harness surprises are SKIP
//! 4. **Always clean up** - Children are killed and staging removed on every path

// OS Primitives
pub mod kernel;

// Process Harness
pub mod exec;

// Outcomes
pub mod verdict;

// Check Pipeline
pub mod pipeline;

// Suites as Data
pub mod suite;

// Memory Diagnostics
pub mod diagnostics;

// Safety & Cleanup
pub mod safety;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the checkbox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;

pub use config::settings::{RunConfig, Timeouts};
pub use exec::{Child, CommandSpec, Expected, Input, Step};
pub use kernel::signal::ShutdownSignal;
pub use pipeline::{CheckContext, CheckSuite, Pipeline};
pub use verdict::outcome::{Failure, Outcome};
pub use verdict::result::CheckResult;
