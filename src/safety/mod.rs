//! Staging directories and their cleanup
//!
//! Every check runs in its own copy of the submission; the whole staging
//! root is removed exactly once, on success, failure or interrupt.

pub mod safe_cleanup;
pub mod staging;
