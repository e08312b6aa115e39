//! Thin wrappers around OS primitives.
//!
//! All `unsafe` code is concentrated here and in the spawn pre-exec hook.

pub mod pty;
pub mod signal;
