/// Core types and error taxonomy for the checkbox pipeline
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::verdict::outcome::Failure;

/// Final status of one check - closed set
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    /// Every assertion held
    #[serde(rename = "pass")]
    Pass,
    /// An assertion failed
    #[serde(rename = "fail")]
    Fail,
    /// Not executed, or aborted by an unexpected error
    #[serde(rename = "skip")]
    Skip,
}

impl CheckStatus {
    pub fn is_pass(self) -> bool {
        matches!(self, CheckStatus::Pass)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "pass"),
            CheckStatus::Fail => write!(f, "fail"),
            CheckStatus::Skip => write!(f, "skip"),
        }
    }
}

/// Lifecycle of a spawned child process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Lifecycle {
    #[serde(rename = "running")]
    Running,
    /// Terminated on its own (exit or signal)
    #[serde(rename = "exited")]
    Exited,
    /// Force-terminated by the harness
    #[serde(rename = "killed")]
    Killed,
}

/// Infrastructure-level errors. These abort the whole run.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid check suite: {0}")]
    Suite(String),

    #[error("Required tool not found: {0}")]
    MissingTool(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Run interrupted by signal {0}")]
    Interrupted(i32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<nix::errno::Errno> for HarnessError {
    fn from(err: nix::errno::Errno) -> Self {
        HarnessError::Process(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Error channel of a check body.
///
/// Assertion failures become FAIL, unexpected errors become SKIP, and
/// internal errors abort the run.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("{0}")]
    Failed(Failure),

    #[error(transparent)]
    Unexpected(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] HarnessError),
}

impl From<Failure> for CheckError {
    fn from(failure: Failure) -> Self {
        CheckError::Failed(failure)
    }
}

impl From<anyhow::Error> for CheckError {
    fn from(err: anyhow::Error) -> Self {
        CheckError::Unexpected(err)
    }
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        CheckError::Unexpected(err.into())
    }
}
