/// Check outcomes and assertion failures
///
/// A check body returns an [`Outcome`]; assertion helpers short-circuit with
/// a [`Failure`] through `?`.
use serde::{Deserialize, Serialize};

use crate::verdict::mismatch::Mismatch;

/// Human-readable explanation attached to a non-pass result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rationale {
    Message(String),
    Mismatch(Mismatch),
}

impl Rationale {
    pub fn mismatch(&self) -> Option<&Mismatch> {
        match self {
            Rationale::Mismatch(m) => Some(m),
            Rationale::Message(_) => None,
        }
    }
}

impl std::fmt::Display for Rationale {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Rationale::Message(msg) => write!(f, "{}", msg),
            Rationale::Mismatch(m) => write!(f, "{}", m),
        }
    }
}

impl From<&str> for Rationale {
    fn from(msg: &str) -> Self {
        Rationale::Message(msg.to_string())
    }
}

impl From<String> for Rationale {
    fn from(msg: String) -> Self {
        Rationale::Message(msg)
    }
}

impl From<Mismatch> for Rationale {
    fn from(m: Mismatch) -> Self {
        Rationale::Mismatch(m)
    }
}

/// What kind of assertion tripped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Expected/actual disagreement or missing prompt/file
    #[serde(rename = "assertion")]
    Assertion,
    /// Deadline elapsed while the program was still running
    #[serde(rename = "timeout")]
    Timeout,
    /// Program died from a crash signal
    #[serde(rename = "crash")]
    Crash,
    /// Program output was not valid text
    #[serde(rename = "encoding")]
    Encoding,
    /// Harness shutdown was requested mid-check
    #[serde(rename = "interrupted")]
    Interrupted,
}

/// Assertion failure with its rationale and optional hint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub rationale: Rationale,
    pub help: Option<String>,
}

impl Failure {
    pub fn new(rationale: impl Into<Rationale>) -> Self {
        Self::with_kind(FailureKind::Assertion, rationale)
    }

    pub fn with_kind(kind: FailureKind, rationale: impl Into<Rationale>) -> Self {
        Self {
            kind,
            rationale: rationale.into(),
            help: None,
        }
    }

    pub fn timeout(rationale: impl Into<Rationale>) -> Self {
        Self::with_kind(FailureKind::Timeout, rationale)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }

    /// Attach a hint; the first hint wins
    pub fn help(mut self, message: impl Into<String>) -> Self {
        if self.help.is_none() {
            self.help = Some(message.into());
        }
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.rationale)
    }
}

impl std::error::Error for Failure {}

/// Hint attachment for assertion chains: `child.stdout(..).help("...")?`
pub trait Hint {
    fn help(self, message: &str) -> Self;
}

impl<T> Hint for std::result::Result<T, Failure> {
    fn help(self, message: &str) -> Self {
        self.map_err(|failure| failure.help(message))
    }
}

/// Tagged result of a check body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail {
        rationale: Rationale,
        help: Option<String>,
    },
    Skip {
        rationale: Rationale,
    },
}

impl Outcome {
    pub fn fail(rationale: impl Into<Rationale>) -> Self {
        Outcome::Fail {
            rationale: rationale.into(),
            help: None,
        }
    }

    pub fn skip(rationale: impl Into<Rationale>) -> Self {
        Outcome::Skip {
            rationale: rationale.into(),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Fail {
            rationale: failure.rationale,
            help: failure.help,
        }
    }
}
