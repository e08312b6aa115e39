/// Expected-vs-actual payload attached to output assertion failures
use serde::{Deserialize, Serialize};

/// Characters kept when a mismatch side is shown to a human
const DISPLAY_LIMIT: usize = 15;

/// One side of a mismatch. End of output serializes as `null`, so text
/// that happens to read "EOF" survives a round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Shown {
    Text(String),
    /// End of output
    Eof,
}

impl From<Option<String>> for Shown {
    fn from(value: Option<String>) -> Self {
        match value {
            Some(text) => Shown::Text(text),
            None => Shown::Eof,
        }
    }
}

impl From<Shown> for Option<String> {
    fn from(value: Shown) -> Self {
        match value {
            Shown::Text(text) => Some(text),
            Shown::Eof => None,
        }
    }
}

impl Shown {
    /// Escaped, quoted and truncated representation
    pub fn raw(&self) -> String {
        match self {
            Shown::Eof => "EOF".to_string(),
            Shown::Text(text) => {
                let escaped: String = text.escape_debug().collect();
                let mut chars = escaped.chars();
                let head: String = chars.by_ref().take(DISPLAY_LIMIT).collect();
                if chars.next().is_some() {
                    format!("\"{}...\"", head)
                } else {
                    format!("\"{}\"", head)
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub expected: Shown,
    pub actual: Shown,
}

impl Mismatch {
    pub fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: Shown::Text(expected.into()),
            actual: Shown::Text(actual.into()),
        }
    }

    /// Expected end of output but the program printed `actual`
    pub fn eof(actual: impl Into<String>) -> Self {
        Self {
            expected: Shown::Eof,
            actual: Shown::Text(actual.into()),
        }
    }
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "expected {}, not {}", self.expected.raw(), self.actual.raw())
    }
}
