//! Output expectations and buffer normalization.

use regex::Regex;

use crate::verdict::mismatch::Mismatch;
use crate::verdict::outcome::Failure;

/// Normalize terminal output: CRLF becomes LF and leading blank lines go.
pub fn normalize_output(raw: &str) -> String {
    raw.replace("\r\n", "\n").trim_start_matches('\n').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// Regex anchored at the start of the output
    Pattern(String),
    /// Exact text, e.g. the content of an expected-output file
    Literal(String),
    /// No output before end of input
    Eof,
}

/// What a program is expected to print
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    matcher: Matcher,
    shown: Option<String>,
}

impl Expected {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Pattern(pattern.into()),
            shown: None,
        }
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            matcher: Matcher::Literal(text.into()),
            shown: None,
        }
    }

    pub fn eof() -> Self {
        Self {
            matcher: Matcher::Eof,
            shown: None,
        }
    }

    /// Text shown in logs and mismatches instead of the raw pattern
    pub fn shown_as(mut self, text: impl Into<String>) -> Self {
        self.shown = Some(text.into());
        self
    }

    pub fn is_eof(&self) -> bool {
        self.matcher == Matcher::Eof
    }

    /// Compile-check a pattern expectation
    pub fn validate(&self) -> Result<(), regex::Error> {
        if let Matcher::Pattern(p) = &self.matcher {
            anchored(p)?;
        }
        Ok(())
    }

    /// Human-readable form used in logs and mismatches
    pub fn describe(&self) -> String {
        if let Some(shown) = &self.shown {
            return shown.clone();
        }
        match &self.matcher {
            Matcher::Pattern(p) => p.clone(),
            Matcher::Literal(t) => t.clone(),
            Matcher::Eof => "EOF".to_string(),
        }
    }

    /// Log line written before the comparison
    pub fn log_line(&self) -> String {
        if self.is_eof() {
            "checking for EOF...".to_string()
        } else {
            format!("checking for output \"{}\"...", self.describe())
        }
    }

    /// Compare against normalized program output
    pub fn check(&self, output: &str) -> Result<(), Failure> {
        let matched = match &self.matcher {
            Matcher::Pattern(p) => {
                let re = anchored(p).map_err(|e| {
                    Failure::new(format!("invalid output pattern \"{}\": {}", p, e))
                })?;
                re.is_match(output)
            }
            Matcher::Literal(text) => text == output,
            // Anything still buffered before the end of input is extra output.
            Matcher::Eof => output.is_empty(),
        };
        if matched {
            return Ok(());
        }
        let mismatch = if self.is_eof() && self.shown.is_none() {
            Mismatch::eof(output)
        } else {
            Mismatch::new(self.describe(), output)
        };
        Err(Failure::new(mismatch))
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

impl From<&str> for Expected {
    fn from(pattern: &str) -> Self {
        Expected::pattern(pattern)
    }
}

impl From<String> for Expected {
    fn from(pattern: String) -> Self {
        Expected::pattern(pattern)
    }
}
