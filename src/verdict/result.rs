/// Result records produced by the pipeline
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::types::CheckStatus;
use crate::verdict::mismatch::Mismatch;
use crate::verdict::outcome::{Outcome, Rationale};

/// Rationale recorded for checks whose dependency did not pass
pub const BLOCKED_RATIONALE: &str = "can't check until a frown turns upside down";

/// Rationale recorded when a check body errored out
pub const ERRORED_RATIONALE: &str = "ran into an error while running checks";

/// Ordered per-check log shared by a check context and its children
#[derive(Clone, Debug, Default)]
pub struct CheckLog(Rc<RefCell<Vec<String>>>);

impl CheckLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.0.borrow_mut().push(line.into());
    }

    pub fn extend<I: IntoIterator<Item = String>>(&self, lines: I) {
        self.0.borrow_mut().extend(lines);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

/// Result of one executed (or skipped) check. Never mutated once stored.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub description: Option<String>,
    pub status: CheckStatus,
    pub rationale: Option<Rationale>,
    pub help: Option<String>,
    pub log: Vec<String>,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl CheckResult {
    pub fn from_outcome(
        name: &str,
        description: Option<&str>,
        outcome: Outcome,
        log: Vec<String>,
        data: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let (status, rationale, help) = match outcome {
            Outcome::Pass => (CheckStatus::Pass, None, None),
            Outcome::Fail { rationale, help } => (CheckStatus::Fail, Some(rationale), help),
            Outcome::Skip { rationale } => (CheckStatus::Skip, Some(rationale), None),
        };
        Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            status,
            rationale,
            help,
            log,
            data,
        }
    }

    /// SKIP caused by an unmet dependency
    pub fn blocked(name: &str, description: Option<&str>) -> Self {
        Self::from_outcome(
            name,
            description,
            Outcome::skip(BLOCKED_RATIONALE),
            Vec::new(),
            BTreeMap::new(),
        )
    }

    pub fn mismatch(&self) -> Option<&Mismatch> {
        self.rationale.as_ref().and_then(Rationale::mismatch)
    }

    pub fn to_record(&self) -> ResultRecord {
        ResultRecord {
            name: self.name.clone(),
            description: self.description.clone(),
            status: self.status,
            rationale: self.rationale.as_ref().map(ToString::to_string),
            help: self.help.clone(),
            log: self.log.clone(),
            data: self.data.clone(),
            mismatch: self.mismatch().cloned(),
        }
    }
}

/// Flat, serializable record consumed by rendering/export collaborators
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: String,
    pub description: Option<String>,
    pub status: CheckStatus,
    pub rationale: Option<String>,
    pub help: Option<String>,
    pub log: Vec<String>,
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mismatch: Option<Mismatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_log_is_shared_between_clones() {
        let log = CheckLog::new();
        assert!(log.is_empty());
        let clone = log.clone();
        clone.push("running ./hello...");
        log.push("checking for output \"hi\"...");
        assert_eq!(log.len(), 2);
        assert_eq!(clone.entries()[0], "running ./hello...");
        assert!(!clone.is_empty());
    }

    #[test]
    fn test_blocked_result() {
        let result = CheckResult::blocked("compiles", Some("hello.c compiles"));
        assert_eq!(result.status, CheckStatus::Skip);
        assert_eq!(
            result.rationale,
            Some(Rationale::Message(BLOCKED_RATIONALE.to_string()))
        );
        assert!(result.log.is_empty());
    }

    #[test]
    fn test_record_carries_mismatch() {
        let outcome = Outcome::Fail {
            rationale: Mismatch::new("Goodbye", "Hello").into(),
            help: Some("check your greeting".to_string()),
        };
        let result = CheckResult::from_outcome(
            "greets",
            None,
            outcome,
            vec!["running ./hello...".to_string()],
            BTreeMap::new(),
        );
        let json = serde_json::to_value(result.to_record()).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["rationale"], "expected \"Goodbye\", not \"Hello\"");
        assert_eq!(json["mismatch"]["expected"], "Goodbye");
        assert_eq!(json["mismatch"]["actual"], "Hello");
        assert_eq!(json["help"], "check your greeting");
    }

    #[test]
    fn test_record_without_mismatch_omits_field() {
        let result = CheckResult::from_outcome(
            "exists",
            None,
            Outcome::Pass,
            Vec::new(),
            BTreeMap::new(),
        );
        let json = serde_json::to_value(result.to_record()).unwrap();
        assert!(json.get("mismatch").is_none());
        assert!(json["rationale"].is_null());
    }
}
