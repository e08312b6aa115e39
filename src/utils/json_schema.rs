/// Stable JSON report of one run
/// Consumers (renderers, graders) read this; the per-check records are
/// exactly the pipeline's result records in execution order.
use crate::config::types::{CheckStatus, HarnessError, Result};
use crate::verdict::result::{CheckResult, ResultRecord};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: &str = "1.0";

/// Status counts over all records
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_records(records: &[ResultRecord]) -> Self {
        let count = |status| records.iter().filter(|r| r.status == status).count();
        Self {
            total: records.len(),
            passed: count(CheckStatus::Pass),
            failed: count(CheckStatus::Fail),
            skipped: count(CheckStatus::Skip),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Run report (v1). Field names are frozen.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReportV1 {
    /// Schema version (always "1.0" for v1)
    pub schema_version: String,

    /// Submission directory that was checked
    pub submission: String,

    pub summary: RunSummary,

    pub results: Vec<ResultRecord>,

    /// RFC 3339 timestamp of run start
    pub run_start: String,

    /// RFC 3339 timestamp of run end
    pub run_end: String,
}

impl RunReportV1 {
    pub fn new(
        submission: String,
        results: &[CheckResult],
        run_start: String,
        run_end: String,
    ) -> Self {
        let results: Vec<ResultRecord> = results.iter().map(CheckResult::to_record).collect();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            submission,
            summary: RunSummary::from_records(&results),
            results,
            run_start,
            run_end,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("Failed to serialize report to JSON: {}", e)))
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            HarnessError::Config(format!("Failed to deserialize report from JSON: {}", e))
        })
    }

    /// Validate schema version
    pub fn validate_schema_version(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(HarnessError::Config(format!(
                "Unsupported schema version: {}",
                self.schema_version
            )));
        }
        Ok(())
    }
}
