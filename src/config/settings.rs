use crate::config::types::{HarnessError, Result};
/// Run configuration loading from config.json
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-operation timeouts of the process harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub prompt_ms: u64,
    pub stdout_ms: u64,
    pub reject_ms: u64,
    pub exit_ms: u64,
    pub wait_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            prompt_ms: 3000,
            stdout_ms: 3000,
            reject_ms: 1000,
            exit_ms: 5000,
            wait_ms: 5000,
        }
    }
}

impl Timeouts {
    pub fn prompt(&self) -> Duration {
        Duration::from_millis(self.prompt_ms)
    }

    pub fn stdout(&self) -> Duration {
        Duration::from_millis(self.stdout_ms)
    }

    pub fn reject(&self) -> Duration {
        Duration::from_millis(self.reject_ms)
    }

    pub fn exit(&self) -> Duration {
        Duration::from_millis(self.exit_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

/// Memory checker wrapped around spawned commands of leak-checked checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcheckConfig {
    pub binary: String,
    pub report_name: String,
    pub args: Vec<String>,
}

impl Default for MemcheckConfig {
    fn default() -> Self {
        Self {
            binary: "valgrind".to_string(),
            report_name: "valgrind.xml".to_string(),
            args: vec!["--show-leak-kinds=all".to_string(), "--xml=yes".to_string()],
        }
    }
}

/// Full config.json structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Shell every command is spawned through
    pub shell: String,
    /// Parent of the per-run staging root (system temp dir if unset)
    pub staging_root: Option<PathBuf>,
    pub timeouts: Timeouts,
    pub memcheck: MemcheckConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            staging_root: None,
            timeouts: Timeouts::default(),
            memcheck: MemcheckConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RunConfig = serde_json::from_str(&content).map_err(|e| {
            HarnessError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        log::debug!("Loaded run configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(HarnessError::Config("shell must not be empty".to_string()));
        }
        if self.memcheck.binary.trim().is_empty() {
            return Err(HarnessError::Config(
                "memcheck.binary must not be empty".to_string(),
            ));
        }
        if self.memcheck.report_name.contains('/') || self.memcheck.report_name.is_empty() {
            return Err(HarnessError::Config(format!(
                "memcheck.report_name must be a plain file name, got '{}'",
                self.memcheck.report_name
            )));
        }
        let t = &self.timeouts;
        for (name, value) in [
            ("prompt_ms", t.prompt_ms),
            ("stdout_ms", t.stdout_ms),
            ("reject_ms", t.reject_ms),
            ("exit_ms", t.exit_ms),
            ("wait_ms", t.wait_ms),
        ] {
            if value == 0 {
                return Err(HarnessError::Config(format!(
                    "timeouts.{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Directory under which the per-run staging root is created
    pub fn staging_parent(&self) -> PathBuf {
        self.staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
