/// Declarative check suites loaded from JSON
///
/// ```json
/// {
///   "checks": [
///     {"name": "exists", "require": ["hello.c"], "steps": []},
///     {"name": "compiles", "depends_on": "exists",
///      "steps": [{"step": "spawn", "command": "clang -o hello hello.c"},
///                {"step": "exit", "code": 0}]}
///   ]
/// }
/// ```
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::types::{CheckError, HarnessError, Result};
use crate::exec::child::{Child, Input, Step};
use crate::exec::expect::Expected;
use crate::pipeline::context::CheckContext;
use crate::pipeline::registry::CheckSuite;
use crate::verdict::outcome::{Hint, Outcome};

/// One interaction with the program under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum StepSpec {
    Spawn {
        command: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Stdin {
        #[serde(default)]
        line: Option<String>,
        #[serde(default)]
        eof: bool,
        #[serde(default)]
        prompt: Option<bool>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        help: Option<String>,
    },
    Stdout {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        literal: Option<String>,
        /// File in the staging directory holding the exact expected output
        #[serde(default)]
        file: Option<PathBuf>,
        #[serde(default)]
        eof: bool,
        /// Shown in logs and mismatches instead of the pattern
        #[serde(default)]
        shown: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        help: Option<String>,
    },
    Reject {
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        help: Option<String>,
    },
    Exit {
        code: i32,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        help: Option<String>,
    },
    /// Let the program finish without checking its output
    Wait {
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        help: Option<String>,
    },
}

impl StepSpec {
    fn kind(&self) -> &'static str {
        match self {
            StepSpec::Spawn { .. } => "spawn",
            StepSpec::Stdin { .. } => "stdin",
            StepSpec::Stdout { .. } => "stdout",
            StepSpec::Reject { .. } => "reject",
            StepSpec::Exit { .. } => "exit",
            StepSpec::Wait { .. } => "wait",
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            StepSpec::Spawn { command, .. } if command.trim().is_empty() => {
                Err("spawn needs a command".to_string())
            }
            StepSpec::Stdin { line, eof, .. } if line.is_some() == *eof => {
                Err("stdin needs exactly one of 'line' or 'eof'".to_string())
            }
            StepSpec::Stdout {
                pattern,
                literal,
                file,
                eof,
                ..
            } => {
                let given = [pattern.is_some(), literal.is_some(), file.is_some(), *eof]
                    .iter()
                    .filter(|set| **set)
                    .count();
                if given > 1 {
                    return Err(
                        "stdout takes at most one of 'pattern', 'literal', 'file' or 'eof'"
                            .to_string(),
                    );
                }
                if let Some(pattern) = pattern {
                    Expected::pattern(pattern.as_str())
                        .validate()
                        .map_err(|e| format!("invalid pattern \"{}\": {}", pattern, e))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// One check of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub leak_check: bool,
    /// Paths that must exist in the staging directory
    #[serde(default)]
    pub require: Vec<PathBuf>,
    /// Paths copied from the resource directory
    #[serde(default)]
    pub add: Vec<PathBuf>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl CheckSpec {
    fn validate(&self) -> Result<()> {
        let mut spawned = false;
        for (index, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|e| {
                HarnessError::Suite(format!("check '{}', step {}: {}", self.name, index + 1, e))
            })?;
            match step {
                StepSpec::Spawn { .. } => spawned = true,
                _ if !spawned => {
                    return Err(HarnessError::Suite(format!(
                        "check '{}', step {}: '{}' before any spawn",
                        self.name,
                        index + 1,
                        step.kind()
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckManifest {
    pub checks: Vec<CheckSpec>,
}

impl CheckManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Suite(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let manifest = Self::parse(&content).map_err(|e| match e {
            HarnessError::Suite(msg) => HarnessError::Suite(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        log::debug!(
            "Loaded {} checks from {}",
            manifest.checks.len(),
            path.display()
        );
        Ok(manifest)
    }

    pub fn parse(json: &str) -> Result<Self> {
        let manifest: CheckManifest = serde_json::from_str(json)
            .map_err(|e| HarnessError::Suite(format!("malformed manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for check in &self.checks {
            if !names.insert(check.name.as_str()) {
                return Err(HarnessError::Suite(format!(
                    "duplicate check '{}'",
                    check.name
                )));
            }
            check.validate()?;
        }
        Ok(())
    }

    /// Register every check, in manifest order
    pub fn into_suite(self) -> Result<CheckSuite> {
        let mut suite = CheckSuite::new();
        for check in self.checks {
            let check = Rc::new(check);
            let spec = Rc::clone(&check);
            let mut builder = suite.check(&check.name, move |ctx| run_check(&spec, ctx));
            if let Some(dependency) = &check.depends_on {
                builder = builder.depends_on(dependency);
            }
            if let Some(description) = &check.description {
                builder = builder.description(description);
            }
            if check.leak_check {
                builder.leak_check();
            }
        }
        suite.validate()?;
        Ok(suite)
    }
}

fn hinted<T>(step: Step<T>, help: &Option<String>) -> Step<T> {
    match help {
        Some(help) => step.help(help),
        None => step,
    }
}

fn within(timeout_ms: Option<u64>, default: Duration) -> Duration {
    timeout_ms.map(Duration::from_millis).unwrap_or(default)
}

fn run_check(check: &CheckSpec, ctx: &mut CheckContext) -> std::result::Result<Outcome, CheckError> {
    if !check.require.is_empty() {
        ctx.require(&check.require)?;
    }
    if !check.add.is_empty() {
        ctx.add(&check.add)?;
    }

    let mut child: Option<Child> = None;
    for step in &check.steps {
        if let StepSpec::Spawn { command, env } = step {
            child = Some(ctx.spawn_with_env(command, env.clone())?);
            continue;
        }
        let current = child
            .take()
            .ok_or_else(|| anyhow!("'{}' step without a spawned program", step.kind()))?;
        child = Some(run_step(step, current, ctx)?);
    }
    Ok(Outcome::Pass)
}

fn run_step(step: &StepSpec, child: Child, ctx: &CheckContext) -> std::result::Result<Child, CheckError> {
    let timeouts = ctx.timeouts();
    let child = match step {
        StepSpec::Spawn { .. } => child,
        StepSpec::Stdin {
            line,
            prompt,
            timeout_ms,
            help,
            ..
        } => {
            let input = match line {
                Some(line) => Input::Line(line.clone()),
                None => Input::Eof,
            };
            let prompt = prompt.unwrap_or(true);
            hinted(
                child.stdin_with(input, prompt, within(*timeout_ms, timeouts.prompt())),
                help,
            )?
        }
        StepSpec::Stdout {
            pattern,
            literal,
            file,
            eof,
            shown,
            timeout_ms,
            help,
        } => {
            let expected = if let Some(pattern) = pattern {
                Some(Expected::pattern(pattern.as_str()))
            } else if let Some(literal) = literal {
                Some(Expected::literal(literal.as_str()))
            } else if let Some(file) = file {
                Some(ctx.read_expected(file)?)
            } else if *eof {
                Some(Expected::eof())
            } else {
                None
            };
            let expected = match (expected, shown) {
                (Some(expected), Some(shown)) => Some(expected.shown_as(shown.as_str())),
                (expected, _) => expected,
            };
            hinted(
                child.stdout_within(expected, within(*timeout_ms, timeouts.stdout())),
                help,
            )?
        }
        StepSpec::Reject { timeout_ms, help } => hinted(
            child.reject_within(within(*timeout_ms, timeouts.reject())),
            help,
        )?,
        StepSpec::Exit {
            code,
            timeout_ms,
            help,
        } => hinted(
            child.exit_within(*code, within(*timeout_ms, timeouts.exit())),
            help,
        )?,
        StepSpec::Wait { timeout_ms, help } => {
            let waited = match timeout_ms {
                Some(ms) => child.wait(Duration::from_millis(*ms)),
                None => child.wait_default(),
            };
            hinted(waited, help)?
        }
    };
    Ok(child)
}
