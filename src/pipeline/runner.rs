//! Sequential, dependency-ordered execution of a check suite.
//!
//! For every check in declaration order:
//! 1. skip it when its dependency has no PASS result
//! 2. stage a fresh directory from the dependency's directory or the base copy
//! 3. run the body behind an error boundary (assertions FAIL, unexpected
//!    errors and panics SKIP, harness errors abort the run)
//! 4. kill every child the body spawned
//! 5. check the memory report when the check asked for it and passed
//!
//! The staging root is removed once the run ends, however it ends.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Once;

use crate::config::settings::RunConfig;
use crate::config::types::{CheckError, CheckStatus, HarnessError, Result};
use crate::diagnostics::leak::LeakReport;
use crate::exec::command::find_program;
use crate::kernel::signal::ShutdownSignal;
use crate::pipeline::context::{CheckContext, PipelineContext};
use crate::pipeline::registry::{CheckSuite, RegisteredCheck};
use crate::safety::staging::StagingArea;
use crate::verdict::outcome::Outcome;
use crate::verdict::result::{CheckResult, ERRORED_RATIONALE};

thread_local! {
    static PANIC_TRACE: RefCell<Option<String>> = RefCell::new(None);
}

static PANIC_HOOK: Once = Once::new();

/// Record a backtrace for panics inside check bodies, then defer to the
/// previous hook
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "check panicked".to_string()
    }
}

#[derive(Debug)]
pub struct Pipeline {
    suite: CheckSuite,
    config: RunConfig,
    submission: PathBuf,
    resources: Option<PathBuf>,
    shutdown: ShutdownSignal,
}

impl Pipeline {
    /// Validate the suite and config; nothing touches the filesystem yet
    pub fn new(suite: CheckSuite, config: RunConfig, submission: impl Into<PathBuf>) -> Result<Self> {
        suite.validate()?;
        config.validate()?;
        Ok(Self {
            suite,
            config,
            submission: submission.into(),
            resources: None,
            shutdown: ShutdownSignal::process(),
        })
    }

    /// Directory `CheckContext::add` copies from
    pub fn resources(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources = Some(dir.into());
        self
    }

    pub fn shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn suite(&self) -> &CheckSuite {
        &self.suite
    }

    /// Run every check and return one result per check, in declaration order
    pub fn run(&self) -> Result<Vec<CheckResult>> {
        self.preflight()?;
        install_panic_hook();

        let mut staging = StagingArea::create(&self.config.staging_parent())?;
        log::info!(
            "Run {}: {} checks in {}",
            staging.run_id(),
            self.suite.len(),
            staging.root().display()
        );
        let results = self.run_in(&staging);
        let cleaned = staging.cleanup();

        let results = results?;
        cleaned?;
        Ok(results)
    }

    /// Tools needed by the run must exist before anything is staged
    fn preflight(&self) -> Result<()> {
        if find_program(&self.config.shell).is_none() {
            return Err(HarnessError::MissingTool(self.config.shell.clone()));
        }
        if self.suite.needs_memcheck() && find_program(&self.config.memcheck.binary).is_none() {
            return Err(HarnessError::MissingTool(self.config.memcheck.binary.clone()));
        }
        Ok(())
    }

    fn interrupted(&self) -> Result<()> {
        match self.shutdown.requested() {
            Some(sig) => {
                log::warn!("Shutdown requested (signal {}), aborting run", sig);
                Err(HarnessError::Interrupted(sig))
            }
            None => Ok(()),
        }
    }

    fn run_in(&self, staging: &StagingArea) -> Result<Vec<CheckResult>> {
        staging.prepare_base(&self.submission)?;

        let mut context = PipelineContext::new(self.suite.names());
        let mut results = Vec::with_capacity(self.suite.len());
        for check in self.suite.checks() {
            self.interrupted()?;
            let result = self.run_check(check, staging, &context)?;
            log::info!("{} {}", result.status, result.name);
            context.record(result.clone());
            results.push(result);
        }
        log::debug!(
            "Completed {} of {} checks",
            context.completed(),
            context.order().len()
        );
        Ok(results)
    }

    fn run_check(
        &self,
        check: &RegisteredCheck,
        staging: &StagingArea,
        context: &PipelineContext,
    ) -> Result<CheckResult> {
        let descriptor = &check.descriptor;
        if let Some(dependency) = &descriptor.depends_on {
            if context.status(dependency) != Some(CheckStatus::Pass) {
                log::debug!(
                    "Skipping {}: dependency {} did not pass",
                    descriptor.name,
                    dependency
                );
                return Ok(CheckResult::blocked(
                    &descriptor.name,
                    descriptor.description.as_deref(),
                ));
            }
        }

        let dir = staging.stage(&descriptor.name, descriptor.depends_on.as_deref())?;
        let mut ctx = CheckContext::new(
            descriptor,
            dir,
            self.resources.as_deref(),
            context,
            &self.config,
            self.shutdown.clone(),
        );

        PANIC_TRACE.with(|slot| *slot.borrow_mut() = None);
        let returned = panic::catch_unwind(AssertUnwindSafe(|| (check.body)(&mut ctx)));
        ctx.kill_children();
        self.interrupted()?;

        let outcome = match returned {
            Ok(Ok(outcome)) => match (outcome, ctx.first_child_failure()) {
                // A failure latched on a child the body stopped looking at
                (Outcome::Pass, Some(failure)) => failure.into(),
                (outcome, _) => outcome,
            },
            Ok(Err(CheckError::Failed(failure))) => failure.into(),
            Ok(Err(CheckError::Unexpected(err))) => {
                log::warn!("Check {} errored: {:#}", descriptor.name, err);
                for line in format!("{:?}", err).lines() {
                    ctx.log(line);
                }
                Outcome::skip(ERRORED_RATIONALE)
            }
            Ok(Err(CheckError::Internal(err))) => return Err(err),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("Check {} panicked: {}", descriptor.name, message);
                ctx.log(message);
                if let Some(trace) = PANIC_TRACE.with(|slot| slot.borrow_mut().take()) {
                    for line in trace.lines() {
                        ctx.log(line);
                    }
                }
                Outcome::skip(ERRORED_RATIONALE)
            }
        };

        let outcome = if outcome == Outcome::Pass && descriptor.leak_check {
            self.check_leaks(&ctx)
        } else {
            outcome
        };
        Ok(ctx.finish(outcome))
    }

    fn check_leaks(&self, ctx: &CheckContext) -> Outcome {
        ctx.log("checking for valgrind errors...");
        let report = ctx.path(&self.config.memcheck.report_name);
        match LeakReport::load(&report, ctx.dir()) {
            Ok(report) => report.into_outcome(ctx.check_log()),
            Err(e) => {
                log::warn!("Check {}: {}", ctx.name(), e);
                ctx.log(e.to_string());
                Outcome::skip(ERRORED_RATIONALE)
            }
        }
    }
}
