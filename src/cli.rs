use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::settings::RunConfig;
use crate::config::types::HarnessError;
use crate::exec::command::find_program;
use crate::kernel::signal::{ShutdownSignal, SignalHandler};
use crate::pipeline::runner::Pipeline;
use crate::suite::manifest::CheckManifest;
use crate::utils::json_schema::RunReportV1;

/// Exit status when every check passed
pub const EXIT_PASSED: i32 = 0;
/// Exit status when at least one check failed or was skipped
pub const EXIT_NOT_PASSED: i32 = 1;
/// Exit status for harness errors (bad suite, missing tool, I/O)
pub const EXIT_INTERNAL: i32 = 2;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a check suite against a submission and print the JSON report
    Run {
        /// Check suite manifest (JSON)
        #[arg(long)]
        suite: PathBuf,
        /// Directory holding the submission; copied, never modified
        #[arg(long)]
        submission: PathBuf,
        /// Directory that `add` steps copy fixtures from
        #[arg(long)]
        resources: Option<PathBuf>,
        /// Run configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Debug logging on stderr
        #[arg(long)]
        verbose: bool,
    },
    /// Check that the shell and memory checker are installed
    CheckDeps {
        /// Run configuration (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Show resolved paths
        #[arg(long)]
        verbose: bool,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::Run { verbose, .. } | Self::CheckDeps { verbose, .. } => *verbose,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

/// Exit status for a failed run
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HarnessError>() {
        Some(HarnessError::Interrupted(sig)) => 128 + sig,
        _ => EXIT_INTERNAL,
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.command.verbose());

    let outcome = match cli.command {
        Commands::Run {
            suite,
            submission,
            resources,
            config,
            ..
        } => run_suite(&suite, &submission, resources, config.as_deref()),
        Commands::CheckDeps { config, verbose } => check_dependencies(config.as_deref(), verbose),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("checkbox: internal error: {:#}", err);
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run_suite(
    suite: &Path,
    submission: &Path,
    resources: Option<PathBuf>,
    config: Option<&Path>,
) -> Result<i32> {
    // Handlers only record the signal; the pipeline polls it and tears down.
    SignalHandler::init().map_err(|e| anyhow::anyhow!(e))?;

    let config = RunConfig::load_or_default(config)?;
    let suite = CheckManifest::load(suite)?.into_suite()?;
    let submission = submission
        .canonicalize()
        .with_context(|| format!("submission directory {}", submission.display()))?;

    let mut pipeline = Pipeline::new(suite, config, &submission)?.shutdown(ShutdownSignal::process());
    if let Some(resources) = resources {
        let resources = resources
            .canonicalize()
            .with_context(|| format!("resource directory {}", resources.display()))?;
        pipeline = pipeline.resources(resources);
    }

    let run_start = chrono::Utc::now().to_rfc3339();
    let results = pipeline.run()?;
    let run_end = chrono::Utc::now().to_rfc3339();

    let report = RunReportV1::new(
        submission.display().to_string(),
        &results,
        run_start,
        run_end,
    );
    println!("{}", report.to_json()?);

    Ok(if report.summary.all_passed() {
        EXIT_PASSED
    } else {
        EXIT_NOT_PASSED
    })
}

fn check_dependencies(config: Option<&Path>, verbose: bool) -> Result<i32> {
    let config = RunConfig::load_or_default(config)?;
    let tools = [
        ("shell", config.shell.as_str()),
        ("memory checker", config.memcheck.binary.as_str()),
    ];

    println!("🔍 Checking checkbox dependencies...");
    println!();

    let mut all_ok = true;
    for (role, program) in tools {
        match find_program(program) {
            Some(path) => {
                println!("✅ {} ({}) - OK", role, program);
                if verbose {
                    println!("  {} -> {}", program, path.display());
                }
            }
            None => {
                println!("❌ {} ({}) - MISSING", role, program);
                all_ok = false;
            }
        }
    }

    if all_ok {
        Ok(EXIT_PASSED)
    } else {
        println!();
        println!("Checks that set leak_check need the memory checker; every check needs the shell.");
        Ok(EXIT_NOT_PASSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "checkbox",
            "run",
            "--suite",
            "checks.json",
            "--submission",
            "hello",
            "--verbose",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                suite,
                submission,
                resources,
                verbose,
                ..
            } => {
                assert_eq!(suite, PathBuf::from("checks.json"));
                assert_eq!(submission, PathBuf::from("hello"));
                assert!(resources.is_none());
                assert!(verbose);
            }
            Commands::CheckDeps { .. } => panic!("parsed the wrong command"),
        }
    }

    #[test]
    fn test_run_requires_suite() {
        assert!(Cli::try_parse_from(["checkbox", "run", "--submission", "x"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let interrupted = anyhow::Error::new(HarnessError::Interrupted(libc::SIGINT));
        assert_eq!(exit_code_for(&interrupted), 128 + libc::SIGINT);
        let suite = anyhow::Error::new(HarnessError::Suite("bad".to_string()));
        assert_eq!(exit_code_for(&suite), EXIT_INTERNAL);
    }
}
