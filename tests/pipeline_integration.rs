//! Integration tests for the check pipeline
//!
//! Every test stages into its own temporary root so the cleanup guarantees
//! can be checked from the outside.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use checkbox::config::settings::{MemcheckConfig, RunConfig};
use checkbox::diagnostics::leak::LEAK_RATIONALE;
use checkbox::suite::CheckManifest;
use checkbox::verdict::result::{BLOCKED_RATIONALE, ERRORED_RATIONALE};
use checkbox::{
    CheckError, CheckResult, CheckStatus, CheckSuite, Child, Failure, HarnessError, Lifecycle,
    Outcome, Pipeline, ShutdownSignal,
};
use tempfile::TempDir;

struct Fixture {
    submission: TempDir,
    staging: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let submission = tempfile::tempdir().unwrap();
        fs::write(submission.path().join("hello.txt"), "hello\n").unwrap();
        Self {
            submission,
            staging: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> RunConfig {
        RunConfig {
            staging_root: Some(self.staging.path().to_path_buf()),
            ..RunConfig::default()
        }
    }

    fn pipeline(&self, suite: CheckSuite) -> Pipeline {
        Pipeline::new(suite, self.config(), self.submission.path())
            .unwrap()
            .shutdown(ShutdownSignal::manual())
    }

    fn run(&self, suite: CheckSuite) -> Vec<CheckResult> {
        self.pipeline(suite).run().unwrap()
    }

    fn staging_is_empty(&self) -> bool {
        fs::read_dir(self.staging.path()).unwrap().next().is_none()
    }
}

fn statuses(results: &[CheckResult]) -> Vec<(&str, CheckStatus)> {
    results.iter().map(|r| (r.name.as_str(), r.status)).collect()
}

#[test]
fn test_failed_dependency_skips_without_running_body() {
    let fixture = Fixture::new();
    let ran = Rc::new(Cell::new(false));

    let mut suite = CheckSuite::new();
    suite.check("exists", |ctx| {
        ctx.require(&["missing.c"])?;
        Ok(Outcome::Pass)
    });
    let flag = Rc::clone(&ran);
    suite
        .check("compiles", move |_ctx| {
            flag.set(true);
            Ok(Outcome::Pass)
        })
        .depends_on("exists");

    let results = fixture.run(suite);
    assert_eq!(
        statuses(&results),
        vec![("exists", CheckStatus::Fail), ("compiles", CheckStatus::Skip)]
    );
    assert_eq!(
        results[0].rationale.as_ref().unwrap().to_string(),
        "missing.c not found"
    );
    assert_eq!(
        results[1].rationale.as_ref().unwrap().to_string(),
        BLOCKED_RATIONALE
    );
    assert!(results[1].log.is_empty());
    assert!(!ran.get());
    assert!(fixture.staging_is_empty());
}

#[test]
fn test_dependent_check_inherits_directory_and_independent_gets_base() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("writes", |ctx| {
        fs::write(ctx.path("built.txt"), "artifact")?;
        Ok(Outcome::Pass)
    });
    suite
        .check("reads", |ctx| {
            ctx.require(&["built.txt", "hello.txt"])?;
            Ok(Outcome::Pass)
        })
        .depends_on("writes");
    suite.check("fresh", |ctx| {
        if ctx.path("built.txt").exists() {
            return Ok(Outcome::fail("saw another check's file"));
        }
        ctx.require(&["hello.txt"])?;
        Ok(Outcome::Pass)
    });

    let results = fixture.run(suite);
    assert_eq!(
        statuses(&results),
        vec![
            ("writes", CheckStatus::Pass),
            ("reads", CheckStatus::Pass),
            ("fresh", CheckStatus::Pass),
        ]
    );
    // The submission itself is never modified
    assert!(!fixture.submission.path().join("built.txt").exists());
}

#[test]
fn test_children_killed_after_failed_body() {
    let fixture = Fixture::new();
    let spawned: Rc<RefCell<Option<Child>>> = Rc::new(RefCell::new(None));

    let mut suite = CheckSuite::new();
    let slot = Rc::clone(&spawned);
    suite.check("hangs", move |ctx| {
        let child = ctx.spawn("sleep 30")?;
        *slot.borrow_mut() = Some(child);
        Err(CheckError::Failed(Failure::new("gave up")))
    });

    let results = fixture.run(suite);
    assert_eq!(results[0].status, CheckStatus::Fail);
    assert_eq!(results[0].log, vec!["running sleep 30...".to_string()]);

    let child = spawned.borrow_mut().take().unwrap();
    assert_eq!(child.lifecycle(), Lifecycle::Killed);
}

#[test]
fn test_ignored_child_failure_turns_pass_into_fail() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("ignores", |ctx| {
        let child = ctx.spawn("exit 1")?;
        let _ = child.exit(0);
        Ok(Outcome::Pass)
    });

    let results = fixture.run(suite);
    assert_eq!(results[0].status, CheckStatus::Fail);
    assert_eq!(
        results[0].rationale.as_ref().unwrap().to_string(),
        "expected exit code 0, not 1"
    );
}

#[test]
fn test_unexpected_error_and_panic_skip() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("errors", |ctx| {
        fs::read_to_string(ctx.path("no-such-file"))?;
        Ok(Outcome::Pass)
    });
    suite.check("panics", |_ctx| -> Result<Outcome, CheckError> {
        panic!("check body blew up");
    });
    suite.check("continues", |_ctx| Ok(Outcome::Pass));

    let results = fixture.run(suite);
    assert_eq!(
        statuses(&results),
        vec![
            ("errors", CheckStatus::Skip),
            ("panics", CheckStatus::Skip),
            ("continues", CheckStatus::Pass),
        ]
    );
    for errored in &results[..2] {
        assert_eq!(
            errored.rationale.as_ref().unwrap().to_string(),
            ERRORED_RATIONALE
        );
        assert!(!errored.log.is_empty());
    }
    assert!(results[1]
        .log
        .iter()
        .any(|line| line.contains("check body blew up")));
}

#[test]
fn test_internal_error_aborts_run_and_cleans_up() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("aborts", |_ctx| {
        Err(CheckError::Internal(HarnessError::Config("broken".to_string())))
    });

    let err = fixture.pipeline(suite).run().unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
    assert!(fixture.staging_is_empty());
}

#[test]
fn test_interrupt_aborts_run_and_cleans_up() {
    let fixture = Fixture::new();
    let shutdown = ShutdownSignal::manual();
    let ran_after = Rc::new(Cell::new(false));

    let mut suite = CheckSuite::new();
    let signal = shutdown.clone();
    suite.check("interrupted", move |ctx| {
        ctx.spawn("sleep 30")?;
        signal.trigger(libc::SIGINT);
        Ok(Outcome::Pass)
    });
    let flag = Rc::clone(&ran_after);
    suite.check("never", move |_ctx| {
        flag.set(true);
        Ok(Outcome::Pass)
    });

    let pipeline = Pipeline::new(suite, fixture.config(), fixture.submission.path())
        .unwrap()
        .shutdown(shutdown);
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, HarnessError::Interrupted(sig) if sig == libc::SIGINT));
    assert!(!ran_after.get());
    assert!(fixture.staging_is_empty());
}

#[test]
fn test_invalid_suite_is_rejected_up_front() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("a", |_ctx| Ok(Outcome::Pass)).depends_on("ghost");

    let err = Pipeline::new(suite, fixture.config(), fixture.submission.path()).unwrap_err();
    assert!(matches!(err, HarnessError::Suite(_)));
}

#[test]
fn test_data_and_log_survive_into_result() {
    let fixture = Fixture::new();

    let mut suite = CheckSuite::new();
    suite.check("annotates", |ctx| {
        ctx.log("looked around");
        ctx.set_data("answer", 42);
        Ok(Outcome::Pass)
    });
    suite
        .check("reads-back", |ctx| {
            let earlier = ctx.result_of("annotates").expect("earlier result visible");
            Ok(match earlier.data.get("answer") {
                Some(value) if value == 42 => Outcome::Pass,
                _ => Outcome::fail("data not visible"),
            })
        })
        .depends_on("annotates");

    let results = fixture.run(suite);
    assert_eq!(results[0].log, vec!["looked around".to_string()]);
    assert_eq!(results[1].status, CheckStatus::Pass);
}

fn write_manifest(dir: &Path, json: &str) -> std::path::PathBuf {
    let path = dir.join("checks.json");
    fs::write(&path, json).unwrap();
    path
}

#[test]
fn test_manifest_suite_end_to_end() {
    let fixture = Fixture::new();
    fs::write(
        fixture.submission.path().join("greet.sh"),
        "read -p 'Name: ' name\necho \"hello, $name\"\n",
    )
    .unwrap();

    let suite_dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        suite_dir.path(),
        r#"{
          "checks": [
            {"name": "exists", "require": ["greet.sh"]},
            {"name": "greets", "depends_on": "exists",
             "steps": [
               {"step": "spawn", "command": "bash greet.sh"},
               {"step": "stdin", "line": "Ada"},
               {"step": "stdout", "pattern": "hello, Ada\n"},
               {"step": "exit", "code": 0}
             ]},
            {"name": "wrong", "depends_on": "exists",
             "steps": [
               {"step": "spawn", "command": "bash greet.sh"},
               {"step": "stdin", "line": "Ada"},
               {"step": "stdout", "literal": "goodbye\n", "help": "say hello"}
             ]}
          ]
        }"#,
    );

    let suite = CheckManifest::load(&manifest).unwrap().into_suite().unwrap();
    let results = fixture.run(suite);
    assert_eq!(
        statuses(&results),
        vec![
            ("exists", CheckStatus::Pass),
            ("greets", CheckStatus::Pass),
            ("wrong", CheckStatus::Fail),
        ]
    );
    assert_eq!(
        results[1].log,
        vec![
            "running bash greet.sh...".to_string(),
            "sending input Ada...".to_string(),
            "checking for output \"hello, Ada\n\"...".to_string(),
            "checking that program exited with status 0...".to_string(),
        ]
    );
    assert_eq!(results[2].help.as_deref(), Some("say hello"));
    assert!(results[2].mismatch().is_some());
    assert!(fixture.staging_is_empty());
}

/// Stand-in memory checker: skips its own options, optionally writes a
/// report with the same leak twice, then runs the command after `--`.
fn fake_memcheck(dir: &Path, writes_report: bool) -> MemcheckConfig {
    let report = if writes_report {
        r#"cat > "$report" <<XML
<?xml version="1.0"?>
<valgrindoutput>
  <error>
    <kind>Leak_DefinitelyLost</kind>
    <xwhat><text>8 bytes lost</text></xwhat>
    <stack>
      <frame><obj>/usr/lib/libc.so.6</obj><fn>malloc</fn></frame>
      <frame><obj>$PWD/leaky</obj><fn>main</fn><file>p.c</file><line>3</line></frame>
    </stack>
  </error>
  <error>
    <kind>Leak_DefinitelyLost</kind>
    <xwhat><text>8 bytes lost</text></xwhat>
    <stack>
      <frame><obj>$PWD/leaky</obj><fn>main</fn><file>p.c</file><line>3</line></frame>
    </stack>
  </error>
</valgrindoutput>
XML
"#
    } else {
        ""
    };
    let script = format!(
        r#"report=
while [ "$1" != "--" ]; do
  case "$1" in --xml-file=*) report="${{1#--xml-file=}}" ;; esac
  shift
done
shift
{}exec "$@"
"#,
        report
    );
    let path = dir.join(if writes_report { "leaky-memcheck.sh" } else { "silent-memcheck.sh" });
    fs::write(&path, script).unwrap();

    // Run through sh so the script needs no exec bit.
    MemcheckConfig {
        binary: "sh".to_string(),
        args: vec![path.display().to_string()],
        ..MemcheckConfig::default()
    }
}

fn leak_suite() -> CheckSuite {
    let mut suite = CheckSuite::new();
    suite
        .check("no-leaks", |ctx| {
            ctx.spawn("true")?.exit(0)?;
            Ok(Outcome::Pass)
        })
        .leak_check();
    suite
}

#[test]
fn test_leak_report_turns_pass_into_fail() {
    let fixture = Fixture::new();
    let tools = tempfile::tempdir().unwrap();
    let config = RunConfig {
        memcheck: fake_memcheck(tools.path(), true),
        ..fixture.config()
    };

    let pipeline = Pipeline::new(leak_suite(), config, fixture.submission.path())
        .unwrap()
        .shutdown(ShutdownSignal::manual());
    let results = pipeline.run().unwrap();

    let result = &results[0];
    assert_eq!(result.status, CheckStatus::Fail);
    assert_eq!(result.rationale.as_ref().unwrap().to_string(), LEAK_RATIONALE);
    assert_eq!(result.log[0], "running valgrind true...");
    assert!(result
        .log
        .contains(&"checking for valgrind errors...".to_string()));
    let located: Vec<&String> = result
        .log
        .iter()
        .filter(|line| line.ends_with("(file: p.c, line: 3)"))
        .collect();
    assert_eq!(located, vec!["8 bytes lost: (file: p.c, line: 3)"]);
    assert!(fixture.staging_is_empty());
}

#[test]
fn test_missing_leak_report_skips() {
    let fixture = Fixture::new();
    let tools = tempfile::tempdir().unwrap();
    let config = RunConfig {
        memcheck: fake_memcheck(tools.path(), false),
        ..fixture.config()
    };

    let pipeline = Pipeline::new(leak_suite(), config, fixture.submission.path())
        .unwrap()
        .shutdown(ShutdownSignal::manual());
    let results = pipeline.run().unwrap();

    assert_eq!(results[0].status, CheckStatus::Skip);
    assert_eq!(
        results[0].rationale.as_ref().unwrap().to_string(),
        ERRORED_RATIONALE
    );
}

#[test]
fn test_replace_fn_rewrites_calls_in_staging_copy() {
    let fixture = Fixture::new();
    fs::write(
        fixture.submission.path().join("caesar.s"),
        "\tcallq\t_get_string\n\tcallq\tget_string_len\n\tcallq\tget_string\n",
    )
    .unwrap();

    let mut suite = CheckSuite::new();
    suite.check("swaps", |ctx| {
        let rewritten = ctx.replace_fn("get_string", "fake_get_string", "caesar.s")?;
        ctx.set_data("rewritten", rewritten);
        let asm = fs::read_to_string(ctx.path("caesar.s"))?;
        Ok(
            if asm == "\tcallq\t_fake_get_string\n\tcallq\tget_string_len\n\tcallq\tfake_get_string\n" {
                Outcome::Pass
            } else {
                Outcome::fail(asm)
            },
        )
    });

    let results = fixture.run(suite);
    assert_eq!(results[0].status, CheckStatus::Pass);
    assert_eq!(results[0].data["rewritten"], 2);
    // Only the staging copy changes
    assert_eq!(
        fs::read_to_string(fixture.submission.path().join("caesar.s")).unwrap(),
        "\tcallq\t_get_string\n\tcallq\tget_string_len\n\tcallq\tget_string\n"
    );
}
