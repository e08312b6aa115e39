//! Interactive handle on one spawned program.
//!
//! Every assertion returns `Result<Child, Failure>` so a check reads as a
//! chain of `?`-terminated calls. The first failure is latched: later calls
//! on the same child (or any clone of it) return that failure unchanged.
//!
//! Waiting is a polling loop over the non-blocking pty master with a
//! wall-clock deadline. Once a wait completes the whole process group is
//! killed, so output assertions describe a finished program.

use std::cell::RefCell;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::config::settings::Timeouts;
use crate::config::types::{Lifecycle, Result};
use crate::exec::command::CommandSpec;
use crate::exec::expect::{normalize_output, Expected};
use crate::kernel::pty::{PseudoTerminal, ReadState};
use crate::kernel::signal::ShutdownSignal;
use crate::verdict::outcome::{Failure, FailureKind};
use crate::verdict::result::CheckLog;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the exit status once the terminal has hung up
const EXIT_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 1024;

pub const PROMPT_MISSING: &str = "expected prompt for input, found none";
pub const EXIT_TIMEOUT: &str = "timed out while waiting for program to exit";
pub const NOT_REJECTED: &str = "expected program to reject input, but it did not";
pub const INVALID_TEXT: &str = "output not valid UTF-8 text";
pub const CONDITION_UNMET: &str = "program did not meet the expected condition";

/// Result of one assertion on a child
pub type Step<T = Child> = std::result::Result<T, Failure>;

/// One unit of input for the program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A line; the trailing newline is added on send
    Line(String),
    /// The terminal's end-of-file character
    Eof,
}

impl From<&str> for Input {
    fn from(line: &str) -> Self {
        Input::Line(line.to_string())
    }
}

impl From<String> for Input {
    fn from(line: String) -> Self {
        Input::Line(line)
    }
}

/// Crash signals reported as a failed execution
fn crash_description(signal: i32) -> Option<&'static str> {
    match signal {
        libc::SIGSEGV => Some("segmentation fault"),
        libc::SIGBUS => Some("bus error"),
        libc::SIGFPE => Some("floating point exception"),
        libc::SIGILL => Some("illegal instruction"),
        libc::SIGABRT => Some("abort"),
        _ => None,
    }
}

/// Tracks how far a growing byte buffer is known to be valid UTF-8
#[derive(Default)]
struct Utf8Progress {
    checked: usize,
}

impl Utf8Progress {
    /// False once an invalid sequence is seen. A truncated sequence at the
    /// end is fine, the rest may still be in flight.
    fn advance(&mut self, bytes: &[u8]) -> bool {
        match std::str::from_utf8(&bytes[self.checked..]) {
            Ok(_) => {
                self.checked = bytes.len();
                true
            }
            Err(e) if e.error_len().is_none() => {
                self.checked += e.valid_up_to();
                true
            }
            Err(_) => false,
        }
    }
}

struct ChildState {
    process: std::process::Child,
    terminal: PseudoTerminal,
    command: String,
    output: String,
    /// Bytes read by a wait that timed out, not yet consumed
    pending: Vec<u8>,
    status: Option<ExitStatus>,
    lifecycle: Lifecycle,
    group_killed: bool,
    failure: Option<Failure>,
}

impl ChildState {
    fn pid(&self) -> i32 {
        self.process.id() as i32
    }

    /// Non-blocking reap. True once the process has terminated.
    fn poll_exit(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        match self.process.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::warn!("try_wait(pid {}): {}", self.pid(), e);
                false
            }
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        self.status = Some(status);
        if self.lifecycle == Lifecycle::Running {
            self.lifecycle = Lifecycle::Exited;
        }
        log::debug!("pid {} finished with {}", self.pid(), status);
    }

    fn reap_within(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while !self.poll_exit() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Kill the whole process group and reap the leader
    fn terminate(&mut self) {
        let pid = self.pid();
        if !self.group_killed {
            self.group_killed = true;
            // The child is a session leader, so its pgid equals its pid.
            let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if rc != 0 && self.status.is_none() {
                let _ = self.process.kill();
            }
        }
        if self.poll_exit() {
            return;
        }
        match self.process.wait() {
            Ok(status) => {
                self.lifecycle = Lifecycle::Killed;
                self.record_exit(status);
                log::debug!("Killed pid {} ({})", pid, self.command);
            }
            Err(e) => log::warn!("wait(pid {}): {}", pid, e),
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    fn signal(&self) -> Option<i32> {
        self.status.and_then(|s| s.signal())
    }

    /// Crash description when the program died on its own from a crash signal.
    /// Exit codes are never reinterpreted: `exit(139)` is a plain exit.
    fn crash(&self) -> Option<&'static str> {
        if self.lifecycle == Lifecycle::Killed {
            return None;
        }
        self.signal().and_then(crash_description)
    }

    /// Core polling loop; does not touch the failure latch
    fn collect(&mut self, timeout: Duration, shutdown: &ShutdownSignal) -> Step<()> {
        let deadline = Instant::now() + timeout;
        let mut bytes = std::mem::take(&mut self.pending);
        let mut utf8 = Utf8Progress::default();
        let mut buf = [0u8; READ_CHUNK];
        let mut hung_up = false;

        loop {
            if let Some(sig) = shutdown.requested() {
                self.pending = bytes;
                return Err(interrupted(sig));
            }
            if self.poll_exit() {
                break;
            }
            match self.terminal.read_available(&mut buf) {
                Ok(ReadState::Data(n)) => {
                    bytes.extend_from_slice(&buf[..n]);
                    if !utf8.advance(&bytes) {
                        self.terminate();
                        return Err(Failure::with_kind(FailureKind::Encoding, INVALID_TEXT));
                    }
                }
                Ok(ReadState::Empty) => std::thread::sleep(POLL_INTERVAL),
                Ok(ReadState::Closed) => {
                    hung_up = true;
                    break;
                }
                Err(e) => {
                    self.terminate();
                    return Err(Failure::new(format!("failed to read program output: {}", e)));
                }
            }
            if Instant::now() >= deadline && !self.poll_exit() {
                self.pending = bytes;
                return Err(Failure::timeout(EXIT_TIMEOUT));
            }
        }

        // Drain whatever the program wrote before going away.
        while let Ok(ReadState::Data(n)) = self.terminal.read_available(&mut buf) {
            bytes.extend_from_slice(&buf[..n]);
        }
        if hung_up {
            self.reap_within(EXIT_GRACE);
        }
        self.terminate();

        let text = String::from_utf8(bytes)
            .map_err(|_| Failure::with_kind(FailureKind::Encoding, INVALID_TEXT))?;
        self.output = normalize_output(&text);

        if let Some(description) = self.crash() {
            return Err(Failure::with_kind(
                FailureKind::Crash,
                format!("failed to execute program due to {}", description),
            ));
        }
        Ok(())
    }

    /// Wait for any sign of a prompt. Prompt bytes are consumed.
    fn await_prompt(&mut self, timeout: Duration, shutdown: &ShutdownSignal) -> Step<()> {
        if !self.pending.is_empty() {
            self.pending.clear();
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(sig) = shutdown.requested() {
                return Err(interrupted(sig));
            }
            let exited = self.poll_exit();
            match self.terminal.read_available(&mut buf) {
                Ok(ReadState::Data(_)) if !exited => return Ok(()),
                Ok(ReadState::Empty) if !exited => {}
                _ => return Err(Failure::new(PROMPT_MISSING)),
            }
            if Instant::now() >= deadline {
                return Err(Failure::new(PROMPT_MISSING));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for ChildState {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn interrupted(signal: i32) -> Failure {
    Failure::with_kind(
        FailureKind::Interrupted,
        format!("interrupted by signal {}", signal),
    )
}

/// Handle on a running (or finished) program.
///
/// Clones share the same process and failure latch.
#[derive(Clone)]
pub struct Child {
    state: Rc<RefCell<ChildState>>,
    log: CheckLog,
    timeouts: Timeouts,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for Child {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Child")
            .field("pid", &state.pid())
            .field("command", &state.command)
            .field("lifecycle", &state.lifecycle)
            .field("failed", &state.failure.is_some())
            .finish()
    }
}

impl Child {
    /// Spawn `spec` on a fresh pty
    pub fn spawn(
        spec: &CommandSpec,
        log: CheckLog,
        timeouts: Timeouts,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let spawned = spec.spawn()?;
        let state = ChildState {
            process: spawned.process,
            terminal: spawned.terminal,
            command: spec.command().to_string(),
            output: String::new(),
            pending: Vec::new(),
            status: None,
            lifecycle: Lifecycle::Running,
            group_killed: false,
            failure: None,
        };
        Ok(Self {
            state: Rc::new(RefCell::new(state)),
            log,
            timeouts,
            shutdown,
        })
    }

    fn guard(&self) -> Step<()> {
        match &self.state.borrow().failure {
            Some(first) => Err(first.clone()),
            None => Ok(()),
        }
    }

    /// Latch `failure` unless an earlier one is already latched; return the latched one
    fn latch(&self, failure: Failure) -> Failure {
        let mut state = self.state.borrow_mut();
        match &state.failure {
            Some(first) => first.clone(),
            None => {
                log::debug!("pid {} failed: {}", state.pid(), failure);
                state.failure = Some(failure.clone());
                failure
            }
        }
    }

    /// Send a line after the program prompts for it
    pub fn stdin(self, input: impl Into<Input>) -> Step {
        let timeout = self.timeouts.prompt();
        self.stdin_with(input, true, timeout)
    }

    /// Send a line without waiting for a prompt
    pub fn stdin_no_prompt(self, input: impl Into<Input>) -> Step {
        let timeout = self.timeouts.prompt();
        self.stdin_with(input, false, timeout)
    }

    pub fn stdin_with(
        self,
        input: impl Into<Input>,
        prompt: bool,
        timeout: Duration,
    ) -> Step {
        self.guard()?;
        let input = input.into();
        match &input {
            Input::Line(line) => self.log.push(format!("sending input {}...", line)),
            Input::Eof => self.log.push("sending EOF..."),
        }

        let result = {
            let mut state = self.state.borrow_mut();
            let prompted = if prompt {
                state.await_prompt(timeout, &self.shutdown)
            } else {
                Ok(())
            };
            let sent = prompted.and_then(|()| {
                let sent = match &input {
                    Input::Line(line) => {
                        let mut bytes = line.clone().into_bytes();
                        bytes.push(b'\n');
                        state.terminal.send(&bytes)
                    }
                    Input::Eof => state.terminal.send_eof(),
                };
                sent.map_err(|e| Failure::new(format!("failed to send input to program: {}", e)))
            });
            sent
        };
        match result {
            Ok(()) => Ok(self),
            Err(failure) => Err(self.latch(failure)),
        }
    }

    /// Wait for the program to finish, then compare its output
    pub fn stdout(self, expected: impl Into<Expected>) -> Step {
        let timeout = self.timeouts.stdout();
        self.stdout_within(Some(expected.into()), timeout)
    }

    pub fn stdout_within(
        self,
        expected: Option<Expected>,
        timeout: Duration,
    ) -> Step {
        let child = self.wait(timeout)?;
        match expected {
            Some(expected) => child.expect_output(expected),
            None => Ok(child),
        }
    }

    /// Compare the collected output without waiting
    pub fn expect_output(self, expected: impl Into<Expected>) -> Step {
        self.guard()?;
        let expected = expected.into();
        self.log.push(expected.log_line());
        let checked = expected.check(&self.state.borrow().output);
        match checked {
            Ok(()) => Ok(self),
            Err(failure) => Err(self.latch(failure)),
        }
    }

    /// Succeeds when the program is still running at the deadline
    pub fn reject(self) -> Step {
        let timeout = self.timeouts.reject();
        self.reject_within(timeout)
    }

    pub fn reject_within(self, timeout: Duration) -> Step {
        self.guard()?;
        self.log.push("checking that input was rejected...");
        let collected = self.state.borrow_mut().collect(timeout, &self.shutdown);
        match collected {
            Err(failure) if failure.is_timeout() => Ok(self),
            Err(failure) => Err(self.latch(failure)),
            Ok(()) => Err(self.latch(Failure::new(NOT_REJECTED))),
        }
    }

    /// Wait for the program to exit with `code`
    pub fn exit(self, code: i32) -> Step {
        let timeout = self.timeouts.exit();
        self.exit_within(code, timeout)
    }

    pub fn exit_within(self, code: i32, timeout: Duration) -> Step {
        let child = self.wait(timeout)?;
        child
            .log
            .push(format!("checking that program exited with status {}...", code));
        let actual = child.state.borrow().exit_code();
        if actual == Some(code) {
            return Ok(child);
        }
        let actual = match actual {
            Some(actual) => actual.to_string(),
            None => match child.signal() {
                Some(sig) => format!("signal {}", sig),
                None => "none".to_string(),
            },
        };
        Err(child.latch(Failure::new(format!(
            "expected exit code {}, not {}",
            code, actual
        ))))
    }

    /// Wait for the program to exit and return its exit code
    pub fn exit_code(self) -> Step<i32> {
        let timeout = self.timeouts.exit();
        self.exit_code_within(timeout)
    }

    pub fn exit_code_within(self, timeout: Duration) -> Step<i32> {
        let child = self.wait(timeout)?;
        let code = child.state.borrow().exit_code();
        match code {
            Some(code) => Ok(code),
            None => {
                let sig = child.signal().unwrap_or_default();
                Err(child.latch(Failure::new(format!(
                    "program was terminated by signal {}",
                    sig
                ))))
            }
        }
    }

    /// Collect output until the program terminates or `timeout` elapses
    pub fn wait(self, timeout: Duration) -> Step {
        self.guard()?;
        let collected = self.state.borrow_mut().collect(timeout, &self.shutdown);
        match collected {
            Ok(()) => Ok(self),
            Err(failure) => Err(self.latch(failure)),
        }
    }

    /// `wait` with the configured default timeout
    pub fn wait_default(self) -> Step {
        let timeout = self.timeouts.wait();
        self.wait(timeout)
    }

    /// Latch a failure unless `condition` holds for this child
    pub fn on(self, condition: impl FnOnce(&Child) -> bool) -> Step {
        self.guard()?;
        if condition(&self) {
            return Ok(self);
        }
        Err(self.latch(Failure::new(CONDITION_UNMET)))
    }

    /// Attach a hint to the latched failure; no-op unless failed
    pub fn help(self, message: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            if let Some(failure) = state.failure.take() {
                state.failure = Some(failure.help(message));
            }
        }
        self
    }

    /// Force-terminate the process group. Idempotent.
    pub fn kill(&self) {
        self.state.borrow_mut().terminate();
    }

    pub fn pid(&self) -> i32 {
        self.state.borrow().pid()
    }

    pub fn command(&self) -> String {
        self.state.borrow().command.clone()
    }

    /// Normalized output collected by the last completed wait
    pub fn output(&self) -> String {
        self.state.borrow().output.clone()
    }

    pub fn signal(&self) -> Option<i32> {
        self.state.borrow().signal()
    }

    pub fn failure(&self) -> Option<Failure> {
        self.state.borrow().failure.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.state.borrow().failure.is_some()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let mut state = self.state.borrow_mut();
        state.poll_exit();
        state.lifecycle
    }
}
