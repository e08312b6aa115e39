/// Command construction and spawning for interactive children
///
/// Every command runs as `<shell> -c <command>` on its own pseudo-terminal,
/// in a new session, with the check's staging directory as cwd.
use crate::config::settings::MemcheckConfig;
use crate::config::types::{HarnessError, Result};
use crate::kernel::pty::PseudoTerminal;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Quote `arg` for a POSIX shell, leaving safe words untouched
pub fn shell_quote(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let safe = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\"'\"'"))
    }
}

/// Join an argv into one shell command line
pub fn join_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Locate an executable on `PATH`
pub fn find_program(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Memory checker wrapping for one spawn
#[derive(Debug, Clone)]
struct MemcheckWrap {
    binary: String,
    args: Vec<String>,
    report: PathBuf,
}

/// Description of a child to spawn
#[derive(Debug, Clone)]
pub struct CommandSpec {
    command: String,
    env: Vec<(String, String)>,
    workdir: Option<PathBuf>,
    shell: String,
    memcheck: Option<MemcheckWrap>,
}

/// Freshly spawned process with the master side of its terminal
pub struct SpawnedProcess {
    pub process: std::process::Child,
    pub terminal: PseudoTerminal,
    pub command_line: String,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            workdir: None,
            shell: "bash".to_string(),
            memcheck: None,
        }
    }

    /// Build from an argv; arguments are shell-quoted
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        Self::new(join_args(args))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run the command under the memory checker, writing its XML report to `report`
    pub fn memcheck(mut self, config: &MemcheckConfig, report: impl Into<PathBuf>) -> Self {
        self.memcheck = Some(MemcheckWrap {
            binary: config.binary.clone(),
            args: config.args.clone(),
            report: report.into(),
        });
        self
    }

    /// The user-facing command, without any wrapping
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_memchecked(&self) -> bool {
        self.memcheck.is_some()
    }

    /// Command line handed to the shell
    pub fn command_line(&self) -> String {
        match &self.memcheck {
            None => self.command.clone(),
            Some(wrap) => {
                // exec, so the reaped process carries the checker's own status
                let mut parts = vec!["exec".to_string(), shell_quote(&wrap.binary)];
                parts.extend(wrap.args.iter().map(|a| shell_quote(a)));
                parts.push(shell_quote(&format!(
                    "--xml-file={}",
                    wrap.report.display()
                )));
                parts.push("--".to_string());
                parts.push(self.command.clone());
                parts.join(" ")
            }
        }
    }

    /// Spawn on a fresh pseudo-terminal
    pub fn spawn(&self) -> Result<SpawnedProcess> {
        let (terminal, slave) = PseudoTerminal::open()?;
        let command_line = self.command_line();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&command_line);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave));

        // SAFETY: only async-signal-safe calls between fork and exec.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                // Make the pty our controlling terminal so /dev/tty works.
                if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let process = cmd.spawn().map_err(|e| {
            HarnessError::Process(format!("spawn({} -c {}): {}", self.shell, command_line, e))
        })?;
        log::debug!("Spawned pid {} for '{}'", process.id(), command_line);

        Ok(SpawnedProcess {
            process,
            terminal,
            command_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("hello"), "hello");
        assert_eq!(shell_quote("./a.out"), "./a.out");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_join_args() {
        assert_eq!(join_args(&["./caesar", "13", "a b"]), "./caesar 13 'a b'");
    }

    #[test]
    fn test_memcheck_command_line() {
        let config = MemcheckConfig::default();
        let spec = CommandSpec::new("./speller texts/cat.txt")
            .memcheck(&config, "/tmp/stage/valgrind.xml");
        assert!(spec.is_memchecked());
        assert_eq!(
            spec.command_line(),
            "exec valgrind --show-leak-kinds=all --xml=yes --xml-file=/tmp/stage/valgrind.xml -- ./speller texts/cat.txt"
        );
        assert_eq!(spec.command(), "./speller texts/cat.txt");
    }

    #[test]
    fn test_find_program() {
        assert!(find_program("sh").is_some());
        assert!(find_program("definitely-not-a-real-program-xyz").is_none());
    }

    #[test]
    fn test_spawn_runs_in_workdir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("printf '%s' \"$GREETING\" > out.txt")
            .env("GREETING", "hi")
            .workdir(dir.path());
        let mut spawned = spec.spawn().unwrap();
        let status = spawned.process.wait().unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hi");
    }
}
