/// Per-run and per-check state handed to check bodies
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use regex::{Captures, Regex};

use crate::config::settings::{RunConfig, Timeouts};
use crate::config::types::{CheckError, CheckStatus};
use crate::exec::child::Child;
use crate::exec::command::CommandSpec;
use crate::exec::expect::Expected;
use crate::kernel::signal::ShutdownSignal;
use crate::pipeline::registry::CheckDescriptor;
use crate::safety::staging::copy_tree;
use crate::verdict::outcome::{Failure, Outcome};
use crate::verdict::result::{CheckLog, CheckResult};

/// Results of the current run, written only by the pipeline in execution order
#[derive(Debug, Default)]
pub struct PipelineContext {
    order: Vec<String>,
    results: HashMap<String, CheckResult>,
}

impl PipelineContext {
    pub fn new(order: Vec<String>) -> Self {
        Self {
            order,
            results: HashMap::new(),
        }
    }

    /// Check names in declaration order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn result(&self, name: &str) -> Option<&CheckResult> {
        self.results.get(name)
    }

    pub fn status(&self, name: &str) -> Option<CheckStatus> {
        self.result(name).map(|r| r.status)
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn record(&mut self, result: CheckResult) {
        self.results.insert(result.name.clone(), result);
    }
}

/// Everything a check body may touch. Relative paths resolve against the
/// check's staging directory; the harness's own cwd never changes.
pub struct CheckContext<'a> {
    descriptor: &'a CheckDescriptor,
    dir: PathBuf,
    resources: Option<&'a Path>,
    pipeline: &'a PipelineContext,
    config: &'a RunConfig,
    shutdown: ShutdownSignal,
    log: CheckLog,
    data: BTreeMap<String, serde_json::Value>,
    children: Vec<Child>,
}

impl<'a> CheckContext<'a> {
    pub(crate) fn new(
        descriptor: &'a CheckDescriptor,
        dir: PathBuf,
        resources: Option<&'a Path>,
        pipeline: &'a PipelineContext,
        config: &'a RunConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            descriptor,
            dir,
            resources,
            pipeline,
            config,
            shutdown,
            log: CheckLog::new(),
            data: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CheckDescriptor {
        self.descriptor
    }

    /// Staging directory of this check
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.join(relative)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.config.timeouts
    }

    pub fn log(&self, line: impl Into<String>) {
        self.log.push(line);
    }

    pub fn check_log(&self) -> &CheckLog {
        &self.log
    }

    /// Attach structured data to the result
    pub fn set_data(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.data.insert(key.to_string(), value.into());
    }

    /// Result of an earlier check in this run
    pub fn result_of(&self, name: &str) -> Option<&CheckResult> {
        self.pipeline.result(name)
    }

    pub fn spawn(&mut self, command: &str) -> std::result::Result<Child, CheckError> {
        self.spawn_spec(CommandSpec::new(command))
    }

    pub fn spawn_with_env<K, V>(
        &mut self,
        command: &str,
        env: impl IntoIterator<Item = (K, V)>,
    ) -> std::result::Result<Child, CheckError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.spawn_spec(CommandSpec::new(command).envs(env))
    }

    /// Spawn in the staging directory, under the memory checker when the
    /// check asks for leak checking
    pub fn spawn_spec(&mut self, spec: CommandSpec) -> std::result::Result<Child, CheckError> {
        let mut spec = spec.workdir(&self.dir).shell(self.config.shell.as_str());
        if self.descriptor.leak_check {
            self.log(format!("running valgrind {}...", spec.command()));
            let report = self.path(&self.config.memcheck.report_name);
            spec = spec.memcheck(&self.config.memcheck, report);
        } else {
            self.log(format!("running {}...", spec.command()));
        }

        let child = Child::spawn(
            &spec,
            self.log.clone(),
            self.config.timeouts,
            self.shutdown.clone(),
        )
        .map_err(|e| anyhow::Error::new(e).context(format!("failed to run {}", spec.command())))?;
        self.children.push(child.clone());
        Ok(child)
    }

    /// Fail unless every path exists
    pub fn require<P: AsRef<Path>>(&self, paths: &[P]) -> std::result::Result<(), Failure> {
        for path in paths {
            let path = path.as_ref();
            self.log(format!("checking that {} exists...", path.display()));
            if !self.path(path).exists() {
                return Err(Failure::new(format!("{} not found", path.display())));
            }
        }
        Ok(())
    }

    /// Copy files or directories from the resource directory into the staging directory
    pub fn add<P: AsRef<Path>>(&self, paths: &[P]) -> std::result::Result<(), CheckError> {
        let resources = self
            .resources
            .ok_or_else(|| anyhow!("no resource directory configured"))?;
        for path in paths {
            let path = path.as_ref();
            let source = resources.join(path);
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("cannot add {}: no file name", path.display()))?;
            let target = self.dir.join(name);

            if source.is_dir() {
                copy_tree(&source, &target)
                    .with_context(|| format!("failed to add {}", path.display()))?;
            } else {
                fs::copy(&source, &target)
                    .with_context(|| format!("failed to add {}", path.display()))?;
            }
            log::debug!("Added {} to {}", source.display(), self.dir.display());
        }
        Ok(())
    }

    /// Append a newline and the content of `codefile` to `original`
    pub fn append_file(
        &self,
        original: impl AsRef<Path>,
        codefile: impl AsRef<Path>,
    ) -> std::result::Result<(), CheckError> {
        let code = fs::read_to_string(self.path(codefile.as_ref()))
            .with_context(|| format!("failed to read {}", codefile.as_ref().display()))?;
        let mut target = fs::OpenOptions::new()
            .append(true)
            .open(self.path(original.as_ref()))
            .with_context(|| format!("failed to open {}", original.as_ref().display()))?;
        target.write_all(b"\n")?;
        target.write_all(code.as_bytes())?;
        Ok(())
    }

    /// Point every `callq` to `old_fn` in an assembly file at `new_fn` instead.
    /// Returns how many calls were rewritten.
    pub fn replace_fn(
        &self,
        old_fn: &str,
        new_fn: &str,
        path: impl AsRef<Path>,
    ) -> std::result::Result<usize, CheckError> {
        let path = self.path(path.as_ref());
        let asm = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        // An optional leading underscore covers Mach-O symbol names.
        let call = Regex::new(&format!(r"(callq\t_?){}\b", regex::escape(old_fn)))
            .with_context(|| format!("cannot match calls to {}", old_fn))?;

        let mut replaced = 0;
        let rewritten = call.replace_all(&asm, |caps: &Captures| {
            replaced += 1;
            format!("{}{}", &caps[1], new_fn)
        });
        fs::write(&path, rewritten.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::debug!(
            "Rewrote {} calls from {} to {} in {}",
            replaced,
            old_fn,
            new_fn,
            path.display()
        );
        Ok(replaced)
    }

    /// Content of a file in the staging directory as an exact expectation
    pub fn read_expected(&self, path: impl AsRef<Path>) -> std::result::Result<Expected, CheckError> {
        let content = fs::read_to_string(self.path(path.as_ref()))
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Ok(Expected::literal(content))
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    /// First latched failure among spawned children
    pub(crate) fn first_child_failure(&self) -> Option<Failure> {
        self.children.iter().find_map(Child::failure)
    }

    pub(crate) fn kill_children(&self) {
        for child in &self.children {
            child.kill();
        }
    }

    pub(crate) fn finish(mut self, outcome: Outcome) -> CheckResult {
        self.kill_children();
        let data = std::mem::take(&mut self.data);
        CheckResult::from_outcome(
            &self.descriptor.name,
            self.descriptor.description.as_deref(),
            outcome,
            self.log.entries(),
            data,
        )
    }
}

impl Drop for CheckContext<'_> {
    fn drop(&mut self) {
        self.kill_children();
    }
}
