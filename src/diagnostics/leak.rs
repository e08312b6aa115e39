//! Memcheck XML report aggregation.
//!
//! Each `<error>` becomes one [`LeakEntry`]. The first stack frame whose
//! object file sits directly in the check directory (the program under
//! test, not a system library) provides the source location. Entries are
//! deduplicated by their rendered message, first seen wins.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use thiserror::Error;

use crate::verdict::outcome::Outcome;
use crate::verdict::result::CheckLog;

/// Rationale recorded when the memory checker reported errors
pub const LEAK_RATIONALE: &str = "valgrind tests failed; rerun with --log for more information.";

#[derive(Error, Debug)]
pub enum LeakError {
    #[error("Failed to read leak report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed leak report: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Malformed leak report: {0}")]
    Malformed(String),
}

/// Source position inside the program under test
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeakEntry {
    /// e.g. `Leak_DefinitelyLost`, `InvalidRead`
    pub kind: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl LeakEntry {
    pub fn is_leak(&self) -> bool {
        self.kind.starts_with("Leak_")
    }

    /// Message as logged, with the location suffix when known
    pub fn render(&self) -> String {
        match &self.location {
            Some(loc) => format!("{}: (file: {}, line: {})", self.message, loc.file, loc.line),
            None => self.message.clone(),
        }
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// First frame whose object lives directly in `check_dir`
fn localize(error: Node, check_dir: &Path) -> Option<SourceLocation> {
    let stack = child(error, "stack")?;
    let frame = stack.children().filter(|n| n.has_tag_name("frame")).find(|frame| {
        child_text(*frame, "obj")
            .and_then(|obj| Path::new(obj).parent())
            .map(|dir| canonical(dir) == check_dir)
            .unwrap_or(false)
    })?;
    Some(SourceLocation {
        file: child_text(frame, "file")?.to_string(),
        line: child_text(frame, "line")?.to_string(),
    })
}

fn parse_error(error: Node, check_dir: &Path) -> Result<LeakEntry, LeakError> {
    let kind = child_text(error, "kind")
        .ok_or_else(|| LeakError::Malformed("error without <kind>".to_string()))?
        .trim()
        .to_string();

    let message = if kind.starts_with("Leak_") {
        child(error, "xwhat").and_then(|x| child_text(x, "text"))
    } else {
        child_text(error, "what")
    }
    .ok_or_else(|| LeakError::Malformed(format!("{} error without a message", kind)))?
    .trim()
    .to_string();

    Ok(LeakEntry {
        kind,
        message,
        location: localize(error, check_dir),
    })
}

/// Parse report text, deduplicating by rendered message
pub fn parse_str(xml: &str, check_dir: &Path) -> Result<Vec<LeakEntry>, LeakError> {
    let doc = Document::parse(xml)?;
    let check_dir = canonical(check_dir);

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for error in doc.root_element().children().filter(|n| n.has_tag_name("error")) {
        let entry = parse_error(error, &check_dir)?;
        if seen.insert(entry.render()) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

pub fn parse_report(report: &Path, check_dir: &Path) -> Result<Vec<LeakEntry>, LeakError> {
    let xml = std::fs::read_to_string(report).map_err(|source| LeakError::Io {
        path: report.to_path_buf(),
        source,
    })?;
    let entries = parse_str(&xml, check_dir)?;
    log::debug!(
        "Parsed {} memcheck entries from {}",
        entries.len(),
        report.display()
    );
    Ok(entries)
}

/// Deduplicated entries for one check
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub entries: Vec<LeakEntry>,
}

impl LeakReport {
    pub fn load(report: &Path, check_dir: &Path) -> Result<Self, LeakError> {
        Ok(Self {
            entries: parse_report(report, check_dir)?,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// FAIL when anything was reported; every message goes to the log
    pub fn into_outcome(self, log: &CheckLog) -> Outcome {
        if self.is_clean() {
            return Outcome::Pass;
        }
        log.extend(self.entries.iter().map(LeakEntry::render));
        Outcome::fail(LEAK_RATIONALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(dir: &Path) -> String {
        let d = dir.display();
        format!(
            r#"<?xml version="1.0"?>
<valgrindoutput>
  <protocolversion>4</protocolversion>
  <error>
    <unique>0x0</unique>
    <kind>InvalidRead</kind>
    <what>Invalid read of size 4</what>
    <stack>
      <frame><ip>0x1</ip><obj>/usr/lib/x86_64-linux-gnu/libc.so.6</obj><file>strlen.S</file><line>10</line></frame>
      <frame><ip>0x2</ip><obj>{d}/speller</obj><fn>load</fn><file>dictionary.c</file><line>42</line></frame>
    </stack>
  </error>
  <error>
    <unique>0x1</unique>
    <kind>Leak_DefinitelyLost</kind>
    <xwhat><text>56 bytes in 1 blocks are definitely lost in loss record 1 of 1</text><leakedbytes>56</leakedbytes></xwhat>
    <stack>
      <frame><ip>0x3</ip><obj>/usr/libexec/valgrind/vgpreload_memcheck.so</obj><fn>malloc</fn></frame>
      <frame><ip>0x4</ip><obj>{d}/speller</obj><fn>load</fn><file>dictionary.c</file><line>17</line></frame>
    </stack>
  </error>
  <error>
    <unique>0x2</unique>
    <kind>InvalidRead</kind>
    <what>Invalid read of size 4</what>
    <stack>
      <frame><ip>0x5</ip><obj>{d}/speller</obj><fn>load</fn><file>dictionary.c</file><line>42</line></frame>
    </stack>
  </error>
  <error>
    <unique>0x3</unique>
    <kind>InvalidFree</kind>
    <what>Invalid free() / delete / delete[] / realloc()</what>
    <stack>
      <frame><ip>0x6</ip><obj>/usr/lib/libc.so.6</obj><file>free.c</file><line>3</line></frame>
    </stack>
  </error>
</valgrindoutput>
"#
        )
    }

    #[test]
    fn test_dedupe_and_localize() {
        let dir = tempfile::tempdir().unwrap();
        let entries = parse_str(&report(dir.path()), dir.path()).unwrap();
        let rendered: Vec<String> = entries.iter().map(LeakEntry::render).collect();
        assert_eq!(
            rendered,
            vec![
                "Invalid read of size 4: (file: dictionary.c, line: 42)",
                "56 bytes in 1 blocks are definitely lost in loss record 1 of 1: (file: dictionary.c, line: 17)",
                "Invalid free() / delete / delete[] / realloc()",
            ]
        );
        assert!(entries[1].is_leak());
    }

    #[test]
    fn test_outside_frames_never_localize() {
        let dir = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let entries = parse_str(&report(other.path()), dir.path()).unwrap();
        assert!(entries.iter().all(|e| e.location.is_none()));
    }

    #[test]
    fn test_clean_report_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valgrind.xml");
        std::fs::write(&path, "<valgrindoutput><status><state>FINISHED</state></status></valgrindoutput>").unwrap();
        let report = LeakReport::load(&path, dir.path()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.into_outcome(&CheckLog::new()), Outcome::Pass);
    }

    #[test]
    fn test_dirty_report_fails_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valgrind.xml");
        std::fs::write(&path, report(dir.path())).unwrap();
        let log = CheckLog::new();
        let outcome = LeakReport::load(&path, dir.path()).unwrap().into_outcome(&log);
        assert_eq!(outcome, Outcome::fail(LEAK_RATIONALE));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_missing_or_broken_report() {
        let dir = tempfile::tempdir().unwrap();
        let missing = parse_report(&dir.path().join("valgrind.xml"), dir.path());
        assert!(matches!(missing, Err(LeakError::Io { .. })));
        assert!(matches!(parse_str("<valgrindoutput>", dir.path()), Err(LeakError::Xml(_))));
        assert!(matches!(
            parse_str("<valgrindoutput><error><what>x</what></error></valgrindoutput>", dir.path()),
            Err(LeakError::Malformed(_))
        ));
    }
}
