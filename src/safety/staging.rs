/// Run-scoped staging directories
///
/// Layout under the configured parent:
///
/// ```text
/// checkbox-<uuid>/
///   _/            pristine copy of the submission (base fixtures)
///   <check>/      one directory per executed check
/// ```
///
/// A check's directory is a copy of its dependency's directory after that
/// check ran, or of `_/` when it has no dependency. Directories are never
/// reused, so no two checks share a live directory.
use crate::config::types::{HarnessError, Result};
use crate::safety::safe_cleanup;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BASE_DIR: &str = "_";

/// Copy the contents of `src` into `dst`, preserving symlinks and modes
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| {
        HarnessError::Staging(format!("Cannot read {}: {}", src.display(), e))
    })?;
    if !meta.is_dir() {
        return Err(HarnessError::Staging(format!(
            "{} is not a directory",
            src.display()
        )));
    }
    fs::create_dir_all(dst).map_err(|e| {
        HarnessError::Staging(format!("Failed to create {}: {}", dst.display(), e))
    })?;
    fs::set_permissions(dst, meta.permissions())?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(&from)?;
            std::os::unix::fs::symlink(&target, &to)?;
        } else if file_type.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| {
                HarnessError::Staging(format!(
                    "Failed to copy {} to {}: {}",
                    from.display(),
                    to.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Owner of every staging directory created during one run
#[derive(Debug)]
pub struct StagingArea {
    run_id: String,
    root: PathBuf,
    cleaned: bool,
}

impl StagingArea {
    /// Create a fresh, uniquely named root under `parent`
    pub fn create(parent: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let root = parent.join(format!("checkbox-{}", run_id));

        fs::create_dir_all(&root).map_err(|e| {
            HarnessError::Staging(format!(
                "Failed to create staging root {}: {}",
                root.display(),
                e
            ))
        })?;
        log::debug!("Created staging root {}", root.display());

        Ok(Self {
            run_id,
            root,
            cleaned: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(BASE_DIR)
    }

    pub fn check_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Snapshot the submission as the base fixture set
    pub fn prepare_base(&self, submission: &Path) -> Result<PathBuf> {
        let base = self.base_dir();
        copy_tree(submission, &base).map_err(|e| {
            HarnessError::Staging(format!(
                "Failed to stage submission {}: {}",
                submission.display(),
                e
            ))
        })?;
        Ok(base)
    }

    /// Create the directory for check `name`, seeded from check `from`
    /// or from the base fixtures
    pub fn stage(&self, name: &str, from: Option<&str>) -> Result<PathBuf> {
        let source = match from {
            Some(dependency) => self.check_dir(dependency),
            None => self.base_dir(),
        };
        let target = self.check_dir(name);
        if fs::symlink_metadata(&target).is_ok() {
            return Err(HarnessError::Staging(format!(
                "Staging directory for '{}' already exists",
                name
            )));
        }

        copy_tree(&source, &target)?;
        log::debug!("Staged {} from {}", target.display(), source.display());
        Ok(target)
    }

    /// Remove the whole staging root (idempotent)
    pub fn cleanup(&mut self) -> Result<()> {
        if self.cleaned {
            return Ok(());
        }
        self.cleaned = true;
        safe_cleanup::remove_tree_secure(&self.root)?;
        log::debug!("Removed staging root {}", self.root.display());
        Ok(())
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            log::warn!("Failed to remove staging root {}: {}", self.root.display(), e);
        }
    }
}
