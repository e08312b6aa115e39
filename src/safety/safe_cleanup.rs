use crate::config::types::{HarnessError, Result};
use nix::dir::Dir;
use nix::fcntl::{AtFlags, OFlag};
use nix::sys::stat::{fstatat, Mode, SFlag};
use nix::unistd::{unlinkat, UnlinkatFlags};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

fn dir_flags() -> OFlag {
    OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC | OFlag::O_NOFOLLOW
}

fn fs_error(op: &str, name: &CStr, err: nix::errno::Errno) -> HarnessError {
    HarnessError::Staging(format!("{} failed for {:?}: {}", op, name, err))
}

fn is_dir(mode: libc::mode_t) -> bool {
    SFlag::from_bits_truncate(mode) & SFlag::S_IFMT == SFlag::S_IFDIR
}

fn remove_contents(dir: &mut Dir, root_dev: libc::dev_t) -> Result<()> {
    // Collect first; unlinking while readdir is live is unspecified.
    let mut names: Vec<CString> = Vec::new();
    for entry in dir.iter() {
        let entry = entry.map_err(|e| HarnessError::Staging(format!("readdir failed: {}", e)))?;
        let name = entry.file_name();
        if name.to_bytes() != b"." && name.to_bytes() != b".." {
            names.push(name.to_owned());
        }
    }

    let dir_fd = dir.as_raw_fd();
    for name in &names {
        remove_entry(dir_fd, name, root_dev)?;
    }
    Ok(())
}

fn remove_entry(parent_fd: RawFd, name: &CStr, root_dev: libc::dev_t) -> Result<()> {
    let st = fstatat(parent_fd, name, AtFlags::AT_SYMLINK_NOFOLLOW)
        .map_err(|e| fs_error("fstatat", name, e))?;

    if !is_dir(st.st_mode) {
        return unlinkat(Some(parent_fd), name, UnlinkatFlags::NoRemoveDir)
            .map_err(|e| fs_error("unlinkat", name, e));
    }
    if st.st_dev != root_dev {
        return Err(HarnessError::Staging(format!(
            "Refusing to cross filesystem boundary at directory {:?}",
            name
        )));
    }

    let mut child = Dir::openat(parent_fd, name, dir_flags(), Mode::empty())
        .map_err(|e| fs_error("openat", name, e))?;
    remove_contents(&mut child, root_dev)?;
    drop(child);
    unlinkat(Some(parent_fd), name, UnlinkatFlags::RemoveDir)
        .map_err(|e| fs_error("unlinkat", name, e))
}

/// Remove a tree without following symlinks, using openat/fstatat/unlinkat.
/// Staging directories hold files written by the program under test, so a
/// planted symlink must never redirect the removal.
pub fn remove_tree_secure(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let parent = path.parent().ok_or_else(|| {
        HarnessError::Staging(format!("Cannot remove path without parent: {}", path.display()))
    })?;
    let name = path.file_name().ok_or_else(|| {
        HarnessError::Staging(format!("Cannot remove path without file name: {}", path.display()))
    })?;
    let name = CString::new(name.as_bytes()).map_err(|_| {
        HarnessError::Staging(format!("Path contains NUL byte: {}", path.display()))
    })?;

    let parent_dir = Dir::open(parent, dir_flags(), Mode::empty()).map_err(|e| {
        HarnessError::Staging(format!("open directory failed for {}: {}", parent.display(), e))
    })?;
    let parent_fd = parent_dir.as_raw_fd();
    let st = fstatat(parent_fd, name.as_c_str(), AtFlags::AT_SYMLINK_NOFOLLOW)
        .map_err(|e| fs_error("fstatat", &name, e))?;
    remove_entry(parent_fd, &name, st.st_dev)
}
