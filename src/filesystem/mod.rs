// src/filesystem/mod.rs

//! Filesystem primitives for snapshots, staging and atomic replacement
//!
//! Everything that replaces more than one file goes through a sibling
//! directory followed by a rename, so an observer of the application path
//! only ever sees the complete old tree or the complete new one:
//!
//! ```text
//! /srv/app                      live tree
//! /srv/.app.ship-stage-<run>    new tree being built
//! /srv/.app.ship-old-<run>      previous tree, removed after the swap
//! ```

pub mod path;

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counters from a tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub bytes: u64,
}

/// Copy `src` into `dst`, keeping modes and symlinks
///
/// `skip` receives paths relative to `src`; returning true for a directory
/// skips its whole subtree. `dst` is created if missing.
pub fn copy_tree(src: &Path, dst: &Path, skip: impl Fn(&Path) -> bool) -> Result<TreeStats> {
    let mut stats = TreeStats::default();
    let mut dir_modes = Vec::new();
    fs::create_dir_all(dst)?;

    let walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => !skip(rel),
            _ => true,
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry.path().strip_prefix(src).map_err(|e| Error::InvalidPath(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_modes.push((target, entry.metadata().map_err(io::Error::from)?.permissions()));
            if !rel.as_os_str().is_empty() {
                stats.dirs += 1;
            }
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(&link, &target)?;
            stats.symlinks += 1;
        } else {
            stats.bytes += fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    // Directory modes last, so read-only directories can still be filled
    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, perms)?;
    }

    Ok(stats)
}

/// List every non-directory entry under `root` as sorted relative paths
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).map_err(|e| Error::InvalidPath(e.to_string()))?;
        files.push(rel.to_path_buf());
    }
    Ok(files)
}

/// Total size of regular files under `root`
pub fn tree_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Hidden sibling of `live` used for staging and retired trees
pub fn sibling(live: &Path, tag: &str) -> PathBuf {
    let name = live
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    live.parent()
        .unwrap_or(Path::new("."))
        .join(format!(".{}.{}", name, tag))
}

/// Replace the directory at `live` with `replacement`
///
/// The current tree is renamed to `retired` first. If moving the replacement
/// in fails, the retired tree is moved back before the error is returned.
/// The caller owns removing `retired` afterwards.
pub fn swap_in(live: &Path, replacement: &Path, retired: &Path) -> Result<()> {
    let had_live = live.exists();
    if had_live {
        fs::rename(live, retired)?;
    }

    if let Err(e) = fs::rename(replacement, live) {
        if had_live && let Err(undo) = fs::rename(retired, live) {
            warn!(
                "Could not move {} back to {}: {}",
                retired.display(),
                live.display(),
                undo
            );
        }
        return Err(e.into());
    }

    sync_dir(live.parent().unwrap_or(Path::new(".")));
    debug!("Swapped {} into {}", replacement.display(), live.display());
    Ok(())
}

/// Write `contents` to `path` through a temp file and a rename
///
/// An existing file keeps its permissions; a new one gets 0644.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let perms = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(_) => fs::Permissions::from_mode(0o644),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), perms)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    sync_dir(parent);
    Ok(())
}

/// SHA-256 of a file's contents, hex encoded
pub fn file_digest(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Free bytes on the filesystem holding `path` (or its nearest existing ancestor)
pub fn available_space(path: &Path) -> Result<u64> {
    let mut probe = path;
    while !probe.exists() {
        probe = probe
            .parent()
            .ok_or_else(|| Error::InvalidPath(format!("no existing ancestor for {}", path.display())))?;
    }
    Ok(fs2::available_space(probe)?)
}

/// Remove a file, directory tree or symlink if present
pub fn remove_any(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn sync_dir(dir: &Path) {
    // Not every filesystem supports fsync on directories
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
