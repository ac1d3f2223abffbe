// src/release.rs

//! Staged releases left behind by a source fetcher

use crate::error::{Error, Result};
use crate::filesystem;
use crate::filesystem::path::match_key;
use crate::manifest::Manifest;
use crate::version::AppVersion;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Plain-text version marker shipped in releases and application trees
pub const VERSION_FILE: &str = "VERSION";

/// A fully fetched release directory plus its manifest
#[derive(Debug, Clone)]
pub struct StagedRelease {
    /// Name of the source that produced it
    pub source: String,
    pub root: PathBuf,
    /// Fetcher's verified-integrity flag
    pub verified: bool,
    pub manifest: Manifest,
    manifest_name: String,
    version: AppVersion,
}

impl StagedRelease {
    /// Load the manifest from `root` and work out the release version
    ///
    /// The version is the release's `VERSION` file when present, else the
    /// manifest version.
    pub fn open(source: &str, root: &Path, verified: bool, manifest_name: &str) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::InvalidPath(format!(
                "staged release {} is not a directory",
                root.display()
            )));
        }
        let manifest = Manifest::from_file(&root.join(manifest_name))?;
        let version = read_version_file(root).unwrap_or_else(|| manifest.version.clone());
        info!("Staged release {} from source {} ({})", version, source, root.display());

        Ok(Self {
            source: source.to_string(),
            root: root.to_path_buf(),
            verified,
            manifest,
            manifest_name: manifest_name.to_string(),
            version,
        })
    }

    pub fn version(&self) -> &AppVersion {
        &self.version
    }

    /// Release-relative paths of every file to install
    ///
    /// The manifest itself is not part of the application tree.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = filesystem::list_files(&self.root)?
            .into_iter()
            .filter(|rel| match_key(rel) != self.manifest_name)
            .collect();
        debug!("{} files staged in {}", files.len(), self.root.display());
        Ok(files)
    }
}

/// Contents of `<dir>/VERSION`, if it holds a usable version
pub fn read_version_file(dir: &Path) -> Option<AppVersion> {
    let raw = fs::read_to_string(dir.join(VERSION_FILE)).ok()?;
    AppVersion::parse(raw.trim()).ok()
}
