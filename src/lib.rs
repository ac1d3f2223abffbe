// src/lib.rs

//! Ship: unattended application updater
//!
//! Applies a staged release to a live application directory. A YAML manifest
//! shipped with the release decides what happens to each file. Every run is
//! backed up first and rolled back automatically when it fails.
//!
//! # Architecture
//!
//! - Manifest-driven: per-file replace/merge/skip rules with glob specificity
//! - Whole-tree swaps: the live tree is always fully old or fully new
//! - Verified backups: SHA-256 digests checked before any restore
//! - One run at a time: an advisory lock with stale-holder detection
//! - Plain files for state: a JSON state file and per-backup metadata

pub mod backup;
pub mod cleanup;
pub mod conditionals;
pub mod config;
mod error;
pub mod filesystem;
pub mod health;
pub mod hooks;
pub mod lock;
pub mod manifest;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod release;
pub mod requirements;
pub mod resolver;
pub mod state;
pub mod version;

pub use config::ShipConfig;
pub use error::{Error, Result};
pub use manifest::{MANIFEST_FILE, Manifest, ManifestError};
pub use pipeline::{CheckReport, PipelineSettings, RunOutcome, RunState, UpdatePipeline};
pub use release::StagedRelease;
pub use version::AppVersion;
