// src/config.rs
//! Engine configuration file
//!
//! TOML with two kinds of sections:
//! - [general] - Application directory, state, backups, scheduling period
//! - [sources.*] - Staging directories filled by external fetchers
//!
//! ```toml
//! [general]
//! app_dir = "/opt/myapp"
//! period = "daily"
//!
//! [sources.main]
//! staging_dir = "/var/lib/ship/staging/main"
//! verified = true
//! ```

use crate::manifest::MANIFEST_FILE;
use crate::state::Period;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ship/ship.toml";

/// TOML configuration file structure
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipConfig {
    pub general: GeneralSection,

    /// Update sources in declaration order
    #[serde(default)]
    pub sources: IndexMap<String, SourceSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralSection {
    /// Live application directory
    pub app_dir: PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// Once-per-period gate
    #[serde(default)]
    pub period: Period,

    /// Backups kept after a successful run unless the manifest says otherwise
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,

    #[serde(default = "default_command_timeout")]
    pub hook_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub migration_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Manifest file name inside a staged release
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSection {
    /// Where the fetcher leaves the staged release
    pub staging_dir: PathBuf,

    /// Fetcher verified the release's checksums
    #[serde(default)]
    pub verified: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/lib/ship/backups")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/ship/state.json")
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/var/lib/ship/ship.lock")
}

fn default_keep_backups() -> usize {
    5
}

fn default_command_timeout() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_manifest_name() -> String {
    MANIFEST_FILE.to_string()
}

fn default_true() -> bool {
    true
}

impl ShipConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ShipConfig = toml::from_str(content).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.general.app_dir.is_absolute() {
            anyhow::bail!(
                "general.app_dir must be an absolute path, got {}",
                self.general.app_dir.display()
            );
        }
        if self.general.app_dir.parent().is_none() {
            anyhow::bail!("general.app_dir cannot be the filesystem root");
        }
        if self.general.keep_backups == 0 {
            anyhow::bail!("general.keep_backups must be at least 1");
        }
        if self.general.hook_timeout_secs == 0 || self.general.migration_timeout_secs == 0 {
            anyhow::bail!("general hook and migration timeouts must be positive");
        }
        if self.general.manifest_name.is_empty() || self.general.manifest_name.contains('/') {
            anyhow::bail!(
                "general.manifest_name must be a plain file name, got '{}'",
                self.general.manifest_name
            );
        }
        if self.general.backup_dir.starts_with(&self.general.app_dir) {
            anyhow::bail!("general.backup_dir must be outside general.app_dir");
        }
        for (name, source) in &self.sources {
            if source.staging_dir.starts_with(&self.general.app_dir) {
                anyhow::bail!("sources.{}.staging_dir must be outside general.app_dir", name);
            }
        }
        Ok(())
    }

    /// Enabled sources, restricted to `names` when given
    pub fn selected_sources(&self, names: &[String]) -> Result<Vec<(&str, &SourceSection)>> {
        for name in names {
            if !self.sources.contains_key(name) {
                anyhow::bail!("Unknown source '{}' (configured: {:?})", name, self.sources.keys().collect::<Vec<_>>());
            }
        }
        Ok(self
            .sources
            .iter()
            .filter(|(name, source)| source.enabled && (names.is_empty() || names.contains(name)))
            .map(|(name, source)| (name.as_str(), source))
            .collect())
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.general.hook_timeout_secs)
    }

    pub fn migration_timeout(&self) -> Duration {
        Duration::from_secs(self.general.migration_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[general]\napp_dir = \"/opt/myapp\"\n";

    #[test]
    fn test_defaults() {
        let config = ShipConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.general.backup_dir, PathBuf::from("/var/lib/ship/backups"));
        assert_eq!(config.general.period, Period::Daily);
        assert_eq!(config.general.keep_backups, 5);
        assert_eq!(config.hook_timeout(), Duration::from_secs(600));
        assert_eq!(config.general.manifest_name, "update-manifest.yaml");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_sources_keep_order_and_filter() {
        let config = ShipConfig::parse(
            r#"
[general]
app_dir = "/opt/myapp"
period = "hourly"

[sources.main]
staging_dir = "/var/lib/ship/staging/main"
verified = true

[sources.hotfix]
staging_dir = "/var/lib/ship/staging/hotfix"

[sources.old]
staging_dir = "/var/lib/ship/staging/old"
enabled = false
"#,
        )
        .unwrap();

        let all: Vec<&str> = config.selected_sources(&[]).unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(all, vec!["main", "hotfix"]);
        assert!(config.sources["main"].verified);

        let only = config.selected_sources(&["hotfix".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert!(config.selected_sources(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_validation_errors() {
        assert!(ShipConfig::parse("[general]\napp_dir = \"relative\"\n").is_err());
        assert!(ShipConfig::parse("[general]\napp_dir = \"/opt/a\"\nkeep_backups = 0\n").is_err());
        assert!(ShipConfig::parse("[general]\napp_dir = \"/opt/a\"\nbackup_dir = \"/opt/a/bk\"\n").is_err());
        assert!(ShipConfig::parse("[general]\napp_dir = \"/opt/a\"\nperiod = \"monthly\"\n").is_err());
        assert!(ShipConfig::parse("[general]\napp_dir = \"/opt/a\"\nbogus = 1\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let err = ShipConfig::load(Path::new("/nonexistent/ship.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/ship.toml"));
    }
}
