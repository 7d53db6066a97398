//! Runtime configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sev_cloud::RestoreTier;

/// Operator configuration, loaded from a TOML file with CLI/env overrides.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where buckets are laid out on disk: `<local_base_path>/<bucket>/<key>`.
    pub local_base_path: PathBuf,
    /// The state database directory.
    pub state_db_path: PathBuf,
    /// Buckets the scanner skips entirely.
    pub excluded_buckets: Vec<String>,
    /// Retention window for archive restores, in days.
    pub glacier_restore_days: u32,
    /// Default retrieval tier; DEEP_ARCHIVE objects always use Bulk.
    pub glacier_restore_tier: String,
    /// Pause between restore-status polls, in seconds.
    pub glacier_poll_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_base_path: PathBuf::from("/mnt/s3-evac"),
            state_db_path: PathBuf::from("migration_state.db"),
            excluded_buckets: Vec::new(),
            glacier_restore_days: 90,
            glacier_restore_tier: "Standard".to_string(),
            glacier_poll_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// The configured default tier, validated.
    pub fn restore_tier(&self) -> Result<RestoreTier> {
        self.glacier_restore_tier
            .parse::<RestoreTier>()
            .map_err(anyhow::Error::msg)
            .context("invalid glacier_restore_tier in configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.glacier_restore_days, 90);
        assert_eq!(config.glacier_restore_tier, "Standard");
        assert_eq!(config.glacier_poll_interval_secs, 300);
        assert!(config.excluded_buckets.is_empty());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config =
            toml::from_str("local_base_path = \"/mnt/backup\"\nexcluded_buckets = [\"skip-me\"]")
                .unwrap();
        assert_eq!(config.local_base_path, PathBuf::from("/mnt/backup"));
        assert_eq!(config.excluded_buckets, vec!["skip-me"]);
        assert_eq!(config.glacier_restore_days, 90);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("glacier_days = 30").is_err());
    }

    #[test]
    fn tier_parses_and_validates() {
        let mut config = Config::default();
        assert_eq!(config.restore_tier().unwrap(), RestoreTier::Standard);
        config.glacier_restore_tier = "Turbo".to_string();
        assert!(config.restore_tier().is_err());
    }
}
