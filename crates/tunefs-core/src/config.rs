//! Startup configuration for tunefs.
//!
//! The configuration is built once at startup (from CLI flags, an
//! optional YAML file, and the `-o` mount-option string) and passed down
//! to the store and filesystem constructors. Component code never reads
//! ambient global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid mount option '{0}': {1}")]
    InvalidMountOption(String, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tunefs.db")
}

fn default_quiet_secs() -> u64 {
    3
}

/// Runtime configuration shared by the store and the node layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the on-disk music tree the mount is backed by.
    pub source: PathBuf,

    /// Location of the metadata database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Owner override for files exposed through the mount.
    #[serde(default)]
    pub uid: Option<u32>,

    /// Group override for files exposed through the mount.
    #[serde(default)]
    pub gid: Option<u32>,

    /// Allow other users to access the mounted filesystem.
    #[serde(default)]
    pub allow_other: bool,

    /// How long a touched file must stay quiet before its deferred
    /// classification action fires.
    #[serde(default = "default_quiet_secs")]
    pub quiet_secs: u64,
}

impl Config {
    /// Build a configuration with defaults for the given source tree.
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Config {
            source: source.into(),
            db_path: default_db_path(),
            uid: None,
            gid: None,
            allow_other: false,
            quiet_secs: default_quiet_secs(),
        }
    }

    /// Load a configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply a comma-separated `-o` mount-option string.
    ///
    /// Recognized options: `allow_other`, `uid=<n>`, `gid=<n>`,
    /// `db_path=<path>`. Unknown options are ignored so standard mount
    /// flags can pass through.
    pub fn apply_mount_options(&mut self, opts: &str) -> Result<(), ConfigError> {
        for token in opts.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "allow_other" {
                self.allow_other = true;
            } else if let Some(v) = token.strip_prefix("uid=") {
                let uid = v.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidMountOption(token.to_string(), e.to_string())
                })?;
                self.uid = Some(uid);
            } else if let Some(v) = token.strip_prefix("gid=") {
                let gid = v.parse().map_err(|e: std::num::ParseIntError| {
                    ConfigError::InvalidMountOption(token.to_string(), e.to_string())
                })?;
                self.gid = Some(gid);
            } else if let Some(v) = token.strip_prefix("db_path=") {
                if v.is_empty() {
                    return Err(ConfigError::InvalidMountOption(
                        token.to_string(),
                        "empty path".to_string(),
                    ));
                }
                self.db_path = PathBuf::from(v);
            } else {
                debug!("ignoring mount option {token:?}");
            }
        }
        Ok(())
    }

    /// Check invariants that would otherwise surface as confusing
    /// filesystem errors after mounting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("source path is empty".to_string()));
        }
        if self.quiet_secs == 0 {
            return Err(ConfigError::Invalid(
                "quiet_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("/music");
        assert_eq!(config.db_path, PathBuf::from("tunefs.db"));
        assert_eq!(config.quiet_secs, 3);
        assert!(!config.allow_other);
        assert!(config.uid.is_none());
    }

    #[test]
    fn test_mount_options_parsed() {
        let mut config = Config::new("/music");
        config
            .apply_mount_options("allow_other,uid=1000,gid=100,db_path=/var/lib/tunefs.db")
            .unwrap();
        assert!(config.allow_other);
        assert_eq!(config.uid, Some(1000));
        assert_eq!(config.gid, Some(100));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/tunefs.db"));
    }

    #[test]
    fn test_mount_options_bad_uid() {
        let mut config = Config::new("/music");
        let err = config.apply_mount_options("uid=abc").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMountOption(_, _)));
    }

    #[test]
    fn test_mount_options_unknown_ignored() {
        let mut config = Config::new("/music");
        config.apply_mount_options("rw,noatime").unwrap();
        assert!(!config.allow_other);
    }

    #[test]
    fn test_mount_options_empty_db_path_rejected() {
        let mut config = Config::new("/music");
        assert!(config.apply_mount_options("db_path=").is_err());
    }

    #[test]
    fn test_validate_empty_source() {
        let config = Config::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunefs.yaml");
        std::fs::write(
            &path,
            "source: /music\ndb_path: /tmp/t.db\nallow_other: true\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.source, PathBuf::from("/music"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/t.db"));
        assert!(config.allow_other);
        assert_eq!(config.quiet_secs, 3);
    }
}
