//! Fetch pipeline configuration
//!
//! Defaults reproduce the stock behavior: download the CIFAR-10 python
//! archive, unpack it into the working directory and write images under
//! `cifar10/train` and `cifar10/test`. A TOML file can override any field.

use log::warn;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dataset::batch::Split;
use crate::errors::{KitError, KitResult};

/// Default source of the dataset archive
pub const CIFAR10_URL: &str = "https://www.cs.toronto.edu/~kriz/cifar-10-python.tar.gz";
/// Default directory receiving the produced images
pub const OUT_DIR: &str = "cifar10";

/// How archive entry paths are treated during extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
    /// Refuse entries with absolute paths or `..` components
    Strict,
    /// Write entries wherever their paths point
    Trust,
}

/// What happens when one record fails to encode or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run at the first failing record
    Abort,
    /// Log the failure and continue with the next record
    Continue,
}

/// Settings for one fetch-and-unpack run
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Archive URL
    pub url: String,
    /// Directory the archive is unpacked into
    pub extract_dir: PathBuf,
    /// Root of the produced image tree
    pub output_dir: PathBuf,
    /// Subdirectory name for training batches
    pub train_dir_name: String,
    /// Subdirectory name for test batches
    pub test_dir_name: String,
    pub path_policy: PathPolicy,
    pub failure_policy: FailurePolicy,
    /// Overall HTTP request timeout; none by default
    pub request_timeout: Option<Duration>,
    /// Draw progress bars
    pub show_progress: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            url: CIFAR10_URL.to_string(),
            extract_dir: PathBuf::from("."),
            output_dir: PathBuf::from(OUT_DIR),
            train_dir_name: "train".to_string(),
            test_dir_name: "test".to_string(),
            path_policy: PathPolicy::Strict,
            failure_policy: FailurePolicy::Abort,
            request_timeout: None,
            show_progress: true,
        }
    }
}

impl FetchConfig {
    /// Destination directory for a split
    pub fn split_dir(&self, split: Split) -> PathBuf {
        match split {
            Split::Train => self.output_dir.join(&self.train_dir_name),
            Split::Test => self.output_dir.join(&self.test_dir_name),
        }
    }

    /// Load configuration from a TOML file, starting from the defaults
    pub fn from_file(path: &Path) -> KitResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            KitError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string, starting from the defaults
    pub fn from_toml_str(content: &str) -> KitResult<Self> {
        let toml_value: toml::Value = content
            .parse()
            .map_err(|e| KitError::ConfigError(format!("Failed to parse TOML: {}", e)))?;
        let Some(table) = toml_value.as_table() else {
            return Err(KitError::ConfigError("Top level must be a table".to_string()));
        };

        let mut config = FetchConfig::default();
        for (key, value) in table {
            match key.as_str() {
                "url" => config.url = Self::string_value(key, value)?,
                "extract_dir" => config.extract_dir = PathBuf::from(Self::string_value(key, value)?),
                "output_dir" => config.output_dir = PathBuf::from(Self::string_value(key, value)?),
                "train_dir" => config.train_dir_name = Self::dir_name_value(key, value)?,
                "test_dir" => config.test_dir_name = Self::dir_name_value(key, value)?,
                "trust_archive_paths" => {
                    if Self::bool_value(key, value)? {
                        config.path_policy = PathPolicy::Trust;
                    }
                },
                "keep_going" => {
                    if Self::bool_value(key, value)? {
                        config.failure_policy = FailurePolicy::Continue;
                    }
                },
                "timeout_secs" => {
                    let secs = value.as_integer()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| KitError::ConfigError(format!("'{}' must be a positive integer", key)))?;
                    config.request_timeout = Some(Duration::from_secs(secs as u64));
                },
                other => warn!("Ignoring unknown configuration key '{}'", other),
            }
        }

        if config.train_dir_name == config.test_dir_name {
            return Err(KitError::ConfigError(format!(
                "train_dir and test_dir must differ (both are '{}')", config.train_dir_name
            )));
        }

        Ok(config)
    }

    fn string_value(key: &str, value: &toml::Value) -> KitResult<String> {
        value.as_str()
            .map(str::to_string)
            .ok_or_else(|| KitError::ConfigError(format!("'{}' must be a string", key)))
    }

    fn bool_value(key: &str, value: &toml::Value) -> KitResult<bool> {
        value.as_bool()
            .ok_or_else(|| KitError::ConfigError(format!("'{}' must be a boolean", key)))
    }

    // Split directories are single names so the two splits never overlap.
    fn dir_name_value(key: &str, value: &toml::Value) -> KitResult<String> {
        let name = Self::string_value(key, value)?;
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(KitError::ConfigError(format!("'{}' must be a plain directory name, got '{}'", key, name)));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.url, CIFAR10_URL);
        assert_eq!(config.split_dir(Split::Train), PathBuf::from("cifar10/train"));
        assert_eq!(config.split_dir(Split::Test), PathBuf::from("cifar10/test"));
        assert_eq!(config.path_policy, PathPolicy::Strict);
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn test_toml_overrides() {
        let config = FetchConfig::from_toml_str(r#"
            url = "http://localhost/archive.tar.gz"
            output_dir = "/data/out"
            train_dir = "training"
            keep_going = true
            trust_archive_paths = false
            timeout_secs = 90
            colour = "blue"
        "#).unwrap();

        assert_eq!(config.url, "http://localhost/archive.tar.gz");
        assert_eq!(config.split_dir(Split::Train), PathBuf::from("/data/out/training"));
        assert_eq!(config.split_dir(Split::Test), PathBuf::from("/data/out/test"));
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.path_policy, PathPolicy::Strict);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        assert!(matches!(FetchConfig::from_toml_str("url = 3"), Err(KitError::ConfigError(_))));
        assert!(matches!(FetchConfig::from_toml_str("keep_going = \"yes\""), Err(KitError::ConfigError(_))));
        assert!(matches!(FetchConfig::from_toml_str("timeout_secs = 0"), Err(KitError::ConfigError(_))));
        assert!(matches!(FetchConfig::from_toml_str("not toml ["), Err(KitError::ConfigError(_))));
    }

    #[test]
    fn test_split_dirs_must_be_distinct_names() {
        assert!(FetchConfig::from_toml_str("train_dir = \"test\"").is_err());
        assert!(FetchConfig::from_toml_str("test_dir = \"a/b\"").is_err());
        assert!(FetchConfig::from_toml_str("train_dir = \"..\"").is_err());
    }
}
