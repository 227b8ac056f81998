//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use basejmpr_core::HttpConfig;
use basejmpr_store::QemuImg;

/// Revision store directory name inside the pool root.
pub const STORE_DIR: &str = "backing_files";

/// Global configuration for basejmpr
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub images: ImagesConfig,
    pub introspect: IntrospectConfig,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Instance pool; revisions live under `{root}/backing_files`.
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/libvirt/images"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub base_url: String,
    pub series: String,
    pub arch: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://cloud-images.ubuntu.com".to_string(),
            series: "jammy".to_string(),
            arch: "amd64".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntrospectConfig {
    pub command: String,
    pub timeout_secs: u64,
    /// Pass `-U` so images held open by running VMs can be read.
    pub force_share: bool,
}

impl Default for IntrospectConfig {
    fn default() -> Self {
        Self {
            command: "qemu-img".to_string(),
            timeout_secs: 30,
            force_share: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Seconds without data before a download counts as stalled
    pub read_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            read_timeout: defaults.read_timeout.as_secs(),
            max_retries: defaults.max_retries,
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./basejmpr.toml (current directory)
    /// 2. ~/.config/basejmpr/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("basejmpr.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "basejmpr") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn store_root(&self) -> PathBuf {
        self.paths.root.join(STORE_DIR)
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            read_timeout: Duration::from_secs(self.http.read_timeout),
            max_retries: self.http.max_retries,
        }
    }

    pub fn introspector(&self) -> QemuImg {
        QemuImg::new(
            &self.introspect.command,
            Duration::from_secs(self.introspect.timeout_secs),
        )
        .force_share(self.introspect.force_share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.paths.root, PathBuf::from("/var/lib/libvirt/images"));
        assert_eq!(
            config.store_root(),
            PathBuf::from("/var/lib/libvirt/images/backing_files")
        );
        assert_eq!(config.images.series, "jammy");
        assert_eq!(config.introspect.command, "qemu-img");
        assert!(config.introspect.force_share);
        assert_eq!(config.http.max_retries, 3);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[paths]
root = "/srv/images"

[images]
series = "focal"

[introspect]
timeout_secs = 5
force_share = false

[http]
read_timeout = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.paths.root, PathBuf::from("/srv/images"));
        assert_eq!(config.images.series, "focal");
        // Unset keys keep their defaults
        assert_eq!(config.images.arch, "amd64");
        assert_eq!(config.introspect.timeout_secs, 5);
        assert!(!config.introspect.force_share);
        assert_eq!(config.http_config().read_timeout, Duration::from_secs(60));
        assert_eq!(config.http_config().max_retries, 3);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basejmpr.toml");
        std::fs::write(&path, "[paths]\nroot = 42\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
