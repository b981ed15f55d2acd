//! Worker configuration.
//!
//! The configuration names the current deployment (`base_name` +
//! `version_tag`), the application origin, the precache manifest and the
//! exclusion list. It is passed explicitly to every component; nothing reads
//! it from global state.
//!
//! Configuration is stored at `~/.config/stowaway/config.json`. Environment
//! variables override the file:
//! - `STOWAWAY_VERSION`: version tag
//! - `STOWAWAY_ORIGIN`: application origin
//! - `STOWAWAY_CACHE_DIR`: cache root

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::network::DEFAULT_REQUEST_TIMEOUT_SECS;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "stowaway";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_ORIGIN: &str = "http://localhost:8080/";
pub const DEFAULT_BASE_NAME: &str = "stowaway-";
pub const DEFAULT_VERSION_TAG: &str = "v1";

/// Application shell plus one third-party stylesheet, fetched in no-cors
/// mode and stored opaque
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "https://cdn.jsdelivr.net/npm/boxicons@2.0.5/css/boxicons.min.css",
];

/// Live data APIs that must always reflect server state
pub const DEFAULT_EXCLUSIONS: &[&str] = &["api.github.com"];

/// Largest body written back from the network path (10 MiB). Keeps large
/// media requested through the cache-eligible path from growing the store
/// without bound. 0 disables the cap.
pub const DEFAULT_MAX_CACHEABLE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Shown in the offline page title
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_base_name")]
    pub base_name: String,
    #[serde(default = "default_version_tag")]
    pub version_tag: String,
    /// Origin the application is served from; relative manifest entries
    /// resolve against it
    pub origin: Url,
    /// Resources stored at install, relative paths or absolute URLs
    #[serde(default = "default_manifest")]
    pub manifest: Vec<String>,
    /// Substrings of URLs that always go straight to the network
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
    #[serde(default = "default_max_cacheable_bytes")]
    pub max_cacheable_bytes: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Overrides the platform cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_app_name() -> String {
    APP_NAME.to_string()
}

fn default_base_name() -> String {
    DEFAULT_BASE_NAME.to_string()
}

fn default_version_tag() -> String {
    DEFAULT_VERSION_TAG.to_string()
}

fn default_manifest() -> Vec<String> {
    DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect()
}

fn default_exclusions() -> Vec<String> {
    DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_max_cacheable_bytes() -> u64 {
    DEFAULT_MAX_CACHEABLE_BYTES
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl WorkerConfig {
    /// Defaults for an application served from `origin`
    pub fn new(origin: Url) -> Self {
        Self {
            app_name: default_app_name(),
            base_name: default_base_name(),
            version_tag: default_version_tag(),
            origin,
            manifest: default_manifest(),
            exclusions: default_exclusions(),
            max_cacheable_bytes: default_max_cacheable_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
            cache_dir: None,
        }
    }

    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = tag.into();
        self
    }

    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Name of the store owned by the current version
    pub fn cache_name(&self) -> String {
        format!("{}{}", self.base_name, self.version_tag)
    }

    pub fn is_excluded(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.exclusions
            .iter()
            .any(|pattern| !pattern.is_empty() && url.contains(pattern.as_str()))
    }

    /// Whether a body of `len` bytes may be written back
    pub fn within_size_cap(&self, len: u64) -> bool {
        self.max_cacheable_bytes == 0 || len <= self.max_cacheable_bytes
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            let origin = Url::parse(DEFAULT_ORIGIN).context("Invalid default origin")?;
            Ok(Self::new(origin))
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply `STOWAWAY_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(tag) = lookup("STOWAWAY_VERSION").filter(|s| !s.is_empty()) {
            self.version_tag = tag;
        }
        if let Some(origin) = lookup("STOWAWAY_ORIGIN").filter(|s| !s.is_empty()) {
            self.origin = Url::parse(&origin)
                .with_context(|| format!("Invalid STOWAWAY_ORIGIN: {}", origin))?;
        }
        if let Some(dir) = lookup("STOWAWAY_CACHE_DIR").filter(|s| !s.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root directory holding every versioned store
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
