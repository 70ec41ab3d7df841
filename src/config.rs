//! Configuration management for notesync.
//!
//! This module handles loading and saving configuration to/from a JSON
//! file in a config directory, with environment overrides for the Git
//! credentials so tokens need not be written to disk.
//!
//! Sections:
//! - git: provider dialect, credentials, repository, branch, committer
//! - store: database file, entries and attachments directories

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NoteSyncError, NoteSyncResult};
use crate::provider::Dialect;
use crate::validation::{validate_branch, validate_repo};

/// Git remote configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: Dialect,
    #[serde(default)]
    pub token: String,
    /// Repository slug, `owner/name`
    #[serde(default)]
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// API base URL; provider default when unset
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_author_name() -> String {
    "Notesync".to_string()
}

fn default_author_email() -> String {
    "notesync@localhost".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: Dialect::default(),
            token: String::new(),
            repo: String::new(),
            branch: default_branch(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            api_base: None,
        }
    }
}

impl GitConfig {
    /// Effective API base URL, without a trailing slash
    pub fn api_base(&self) -> String {
        let base = match self.api_base.as_deref().map(str::trim) {
            Some(base) if !base.is_empty() => base.to_string(),
            _ => self.provider.default_api_base().to_string(),
        };
        base.trim_end_matches('/').to_string()
    }

    /// True when a token and repository are set
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty() && !self.repo.trim().is_empty()
    }

    /// Check credentials and repository before any network call.
    pub fn require_configured(&self) -> NoteSyncResult<()> {
        if self.token.trim().is_empty() {
            return Err(NoteSyncError::config("Git token is not configured"));
        }
        if self.repo.trim().is_empty() {
            return Err(NoteSyncError::config("Git repository is not configured"));
        }
        validate_repo(self.repo.trim())?;
        validate_branch(self.branch.trim())?;
        Ok(())
    }

    /// Configuration view without secrets
    pub fn status(&self) -> GitConfigStatus {
        GitConfigStatus {
            enabled: self.enabled,
            configured: self.is_configured(),
            repo: if self.repo.is_empty() { None } else { Some(self.repo.clone()) },
            branch: self.branch.clone(),
            has_token: !self.token.is_empty(),
            author_name: self.author_name.clone(),
            provider: self.provider,
            api_base: self.api_base(),
        }
    }
}

/// Redacted configuration status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfigStatus {
    pub enabled: bool,
    pub configured: bool,
    pub repo: Option<String>,
    pub branch: String,
    pub has_token: bool,
    pub author_name: String,
    pub provider: Dialect,
    pub api_base: String,
}

/// Local store locations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Path to the database file
    #[serde(default)]
    pub database_file: String,
    /// Directory holding note bodies named `{id}.{ext}`
    #[serde(default)]
    pub entries_directory: String,
    /// Directory holding attachment blobs
    #[serde(default)]
    pub attachments_directory: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigData {
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ConfigData {
    fn with_defaults_for(config_dir: &Path) -> Self {
        let mut data = ConfigData::default();
        data.fill_store_defaults(config_dir);
        data
    }

    fn fill_store_defaults(&mut self, config_dir: &Path) {
        if self.store.database_file.is_empty() {
            self.store.database_file = config_dir.join("notes.db").to_string_lossy().to_string();
        }
        if self.store.entries_directory.is_empty() {
            self.store.entries_directory = config_dir.join("entries").to_string_lossy().to_string();
        }
        if self.store.attachments_directory.is_empty() {
            self.store.attachments_directory =
                config_dir.join("attachments").to_string_lossy().to_string();
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Create a new configuration manager
    ///
    /// Without the `desktop` feature, `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> NoteSyncResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("notesync")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(NoteSyncError::config(
                        "config_dir is required without the desktop feature",
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = match fs::read_to_string(&config_file) {
            Ok(content) => match serde_json::from_str::<ConfigData>(&content) {
                Ok(mut data) => {
                    data.fill_store_defaults(&config_dir);
                    data
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable config file {}: {}", config_file.display(), e);
                    ConfigData::with_defaults_for(&config_dir)
                }
            },
            Err(_) => ConfigData::with_defaults_for(&config_dir),
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteSyncResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Git section
    pub fn git(&self) -> &GitConfig {
        &self.data.git
    }

    /// Mutable Git section; call `save()` to persist
    pub fn git_mut(&mut self) -> &mut GitConfig {
        &mut self.data.git
    }

    /// Store section
    pub fn store(&self) -> &StoreConfig {
        &self.data.store
    }

    pub fn database_file(&self) -> &str {
        &self.data.store.database_file
    }

    pub fn entries_directory(&self) -> PathBuf {
        PathBuf::from(&self.data.store.entries_directory)
    }

    pub fn attachments_directory(&self) -> PathBuf {
        PathBuf::from(&self.data.store.attachments_directory)
    }

    /// Check if Git sync is enabled
    pub fn is_git_sync_enabled(&self) -> bool {
        self.data.git.enabled
    }

    /// Enable or disable Git sync
    pub fn set_git_sync_enabled(&mut self, enabled: bool) -> NoteSyncResult<()> {
        self.data.git.enabled = enabled;
        self.save()
    }

    /// Overlay `NOTESYNC_GIT_*` environment variables. Not persisted.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let git = &mut self.data.git;
        if let Some(v) = lookup("NOTESYNC_GIT_ENABLED") {
            git.enabled = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("NOTESYNC_GIT_PROVIDER") {
            match Dialect::parse(&v) {
                Some(dialect) => git.provider = dialect,
                None => tracing::warn!("Unknown NOTESYNC_GIT_PROVIDER value: {}", v),
            }
        }
        if let Some(v) = lookup("NOTESYNC_GIT_TOKEN") {
            git.token = v.trim().to_string();
        }
        if let Some(v) = lookup("NOTESYNC_GIT_REPO") {
            git.repo = v.trim().to_string();
        }
        if let Some(v) = lookup("NOTESYNC_GIT_BRANCH") {
            if !v.trim().is_empty() {
                git.branch = v.trim().to_string();
            }
        }
        if let Some(v) = lookup("NOTESYNC_GIT_AUTHOR_NAME") {
            git.author_name = v;
        }
        if let Some(v) = lookup("NOTESYNC_GIT_AUTHOR_EMAIL") {
            git.author_email = v;
        }
        if let Some(v) = lookup("NOTESYNC_GIT_API_BASE") {
            git.api_base = Some(v.trim().to_string()).filter(|s| !s.is_empty());
        }
    }
}
