//! Git sync client.
//!
//! [`GitSyncClient`] is the entry point an application holds on to. It owns
//! the provider client and the local store handle, and wraps every run in
//! the same envelope:
//! - check configuration before any network call
//! - take the repository lock, failing fast when another run holds it
//! - run the engine, turning a top-level error into a failed summary
//! - persist the summary record and clear progress

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::{Config, GitConfig, GitConfigStatus};
use crate::database::{
    lock_database, Database, SharedDatabase, SETTING_AUTO_PULL, SETTING_AUTO_PUSH, SETTING_LAST_SYNC,
};
use crate::error::NoteSyncResult;
use crate::frontmatter::{FrontMatterCodec, LineFrontMatter};
use crate::lock::{try_lock_repo, RepoLockGuard};
use crate::models::NoteType;
use crate::progress::{NoProgress, ProgressSink};
use crate::provider::{Dialect, HttpTransport, ProviderClient, Transport};
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::summary::{LastSyncRecord, SyncDirection, SyncSummary};

/// Result of a connection test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub repo: Option<String>,
    pub description: Option<String>,
    pub private: bool,
    pub default_branch: Option<String>,
    /// Authenticated user, when the provider was asked
    pub user: Option<String>,
    pub error: Option<String>,
}

impl ConnectionTest {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Git sync client
pub struct GitSyncClient<T: Transport = HttpTransport> {
    db: SharedDatabase,
    git: GitConfig,
    provider: ProviderClient<T>,
    entries_dir: PathBuf,
    attachments_dir: PathBuf,
    codec: Box<dyn FrontMatterCodec>,
    progress: Arc<dyn ProgressSink>,
}

impl GitSyncClient<HttpTransport> {
    /// Create a client over HTTP from the loaded configuration
    pub fn new(db: SharedDatabase, config: &Config) -> NoteSyncResult<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(
            db,
            config.git().clone(),
            config.entries_directory(),
            config.attachments_directory(),
            transport,
        ))
    }

    /// Open the database named by the configuration and create a client
    /// over it
    pub fn open(config: &Config) -> NoteSyncResult<Self> {
        let db = Database::new(config.database_file())?;
        Self::new(Arc::new(Mutex::new(db)), config)
    }
}

impl<T: Transport> GitSyncClient<T> {
    pub fn with_transport(
        db: SharedDatabase,
        git: GitConfig,
        entries_dir: impl Into<PathBuf>,
        attachments_dir: impl Into<PathBuf>,
        transport: T,
    ) -> Self {
        let provider = ProviderClient::with_transport(&git, transport);
        Self {
            db,
            git,
            provider,
            entries_dir: entries_dir.into(),
            attachments_dir: attachments_dir.into(),
            codec: Box::new(LineFrontMatter),
            progress: Arc::new(NoProgress),
        }
    }

    /// Report progress of every run to `sink`
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_codec(mut self, codec: Box<dyn FrontMatterCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }

    pub fn config_status(&self) -> GitConfigStatus {
        self.git.status()
    }

    pub fn is_configured(&self) -> bool {
        self.git.is_configured()
    }

    fn push_engine(&self) -> PushEngine<'_, T> {
        PushEngine {
            client: &self.provider,
            db: &self.db,
            entries_dir: &self.entries_dir,
            attachments_dir: &self.attachments_dir,
            codec: self.codec.as_ref(),
            progress: self.progress.as_ref(),
        }
    }

    fn pull_engine(&self) -> PullEngine<'_, T> {
        PullEngine {
            client: &self.provider,
            db: &self.db,
            entries_dir: &self.entries_dir,
            attachments_dir: &self.attachments_dir,
            codec: self.codec.as_ref(),
            progress: self.progress.as_ref(),
        }
    }

    /// Configuration check and repository lock, in that order
    fn begin(&self, direction: SyncDirection) -> Result<RepoLockGuard, SyncSummary> {
        if let Err(e) = self.git.require_configured() {
            tracing::warn!(error = %e, "Git sync is not configured");
            return Err(SyncSummary::failed(direction, e.to_string()));
        }
        try_lock_repo(&self.git.repo, &self.git.branch).map_err(|e| {
            tracing::warn!(error = %e, "Sync skipped");
            SyncSummary::failed(direction, e.to_string())
        })
    }

    fn store_record(&self, summary: &SyncSummary) -> NoteSyncResult<()> {
        let record = serde_json::to_string(&summary.to_record())?;
        lock_database(&self.db)?.set_setting(SETTING_LAST_SYNC, &record)
    }

    /// Clear progress and, for full runs, persist the summary record
    fn finish(&self, mut summary: SyncSummary, persist: bool) -> SyncSummary {
        self.progress.clear();
        if persist {
            if let Err(e) = self.store_record(&summary) {
                tracing::error!(error = %e, "Failed to store last sync record");
                summary.warn(format!("Failed to store last sync record: {}", e));
            }
        }
        summary
    }

    /// Make the remote match the local store
    pub async fn push_notes(&self) -> SyncSummary {
        let summary = match self.begin(SyncDirection::Push) {
            Err(summary) => return self.finish(summary, false),
            Ok(_lock) => match self.push_engine().run().await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(error = %e, "Push failed");
                    SyncSummary::failed(SyncDirection::Push, e.to_string())
                }
            },
        };
        self.finish(summary, true)
    }

    /// Make the local store match the remote
    pub async fn pull_notes(&self) -> SyncSummary {
        let summary = match self.begin(SyncDirection::Pull) {
            Err(summary) => return self.finish(summary, false),
            Ok(_lock) => match self.pull_engine().run().await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(error = %e, "Pull failed");
                    SyncSummary::failed(SyncDirection::Pull, e.to_string())
                }
            },
        };
        self.finish(summary, true)
    }

    /// Push a single note and its attachments
    pub async fn push_note(&self, id: i64) -> SyncSummary {
        let summary = match self.begin(SyncDirection::Push) {
            Err(summary) => summary,
            Ok(_lock) => self
                .push_engine()
                .push_note(id)
                .await
                .unwrap_or_else(|e| SyncSummary::failed(SyncDirection::Push, e.to_string())),
        };
        self.finish(summary, false)
    }

    /// Delete a single note's body from the remote
    pub async fn delete_note_remote(&self, id: i64, note_type: NoteType, heading: &str) -> SyncSummary {
        let summary = match self.begin(SyncDirection::Push) {
            Err(summary) => summary,
            Ok(_lock) => self
                .push_engine()
                .delete_note_remote(id, note_type, heading)
                .await
                .unwrap_or_else(|e| SyncSummary::failed(SyncDirection::Push, e.to_string())),
        };
        self.finish(summary, false)
    }

    /// Check credentials and repository access
    pub async fn test_connection(&self) -> ConnectionTest {
        if let Err(e) = self.git.require_configured() {
            return ConnectionTest::failure(e.to_string());
        }

        let mut user = None;
        if self.provider.dialect().probes_user() {
            match self.provider.probe_user().await {
                Ok(info) => user = Some(info.login),
                Err(e) => {
                    return ConnectionTest::failure(format!(
                        "Authentication failed ({} at {}): {}",
                        self.provider.dialect().as_str(),
                        self.provider.api_base(),
                        e
                    ))
                }
            }
        }

        match self.provider.probe_repo().await {
            Ok(info) => {
                tracing::info!(repo = %info.full_name, "Connection test succeeded");
                ConnectionTest {
                    success: true,
                    repo: Some(info.full_name),
                    description: info.description,
                    private: info.private,
                    default_branch: Some(info.default_branch),
                    user,
                    error: None,
                }
            }
            Err(e) => ConnectionTest::failure(e.to_string()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.provider.dialect()
    }

    /// The persisted record of the most recent push or pull
    pub fn last_sync_info(&self) -> NoteSyncResult<Option<LastSyncRecord>> {
        let raw = lock_database(&self.db)?.get_setting(SETTING_LAST_SYNC)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn auto_push(&self) -> NoteSyncResult<bool> {
        lock_database(&self.db)?.get_flag(SETTING_AUTO_PUSH)
    }

    pub fn set_auto_push(&self, enabled: bool) -> NoteSyncResult<()> {
        lock_database(&self.db)?.set_flag(SETTING_AUTO_PUSH, enabled)
    }

    pub fn auto_pull(&self) -> NoteSyncResult<bool> {
        lock_database(&self.db)?.get_flag(SETTING_AUTO_PULL)
    }

    pub fn set_auto_pull(&self, enabled: bool) -> NoteSyncResult<()> {
        lock_database(&self.db)?.set_flag(SETTING_AUTO_PULL, enabled)
    }
}
