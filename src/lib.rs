//! Notesync - Git synchronization engine for a personal note store.
//!
//! This library mirrors notes, folders and attachments between a local
//! SQLite store plus body files on disk and a Git repository reached
//! through the GitHub or Forgejo/Gitea contents API:
//! - Push: local is authoritative, changed files are uploaded and remote
//!   orphans deleted
//! - Pull: remote is authoritative, notes are upserted in one transaction,
//!   new attachments downloaded and local orphans trashed
//! - Metadata sidecar (`metadata.json`) and in-body front matter
//! - Configuration management
//!
//! # Feature Flags
//!
//! - `desktop`: Resolve the default config directory from the platform.

pub mod config;
pub mod database;
pub mod error;
pub mod folders;
pub mod frontmatter;
pub mod hasher;
pub mod lock;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod provider;
pub mod pull;
pub mod push;
pub mod summary;
pub mod sync_client;
pub mod validation;

#[cfg(test)]
mod fake_remote;

// Re-export commonly used types
pub use config::{Config, GitConfig};
pub use database::{Database, SharedDatabase};
pub use error::{NoteSyncError, NoteSyncResult};
pub use models::{Attachment, Folder, Note, NoteType};
pub use progress::{ProgressSink, ProgressSlot, ProgressUpdate};
pub use provider::{Dialect, ProviderClient, Transport};
pub use summary::{LastSyncRecord, SyncSummary};
pub use sync_client::{ConnectionTest, GitSyncClient};
