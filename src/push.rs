//! Push: the local store is authoritative.
//!
//! One tree listing gives the remote blob shas. Every local body and
//! attachment file is hashed and uploaded only when its sha differs, the
//! metadata sidecar goes through the same check, and every remote path not
//! produced by this run is deleted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::database::{lock_database, Database};
use crate::error::{NoteSyncError, NoteSyncResult};
use crate::frontmatter::{to_repo_links, FrontMatterCodec, UNTITLED};
use crate::hasher::matches_remote;
use crate::metadata::RepoMetadata;
use crate::models::{attachment_remote_path, note_remote_path, Note, NoteType, METADATA_PATH};
use crate::progress::{ProgressSink, ProgressTracker};
use crate::provider::{ProviderClient, Transport};
use crate::summary::{FileCategory, FileOperation, FileReport, SyncDirection, SyncSummary};
use crate::validation::parse_note_file_name;

/// Commit message for remote orphan deletion
pub const ORPHAN_DELETE_MESSAGE: &str = "Deleted from notesync";

/// A note body file found in the entries directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNoteFile {
    pub id: i64,
    pub note_type: NoteType,
    pub path: PathBuf,
}

/// List note body files, ordered by id. A missing directory is empty.
pub fn list_note_files(entries_dir: &Path) -> NoteSyncResult<Vec<LocalNoteFile>> {
    let mut files = Vec::new();
    for (name, path) in list_files(entries_dir)? {
        let Some((id, ext)) = parse_note_file_name(&name) else {
            continue;
        };
        let Some(note_type) = NoteType::from_local_extension(ext) else {
            continue;
        };
        files.push(LocalNoteFile { id, note_type, path });
    }
    files.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// List regular, non-hidden files of a directory as `(name, path)`,
/// ordered by name. A missing directory is empty.
pub fn list_files(dir: &Path) -> NoteSyncResult<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        files.push((name, entry.path()));
    }
    files.sort();
    Ok(files)
}

/// Push engine over one provider client and local store
pub struct PushEngine<'a, T: Transport> {
    pub client: &'a ProviderClient<T>,
    pub db: &'a Mutex<Database>,
    pub entries_dir: &'a Path,
    pub attachments_dir: &'a Path,
    pub codec: &'a dyn FrontMatterCodec,
    pub progress: &'a dyn ProgressSink,
}

impl<'a, T: Transport> PushEngine<'a, T> {
    /// Repository bytes of a note body: links rewritten, front matter on
    fn repo_content(&self, body: &str, note: &Note) -> String {
        let linked = to_repo_links(body, note.id, &note.attachments);
        self.codec.embed(&linked, note)
    }

    /// Upload unless the remote already holds identical bytes.
    /// Returns whether an upload happened.
    async fn push_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        known_sha: Option<&str>,
    ) -> NoteSyncResult<bool> {
        if let Some(sha) = known_sha {
            if matches_remote(content, sha) {
                return Ok(false);
            }
        }
        self.client
            .create_or_update_file(path, content, message, known_sha)
            .await?;
        Ok(true)
    }

    /// Make the remote match the local store.
    ///
    /// Per-file failures end up in the summary; only local listing or
    /// store failures abort.
    pub async fn run(&self) -> NoteSyncResult<SyncSummary> {
        let mut summary = SyncSummary::started(SyncDirection::Push);
        self.progress
            .report(crate::progress::ProgressUpdate::new(0, 0, "Listing remote files..."));

        let remote: BTreeMap<String, String> = match self.client.get_tree().await {
            Ok(tree) => tree
                .into_iter()
                .filter(|f| f.is_blob())
                .map(|f| (f.path, f.blob_sha))
                .collect(),
            Err(e) => {
                // An empty repository has no tree yet
                tracing::warn!(error = %e, "Remote tree unavailable, treating remote as empty");
                summary.debug.push(format!("Remote tree unavailable ({}), treating as empty", e));
                BTreeMap::new()
            }
        };

        let note_files = list_note_files(self.entries_dir)?;
        let attachment_files = list_files(self.attachments_dir)?;

        let (notes, metadata) = {
            let db = lock_database(self.db)?;
            let notes: HashMap<i64, Note> = db
                .get_all_notes()?
                .into_iter()
                .map(|n| (n.id, n))
                .collect();
            (notes, RepoMetadata::build_from_db(&db)?)
        };

        let mut tracker = ProgressTracker::new(
            self.progress,
            note_files.len() + attachment_files.len() + 1,
        );
        tracker.announce("Starting push...");

        let mut expected: HashSet<String> = HashSet::new();
        let mut reports: Vec<FileReport> = Vec::new();

        for file in &note_files {
            let note = match notes.get(&file.id) {
                Some(note) if note.trash => {
                    summary.debug.push(format!("Skipping trashed note {}", file.id));
                    tracker.step(format!("Skipping trashed note {}", file.id));
                    continue;
                }
                Some(note) if note.note_type.local_extension() != file.note_type.local_extension() => {
                    summary.warn(format!(
                        "Ignoring {}: note {} is stored as {}",
                        file.path.display(),
                        file.id,
                        note.local_file_name()
                    ));
                    tracker.step(format!("Skipping note {}", file.id));
                    continue;
                }
                Some(note) => Some(note),
                None => None,
            };

            let (path, heading) = match note {
                Some(note) => (note.remote_path(), note.heading.clone()),
                None => (note_remote_path(file.id, file.note_type), UNTITLED.to_string()),
            };
            tracker.step(format!("Pushing: {}", heading));
            expected.insert(path.clone());

            let result = match fs::read_to_string(&file.path) {
                Ok(body) => {
                    // A body without a row carries no metadata to embed
                    let content = match note {
                        Some(note) => self.repo_content(&body, note),
                        None => body,
                    };
                    self.push_file(
                        &path,
                        content.as_bytes(),
                        &format!("Update: {}", heading),
                        remote.get(&path).map(String::as_str),
                    )
                    .await
                }
                Err(e) => Err(NoteSyncError::Io(e)),
            };

            if let Err(e) = &result {
                tracing::warn!(path = %path, error = %e, "Note upload failed");
            }
            reports.push(FileReport::from_result(path, FileCategory::Note, FileOperation::Upload, result));
        }

        for (filename, local_path) in &attachment_files {
            let path = attachment_remote_path(filename);
            tracker.step(format!("Pushing attachment: {}", filename));
            expected.insert(path.clone());

            let display_name = metadata
                .attachments
                .get(filename)
                .map(|a| a.original_filename.as_str())
                .filter(|n| !n.is_empty())
                .unwrap_or(filename.as_str());

            let result = match fs::read(local_path) {
                Ok(bytes) => {
                    self.push_file(
                        &path,
                        &bytes,
                        &format!("Update attachment: {}", display_name),
                        remote.get(&path).map(String::as_str),
                    )
                    .await
                }
                Err(e) => Err(NoteSyncError::Io(e)),
            };

            if let Err(e) = &result {
                tracing::warn!(path = %path, error = %e, "Attachment upload failed");
            }
            reports.push(FileReport::from_result(
                path,
                FileCategory::Attachment,
                FileOperation::Upload,
                result,
            ));
        }

        tracker.step("Pushing metadata...");
        expected.insert(METADATA_PATH.to_string());
        let result = match metadata.to_bytes() {
            Ok(bytes) => {
                self.push_file(
                    METADATA_PATH,
                    &bytes,
                    "Update metadata",
                    remote.get(METADATA_PATH).map(String::as_str),
                )
                .await
            }
            Err(e) => Err(e),
        };
        reports.push(FileReport::from_result(
            METADATA_PATH,
            FileCategory::Metadata,
            FileOperation::Upload,
            result,
        ));

        let orphans: Vec<&String> = remote.keys().filter(|p| !expected.contains(*p)).collect();
        tracker.extend_total(orphans.len());
        tracker.announce("Cleaning up remote orphans...");

        for path in orphans {
            tracker.step(format!("Deleting: {}", path));
            let result = self
                .client
                .delete_file(path, ORPHAN_DELETE_MESSAGE)
                .await
                .map(|_| true);
            if let Err(e) = &result {
                tracing::warn!(path = %path, error = %e, "Orphan delete failed");
            }
            reports.push(FileReport::from_result(
                path.clone(),
                category_of(path),
                FileOperation::Delete,
                result,
            ));
        }

        summary.extend(reports);
        tracker.announce("Push complete!");

        tracing::info!(
            repo = %self.client.repo(),
            pushed = summary.pushed,
            attachments = summary.attachments_pushed,
            deleted = summary.deleted,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Push finished"
        );

        Ok(summary)
    }

    /// Push one note and its attachments, leaving everything else alone.
    pub async fn push_note(&self, id: i64) -> NoteSyncResult<SyncSummary> {
        let note = lock_database(self.db)?.get_note(id)?;
        let note = match note {
            Some(note) if !note.trash => note,
            _ => {
                return Err(NoteSyncError::NotFound {
                    status: 404,
                    message: format!("Note {} not found or in trash", id),
                })
            }
        };

        let mut summary = SyncSummary::started(SyncDirection::Push);
        let attachments: Vec<_> = note
            .attachments
            .iter()
            .filter(|a| !a.filename.is_empty())
            .collect();
        let mut tracker = ProgressTracker::new(self.progress, 1 + attachments.len());

        let body = fs::read_to_string(self.entries_dir.join(note.local_file_name()))?;
        let path = note.remote_path();
        tracker.step(format!("Pushing: {}", note.heading));

        let result = match self.client.get_file_sha(&path).await {
            Ok(sha) => {
                let content = self.repo_content(&body, &note);
                self.push_file(
                    &path,
                    content.as_bytes(),
                    &format!("Update: {}", note.heading),
                    sha.as_deref(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        summary.record(FileReport::from_result(path, FileCategory::Note, FileOperation::Upload, result));

        for attachment in attachments {
            let path = attachment_remote_path(&attachment.filename);
            tracker.step(format!("Pushing attachment: {}", attachment.filename));

            let local = self.attachments_dir.join(&attachment.filename);
            if !local.is_file() {
                summary.warn(format!("Attachment not found on disk: {}", attachment.filename));
                continue;
            }

            let name = if attachment.original_filename.is_empty() {
                &attachment.filename
            } else {
                &attachment.original_filename
            };
            let result = match (fs::read(&local), self.client.get_file_sha(&path).await) {
                (Ok(bytes), Ok(sha)) => {
                    self.push_file(&path, &bytes, &format!("Update attachment: {}", name), sha.as_deref())
                        .await
                }
                (Err(e), _) => Err(NoteSyncError::Io(e)),
                (_, Err(e)) => Err(e),
            };
            summary.record(FileReport::from_result(
                path,
                FileCategory::Attachment,
                FileOperation::Upload,
                result,
            ));
        }

        tracing::info!(note_id = id, pushed = summary.pushed, errors = summary.errors.len(), "Pushed note");
        Ok(summary)
    }

    /// Delete one note's body file from the remote. A file that is already
    /// gone counts as skipped.
    pub async fn delete_note_remote(
        &self,
        id: i64,
        note_type: NoteType,
        heading: &str,
    ) -> NoteSyncResult<SyncSummary> {
        let path = note_remote_path(id, note_type);
        let heading = if heading.is_empty() { UNTITLED } else { heading };

        let result = match self
            .client
            .delete_file(&path, &format!("Deleted: {}", heading))
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        };

        let mut summary = SyncSummary::started(SyncDirection::Push);
        summary.record(FileReport::from_result(path, FileCategory::Note, FileOperation::Delete, result));
        Ok(summary)
    }
}

fn category_of(path: &str) -> FileCategory {
    if path == METADATA_PATH {
        FileCategory::Metadata
    } else if path.starts_with(crate::models::ATTACHMENTS_PREFIX) {
        FileCategory::Attachment
    } else {
        FileCategory::Note
    }
}
