//! Pull: the remote repository is authoritative.
//!
//! Order of work:
//!
//! 1. list the tree and classify note bodies, attachments and the sidecar
//! 2. read `metadata.json` and recreate folders in parent-first order
//! 3. download every note body and stage it in memory
//! 4. upsert all note rows in one transaction
//! 5. write the staged bodies to the entries directory
//! 6. download attachments that are missing locally
//! 7. trash local notes that have no body on the remote
//!
//! Bodies hit the disk only after the transaction commits, so a rollback
//! leaves both the store and the entries directory as they were.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::database::{
    active_note_ids_in, folder_ids_in, get_note_in, insert_note_in, lock_database, trash_note_in,
    update_note_fields_in, upsert_folder_in, Database, NoteFields,
};
use crate::error::NoteSyncResult;
use crate::folders::{order_folders, MAX_FOLDER_PASSES};
use crate::frontmatter::{derive_heading, referenced_attachment_files, to_local_links, FrontMatterCodec};
use crate::metadata::{ParsedMetadata, RepoMetadata};
use crate::models::{
    note_local_file_name, note_remote_path, Attachment, Note, NoteType, RemoteFile, ATTACHMENTS_PREFIX,
    ENTRIES_PREFIX, METADATA_PATH, SUPPORTED_NOTE_EXTENSIONS,
};
use crate::progress::{ProgressSink, ProgressTracker, ProgressUpdate};
use crate::provider::{ProviderClient, Transport};
use crate::summary::{FileCategory, FileOperation, FileOutcome, FileReport, SyncDirection, SyncSummary};
use crate::validation::parse_note_file_name;

/// A note body present in the remote tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNoteFile {
    pub id: i64,
    pub path: String,
    /// Type implied by the file extension alone
    pub ext_type: NoteType,
}

/// The remote tree split by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedTree {
    pub notes: Vec<RemoteNoteFile>,
    /// `(filename, path)` pairs
    pub attachments: Vec<(String, String)>,
    pub has_metadata: bool,
    /// Human-readable notes about ignored entries
    pub ignored: Vec<String>,
}

impl ClassifiedTree {
    pub fn note_ids(&self) -> HashSet<i64> {
        self.notes.iter().map(|n| n.id).collect()
    }
}

/// Sort tree entries into note bodies, attachments and the sidecar.
///
/// Only direct children of `entries/` and `attachments/` count. Note files
/// need a numeric stem and a supported extension; the first file seen for
/// an id wins.
pub fn classify_tree(files: &[RemoteFile]) -> ClassifiedTree {
    let mut tree = ClassifiedTree::default();
    let mut seen_ids = HashSet::new();

    for file in files.iter().filter(|f| f.is_blob()) {
        if file.path == METADATA_PATH {
            tree.has_metadata = true;
        } else if let Some(name) = file.path.strip_prefix(ENTRIES_PREFIX) {
            if name.contains('/') {
                continue;
            }
            let Some((id, ext)) = parse_note_file_name(name) else {
                tree.ignored.push(format!("Skipping non-numeric note file {}", file.path));
                continue;
            };
            let ext = ext.to_lowercase();
            if !SUPPORTED_NOTE_EXTENSIONS.contains(&ext.as_str()) {
                tree.ignored.push(format!("Skipping unsupported note file {}", file.path));
                continue;
            }
            let Some(ext_type) = NoteType::from_repo_extension(&ext) else {
                continue;
            };
            if !seen_ids.insert(id) {
                tree.ignored.push(format!("Skipping duplicate body for note {}: {}", id, file.path));
                continue;
            }
            tree.notes.push(RemoteNoteFile {
                id,
                path: file.path.clone(),
                ext_type,
            });
        } else if let Some(name) = file.path.strip_prefix(ATTACHMENTS_PREFIX) {
            if name.is_empty() || name.contains('/') || name.starts_with('.') {
                continue;
            }
            tree.attachments.push((name.to_string(), file.path.clone()));
        }
    }

    tree
}

/// A downloaded note, ready to be applied
#[derive(Debug, Clone)]
pub struct StagedNote {
    pub id: i64,
    pub remote_path: String,
    pub ext_type: NoteType,
    /// Body in local form: front matter stripped, links rewritten
    pub body: String,
    /// Fields present in metadata or front matter
    pub fields: NoteFields,
    /// Heading derived from the body, used when inserting without one
    pub derived_heading: String,
}

/// Row change made for one staged note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedNote {
    pub id: i64,
    pub operation: FileOperation,
    pub note_type: NoteType,
}

/// Upsert staged notes on `conn`, normally an open transaction owned by
/// the caller. Any error should make the caller roll back.
pub fn apply_note_upserts(conn: &Connection, staged: &[StagedNote]) -> NoteSyncResult<Vec<AppliedNote>> {
    let mut applied = Vec::with_capacity(staged.len());

    for note in staged {
        match get_note_in(conn, note.id)? {
            Some(existing) => {
                let note_type = note.fields.note_type.unwrap_or(
                    if existing.note_type.repo_extension() == note.ext_type.repo_extension() {
                        existing.note_type
                    } else {
                        note.ext_type
                    },
                );
                let fields = NoteFields {
                    note_type: Some(note_type),
                    ..note.fields.clone()
                };
                update_note_fields_in(conn, note.id, &fields)?;
                applied.push(AppliedNote {
                    id: note.id,
                    operation: FileOperation::Update,
                    note_type,
                });
            }
            None => {
                let note_type = note.fields.note_type.unwrap_or(note.ext_type);
                let fallback = Note::new(note.id, note.derived_heading.clone(), note_type);
                let row = note.fields.clone().into_note(note.id, fallback);
                insert_note_in(conn, &row)?;
                applied.push(AppliedNote {
                    id: note.id,
                    operation: FileOperation::Insert,
                    note_type,
                });
            }
        }
    }

    Ok(applied)
}

/// Pull engine over one provider client and local store
pub struct PullEngine<'a, T: Transport> {
    pub client: &'a ProviderClient<T>,
    pub db: &'a Mutex<Database>,
    pub entries_dir: &'a Path,
    pub attachments_dir: &'a Path,
    pub codec: &'a dyn FrontMatterCodec,
    pub progress: &'a dyn ProgressSink,
}

impl<'a, T: Transport> PullEngine<'a, T> {
    /// Make the local store match the remote.
    ///
    /// Per-file failures end up in the summary. A failure while applying
    /// note rows rolls all of them back and aborts the run.
    pub async fn run(&self) -> NoteSyncResult<SyncSummary> {
        let mut summary = SyncSummary::started(SyncDirection::Pull);
        self.progress
            .report(ProgressUpdate::new(0, 0, "Listing remote files..."));

        let (tree, listing_ok) = match self.client.get_tree().await {
            Ok(files) => (classify_tree(&files), true),
            Err(e) => {
                // An empty repository has no tree yet
                tracing::warn!(error = %e, "Remote tree unavailable, treating remote as empty");
                summary.warn(format!("Could not list remote files: {}", e));
                (ClassifiedTree::default(), false)
            }
        };
        for line in &tree.ignored {
            summary.debug.push(line.clone());
        }

        let mut tracker = ProgressTracker::new(
            self.progress,
            tree.notes.len() + tree.attachments.len() + 3,
        );
        tracker.announce("Starting pull...");

        // Sidecar
        tracker.step("Reading metadata...");
        let metadata = if tree.has_metadata {
            match self.fetch_metadata().await {
                Ok(parsed) => {
                    if parsed.legacy {
                        summary.debug.push("metadata.json uses the legacy flat shape".to_string());
                    }
                    for warning in parsed.warnings {
                        summary.warn(warning);
                    }
                    parsed.metadata
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read metadata.json");
                    summary.record(FileReport::new(
                        METADATA_PATH,
                        FileCategory::Metadata,
                        FileOperation::Download,
                        FileOutcome::Failed(e.to_string()),
                    ));
                    RepoMetadata::default()
                }
            }
        } else {
            RepoMetadata::default()
        };

        // Folders
        tracker.step("Recreating folders...");
        self.apply_folders(&metadata, &mut summary)?;

        // Bodies, staged in memory
        let mut staged = Vec::with_capacity(tree.notes.len());
        for remote in &tree.notes {
            tracker.step(format!("Pulling: {}", remote.path));
            match self.client.get_file_content(&remote.path).await {
                Ok(file) => staged.push(self.stage_note(remote, &file.content, &metadata)),
                Err(e) => {
                    tracing::warn!(path = %remote.path, error = %e, "Note download failed");
                    summary.record(FileReport::new(
                        remote.path.clone(),
                        FileCategory::Note,
                        FileOperation::Download,
                        FileOutcome::Failed(e.to_string()),
                    ));
                }
            }
        }

        // Rows, all or nothing
        let applied = {
            let mut db = lock_database(self.db)?;
            let tx = db.transaction()?;
            let applied = apply_note_upserts(&tx, &staged)?;
            tx.commit()?;
            applied
        };

        // Bodies, after commit
        if !staged.is_empty() {
            fs::create_dir_all(self.entries_dir)?;
        }
        for (note, change) in staged.iter().zip(&applied) {
            let file_name = note_local_file_name(note.id, change.note_type);
            let result = fs::write(self.entries_dir.join(&file_name), note.body.as_bytes()).map(|_| true);
            if let Err(e) = &result {
                tracing::warn!(file = %file_name, error = %e, "Writing note body failed");
            }
            summary.record(FileReport::from_result(
                note.remote_path.clone(),
                FileCategory::Note,
                change.operation,
                result,
            ));
        }

        // Attachments, first write wins
        if !tree.attachments.is_empty() {
            fs::create_dir_all(self.attachments_dir)?;
        }
        for (filename, path) in &tree.attachments {
            tracker.step(format!("Pulling attachment: {}", filename));
            let result = self.download_attachment(filename, path).await;
            if let Err(e) = &result {
                tracing::warn!(path = %path, error = %e, "Attachment download failed");
            }
            summary.record(FileReport::from_result(
                path.clone(),
                FileCategory::Attachment,
                FileOperation::Download,
                result,
            ));
        }

        // Local orphans
        tracker.step("Reconciling local notes...");
        if listing_ok {
            self.trash_orphans(&tree.note_ids(), &mut summary)?;
        } else {
            summary.warn("Remote listing failed; local notes were not reconciled");
        }

        tracker.announce("Pull complete!");
        tracing::info!(
            repo = %self.client.repo(),
            pulled = summary.pulled,
            updated = summary.updated,
            attachments = summary.attachments_pulled,
            trashed = summary.deleted,
            errors = summary.errors.len(),
            "Pull finished"
        );

        Ok(summary)
    }

    async fn fetch_metadata(&self) -> NoteSyncResult<ParsedMetadata> {
        let file = self.client.get_file_content(METADATA_PATH).await?;
        RepoMetadata::parse(&file.content)
    }

    /// Insert or update folders in parent-first order. Folders whose parent
    /// never resolves are reported as warnings.
    fn apply_folders(&self, metadata: &RepoMetadata, summary: &mut SyncSummary) -> NoteSyncResult<()> {
        if metadata.folders.is_empty() {
            return Ok(());
        }

        let db = lock_database(self.db)?;
        let existing = folder_ids_in(db.connection())?;
        let order = order_folders(&metadata.folders, &existing, MAX_FOLDER_PASSES);

        for folder in &order.ordered {
            let path = format!("folders/{}", folder.id);
            let (operation, result) = match db.get_folder(folder.id) {
                Ok(Some(current)) if &current == folder => (FileOperation::Update, Ok(false)),
                Ok(Some(_)) => (FileOperation::Update, upsert_folder_in(db.connection(), folder).map(|_| true)),
                Ok(None) => (FileOperation::Insert, upsert_folder_in(db.connection(), folder).map(|_| true)),
                Err(e) => (FileOperation::Update, Err(e)),
            };
            summary.record(FileReport::from_result(path, FileCategory::Folder, operation, result));
        }

        for folder in &order.unresolved {
            summary.warn(format!(
                "Folder {} ({}) skipped: parent {:?} could not be resolved",
                folder.id, folder.name, folder.parent_id
            ));
        }
        Ok(())
    }

    /// Turn downloaded bytes into a staged note: metadata fields first,
    /// then front matter, with content-derived fallbacks for inserts.
    fn stage_note(&self, remote: &RemoteNoteFile, raw: &[u8], metadata: &RepoMetadata) -> StagedNote {
        let content = String::from_utf8_lossy(raw);
        let (front_matter, body) = self.codec.extract(&content);

        let from_metadata = metadata
            .note(remote.id)
            .cloned()
            .map(|m| m.into_fields())
            .unwrap_or_default();
        let from_front_matter = front_matter.map(|fm| fm.into_fields()).unwrap_or_default();
        let mut fields = from_metadata.or(from_front_matter);

        // Cached folder name from the folder table when only the id is known
        if let Some(Some(folder_id)) = fields.folder_id {
            if fields.folder.is_none() {
                if let Some(folder) = metadata.folders.iter().find(|f| f.id == folder_id) {
                    fields.folder = Some(Some(folder.name.clone()));
                }
            }
        }

        if fields.attachments.is_none() {
            let rebuilt = reconstruct_attachments(&body, &remote.path, metadata);
            if !rebuilt.is_empty() {
                fields.attachments = Some(rebuilt);
            }
        }

        let mut file_to_id: HashMap<String, String> = metadata
            .attachments
            .iter()
            .filter(|(_, m)| !m.id.is_empty())
            .map(|(name, m)| (name.clone(), m.id.clone()))
            .collect();
        for att in fields.attachments.iter().flatten() {
            if !att.id.is_empty() {
                file_to_id.insert(att.filename.clone(), att.id.clone());
            }
        }

        let note_type = fields.note_type.unwrap_or(remote.ext_type);
        let derived_heading = derive_heading(&body, note_type);
        let body = to_local_links(&body, remote.id, &file_to_id);

        StagedNote {
            id: remote.id,
            remote_path: remote.path.clone(),
            ext_type: remote.ext_type,
            body,
            fields,
            derived_heading,
        }
    }

    /// Download one attachment unless a file with that name already exists.
    async fn download_attachment(&self, filename: &str, path: &str) -> NoteSyncResult<bool> {
        let local = self.attachments_dir.join(filename);
        if local.exists() {
            return Ok(false);
        }
        let file = self.client.get_file_content(path).await?;
        fs::write(&local, &file.content)?;
        Ok(true)
    }

    /// Trash every active local note whose id has no body on the remote.
    fn trash_orphans(&self, remote_ids: &HashSet<i64>, summary: &mut SyncSummary) -> NoteSyncResult<()> {
        let db = lock_database(self.db)?;
        for id in active_note_ids_in(db.connection())? {
            if remote_ids.contains(&id) {
                continue;
            }
            let path = db
                .get_note(id)?
                .map(|n| n.remote_path())
                .unwrap_or_else(|| note_remote_path(id, NoteType::default()));
            let result = trash_note_in(db.connection(), id);
            summary.record(FileReport::from_result(path, FileCategory::Note, FileOperation::Trash, result));
        }
        Ok(())
    }
}

/// Attachment list for a note without one in its metadata: files
/// referenced from the body, then files whose recorded owner is this
/// note's path.
pub fn reconstruct_attachments(body: &str, note_path: &str, metadata: &RepoMetadata) -> Vec<Attachment> {
    let mut by_name: BTreeMap<String, usize> = BTreeMap::new();
    let mut attachments: Vec<Attachment> = Vec::new();

    for filename in referenced_attachment_files(body) {
        if let Some(meta) = metadata.attachments.get(&filename) {
            by_name.insert(filename.clone(), attachments.len());
            attachments.push(meta.to_attachment(&filename));
        }
    }
    for attachment in metadata.attachments_for_path(note_path) {
        if !by_name.contains_key(&attachment.filename) {
            by_name.insert(attachment.filename.clone(), attachments.len());
            attachments.push(attachment);
        }
    }

    attachments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::AttachmentMetadata;
    use crate::models::RemoteKind;

    fn blob(path: &str) -> RemoteFile {
        RemoteFile {
            path: path.to_string(),
            blob_sha: "0".repeat(40),
            kind: RemoteKind::Blob,
        }
    }

    #[test]
    fn test_classify_tree() {
        let files = vec![
            blob("entries/1.md"),
            blob("entries/2.html"),
            blob("entries/3.json"),
            blob("entries/4.txt"),
            blob("entries/readme.md"),
            blob("entries/5.pdf"),
            blob("entries/1.html"),
            blob("entries/sub/6.md"),
            blob("attachments/a.png"),
            blob("attachments/.hidden"),
            blob("metadata.json"),
            blob("README.md"),
            RemoteFile {
                path: "entries".to_string(),
                blob_sha: String::new(),
                kind: RemoteKind::Tree,
            },
        ];
        let tree = classify_tree(&files);

        let ids: Vec<i64> = tree.notes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(tree.notes[0].ext_type, NoteType::Markdown);
        assert_eq!(tree.notes[1].ext_type, NoteType::Note);
        assert_eq!(tree.notes[2].ext_type, NoteType::Tasklist);
        assert_eq!(tree.notes[3].ext_type, NoteType::Markdown);
        assert_eq!(tree.attachments, vec![("a.png".to_string(), "attachments/a.png".to_string())]);
        assert!(tree.has_metadata);
        assert_eq!(tree.ignored.len(), 3);
    }

    fn staged(id: i64, fields: NoteFields) -> StagedNote {
        StagedNote {
            id,
            remote_path: format!("entries/{}.md", id),
            ext_type: NoteType::Markdown,
            body: "body".to_string(),
            fields,
            derived_heading: "Derived".to_string(),
        }
    }

    #[test]
    fn test_apply_inserts_with_fallbacks_and_updates_partially() {
        let mut db = Database::new_in_memory().unwrap();
        let mut existing = Note::new(1, "Keep me", NoteType::Markdown);
        existing.tags = "old".to_string();
        existing.trash = true;
        db.insert_note(&existing).unwrap();

        let notes = vec![
            staged(
                1,
                NoteFields {
                    tags: Some("new".to_string()),
                    ..Default::default()
                },
            ),
            staged(2, NoteFields::default()),
        ];

        let tx = db.transaction().unwrap();
        let applied = apply_note_upserts(&tx, &notes).unwrap();
        tx.commit().unwrap();

        assert_eq!(applied[0].operation, FileOperation::Update);
        assert_eq!(applied[1].operation, FileOperation::Insert);

        let one = db.get_note(1).unwrap().unwrap();
        assert_eq!(one.heading, "Keep me");
        assert_eq!(one.tags, "new");
        assert!(!one.trash);

        let two = db.get_note(2).unwrap().unwrap();
        assert_eq!(two.heading, "Derived");
        assert_eq!(two.note_type, NoteType::Markdown);
    }

    #[test]
    fn test_apply_keeps_existing_type_with_same_extension() {
        let mut db = Database::new_in_memory().unwrap();
        db.insert_note(&Note::new(1, "Drawing", NoteType::Excalidraw)).unwrap();

        let mut note = staged(1, NoteFields::default());
        note.ext_type = NoteType::Tasklist;

        let tx = db.transaction().unwrap();
        let applied = apply_note_upserts(&tx, &[note]).unwrap();
        tx.commit().unwrap();

        assert_eq!(applied[0].note_type, NoteType::Excalidraw);
        assert_eq!(db.get_note(1).unwrap().unwrap().note_type, NoteType::Excalidraw);
    }

    #[test]
    fn test_apply_error_rolls_back_when_uncommitted() {
        let mut db = Database::new_in_memory().unwrap();
        db.connection()
            .execute_batch(
                "CREATE TRIGGER reject_seven BEFORE INSERT ON notes WHEN NEW.id = 7
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let notes = vec![staged(1, NoteFields::default()), staged(7, NoteFields::default())];
        {
            let tx = db.transaction().unwrap();
            assert!(apply_note_upserts(&tx, &notes).is_err());
        }
        assert!(db.get_note(1).unwrap().is_none());
    }

    #[test]
    fn test_reconstruct_attachments() {
        let mut metadata = RepoMetadata::default();
        for (name, owner) in [
            ("a.png", Some("entries/1.html")),
            ("b.png", None),
            ("c.png", Some("entries/1.html")),
            ("d.png", Some("entries/2.html")),
        ] {
            metadata.attachments.insert(
                name.to_string(),
                AttachmentMetadata {
                    id: format!("id-{}", name),
                    note_path: owner.map(str::to_string),
                    ..Default::default()
                },
            );
        }

        let body = r#"<img src="../attachments/b.png"><img src="../attachments/a.png"><img src="../attachments/zz.png">"#;
        let rebuilt = reconstruct_attachments(body, "entries/1.html", &metadata);
        let names: Vec<&str> = rebuilt.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["b.png", "a.png", "c.png"]);
        assert_eq!(rebuilt[0].id, "id-b.png");
    }
}
