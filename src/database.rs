//! Database operations for notesync.
//!
//! The local note store: note rows, folder rows and a key-value settings
//! table, in SQLite. Note bodies are not stored here; they live in the
//! entries directory as `{id}.{ext}`.
//!
//! Row helpers are free functions over `&Connection` so the pull engine can
//! run them inside a `Transaction` it owns. `Database` methods delegate to
//! them for everything else.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};

use crate::error::{NoteSyncError, NoteSyncResult};
use crate::models::{Attachment, Folder, Note, NoteType, DEFAULT_WORKSPACE};

/// Settings key holding the last sync summary (single slot)
pub const SETTING_LAST_SYNC: &str = "git_last_sync";

/// Settings key for the auto-push flag
pub const SETTING_AUTO_PUSH: &str = "git_sync_auto_push";

/// Settings key for the auto-pull flag
pub const SETTING_AUTO_PULL: &str = "git_sync_auto_pull";

const NOTE_COLUMNS: &str = "id, heading, type, tags, folder_id, folder, workspace, attachments, \
                            favorite, created, updated, trash";

const FOLDER_COLUMNS: &str = "id, name, workspace, parent_id, icon, icon_color";

/// Store handle shared between the application and sync runs
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock a shared store. Never hold the guard across an `.await`.
pub fn lock_database(db: &Mutex<Database>) -> NoteSyncResult<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|e| NoteSyncError::database_op(format!("Database lock poisoned: {}", e)))
}

/// Fields of a note row that a remote snapshot may carry.
///
/// `None` means "not present in the snapshot": an update leaves that
/// column alone. `folder_id: Some(None)` explicitly clears the folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteFields {
    pub heading: Option<String>,
    pub note_type: Option<NoteType>,
    pub tags: Option<String>,
    pub folder_id: Option<Option<i64>>,
    pub folder: Option<Option<String>>,
    pub workspace: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub favorite: Option<bool>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

impl NoteFields {
    /// Field-wise merge: values present in `self` win
    pub fn or(self, other: NoteFields) -> NoteFields {
        NoteFields {
            heading: self.heading.or(other.heading),
            note_type: self.note_type.or(other.note_type),
            tags: self.tags.or(other.tags),
            folder_id: self.folder_id.or(other.folder_id),
            folder: self.folder.or(other.folder),
            workspace: self.workspace.or(other.workspace),
            attachments: self.attachments.or(other.attachments),
            favorite: self.favorite.or(other.favorite),
            created: self.created.or(other.created),
            updated: self.updated.or(other.updated),
        }
    }

    /// Build a complete row from these fields, using `fallback` for
    /// anything absent.
    pub fn into_note(self, id: i64, fallback: Note) -> Note {
        Note {
            id,
            heading: self.heading.unwrap_or(fallback.heading),
            note_type: self.note_type.unwrap_or(fallback.note_type),
            tags: self.tags.unwrap_or(fallback.tags),
            folder_id: self.folder_id.unwrap_or(fallback.folder_id),
            folder: self.folder.unwrap_or(fallback.folder),
            workspace: self.workspace.unwrap_or(fallback.workspace),
            attachments: self.attachments.unwrap_or(fallback.attachments),
            favorite: self.favorite.unwrap_or(fallback.favorite),
            created: self.created.unwrap_or(fallback.created),
            updated: self.updated.unwrap_or(fallback.updated),
            trash: false,
        }
    }
}

fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    let type_name: String = row.get(2)?;
    let attachments_json: Option<String> = row.get(7)?;
    let attachments = attachments_json
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str::<Vec<Attachment>>(s).ok())
        .unwrap_or_default();

    Ok(Note {
        id: row.get(0)?,
        heading: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        note_type: NoteType::parse(&type_name).unwrap_or_default(),
        tags: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        folder_id: row.get(4)?,
        folder: row.get(5)?,
        workspace: row
            .get::<_, Option<String>>(6)?
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
        attachments,
        favorite: row.get::<_, i64>(8)? != 0,
        created: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        updated: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        trash: row.get::<_, i64>(11)? != 0,
    })
}

fn row_to_folder(row: &Row) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        workspace: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string()),
        parent_id: row.get(3)?,
        icon: row.get(4)?,
        icon_color: row.get(5)?,
    })
}

fn attachments_to_json(attachments: &[Attachment]) -> NoteSyncResult<Option<String>> {
    if attachments.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(attachments)?))
    }
}

/// Get a note row by id, trashed or not
pub fn get_note_in(conn: &Connection, id: i64) -> NoteSyncResult<Option<Note>> {
    let sql = format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_note).optional()?)
}

/// Insert a full note row with an explicit id
pub fn insert_note_in(conn: &Connection, note: &Note) -> NoteSyncResult<()> {
    let sql = format!(
        "INSERT INTO notes ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        NOTE_COLUMNS
    );
    conn.execute(
        &sql,
        params![
            note.id,
            note.heading,
            note.note_type.as_str(),
            note.tags,
            note.folder_id,
            note.folder,
            note.workspace,
            attachments_to_json(&note.attachments)?,
            note.favorite as i64,
            note.created,
            note.updated,
            note.trash as i64,
        ],
    )?;
    Ok(())
}

/// Update only the present fields of a note and clear its trash flag.
///
/// Returns false if no row has that id.
pub fn update_note_fields_in(conn: &Connection, id: i64, fields: &NoteFields) -> NoteSyncResult<bool> {
    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    if let Some(heading) = &fields.heading {
        columns.push("heading");
        values.push(SqlValue::Text(heading.clone()));
    }
    if let Some(note_type) = fields.note_type {
        columns.push("type");
        values.push(SqlValue::Text(note_type.as_str().to_string()));
    }
    if let Some(tags) = &fields.tags {
        columns.push("tags");
        values.push(SqlValue::Text(tags.clone()));
    }
    if let Some(folder_id) = fields.folder_id {
        columns.push("folder_id");
        values.push(folder_id.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
    }
    if let Some(folder) = &fields.folder {
        columns.push("folder");
        values.push(folder.clone().map(SqlValue::Text).unwrap_or(SqlValue::Null));
    }
    if let Some(workspace) = &fields.workspace {
        columns.push("workspace");
        values.push(SqlValue::Text(workspace.clone()));
    }
    if let Some(attachments) = &fields.attachments {
        columns.push("attachments");
        values.push(
            attachments_to_json(attachments)?
                .map(SqlValue::Text)
                .unwrap_or(SqlValue::Null),
        );
    }
    if let Some(favorite) = fields.favorite {
        columns.push("favorite");
        values.push(SqlValue::Integer(favorite as i64));
    }
    if let Some(created) = &fields.created {
        columns.push("created");
        values.push(SqlValue::Text(created.clone()));
    }
    if let Some(updated) = &fields.updated {
        columns.push("updated");
        values.push(SqlValue::Text(updated.clone()));
    }

    let mut assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", c)).collect();
    assignments.push("trash = 0".to_string());
    values.push(SqlValue::Integer(id));

    let sql = format!("UPDATE notes SET {} WHERE id = ?", assignments.join(", "));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed > 0)
}

/// Soft-delete a note. Returns false if it was missing or already trashed.
pub fn trash_note_in(conn: &Connection, id: i64) -> NoteSyncResult<bool> {
    let changed = conn.execute("UPDATE notes SET trash = 1 WHERE id = ? AND trash = 0", params![id])?;
    Ok(changed > 0)
}

/// Ids of all non-trashed notes
pub fn active_note_ids_in(conn: &Connection) -> NoteSyncResult<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM notes WHERE trash = 0 ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Insert a folder, or overwrite the row with the same id
pub fn upsert_folder_in(conn: &Connection, folder: &Folder) -> NoteSyncResult<()> {
    conn.execute(
        r#"
        INSERT INTO folders (id, name, workspace, parent_id, icon, icon_color)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            workspace = excluded.workspace,
            parent_id = excluded.parent_id,
            icon = excluded.icon,
            icon_color = excluded.icon_color
        "#,
        params![
            folder.id,
            folder.name,
            folder.workspace,
            folder.parent_id,
            folder.icon,
            folder.icon_color,
        ],
    )?;
    Ok(())
}

/// Ids of every folder row
pub fn folder_ids_in(conn: &Connection) -> NoteSyncResult<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM folders")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(db_path: P) -> NoteSyncResult<Self> {
        let conn = Connection::open(db_path)?;

        // WAL lets the application read while a sync writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> NoteSyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_database()?;
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_database(&mut self) -> NoteSyncResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notes (
                id INTEGER PRIMARY KEY,
                heading TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL DEFAULT 'note',
                tags TEXT NOT NULL DEFAULT '',
                folder_id INTEGER,
                folder TEXT,
                workspace TEXT NOT NULL DEFAULT 'Notes',
                attachments TEXT,
                favorite INTEGER NOT NULL DEFAULT 0,
                created TEXT NOT NULL DEFAULT (datetime('now')),
                updated TEXT NOT NULL DEFAULT (datetime('now')),
                trash INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS folders (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                workspace TEXT NOT NULL DEFAULT 'Notes',
                parent_id INTEGER,
                icon TEXT,
                icon_color TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_notes_trash ON notes(trash);
            CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);
            "#,
        )?;
        Ok(())
    }

    /// Get the underlying connection (for advanced operations)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction. Committing is up to the caller; dropping it
    /// rolls back.
    pub fn transaction(&mut self) -> NoteSyncResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    // ========================================================================
    // Notes
    // ========================================================================

    /// Get all non-trashed notes ordered by id
    pub fn get_active_notes(&self) -> NoteSyncResult<Vec<Note>> {
        let sql = format!("SELECT {} FROM notes WHERE trash = 0 ORDER BY id", NOTE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let notes = stmt
            .query_map([], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Get all notes including trashed ones
    pub fn get_all_notes(&self) -> NoteSyncResult<Vec<Note>> {
        let sql = format!("SELECT {} FROM notes ORDER BY id", NOTE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let notes = stmt
            .query_map([], row_to_note)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    pub fn get_note(&self, id: i64) -> NoteSyncResult<Option<Note>> {
        get_note_in(&self.conn, id)
    }

    pub fn insert_note(&self, note: &Note) -> NoteSyncResult<()> {
        insert_note_in(&self.conn, note)
    }

    pub fn update_note_fields(&self, id: i64, fields: &NoteFields) -> NoteSyncResult<bool> {
        update_note_fields_in(&self.conn, id, fields)
    }

    pub fn trash_note(&self, id: i64) -> NoteSyncResult<bool> {
        trash_note_in(&self.conn, id)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub fn get_all_folders(&self) -> NoteSyncResult<Vec<Folder>> {
        let sql = format!("SELECT {} FROM folders ORDER BY id", FOLDER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let folders = stmt
            .query_map([], row_to_folder)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    pub fn get_folder(&self, id: i64) -> NoteSyncResult<Option<Folder>> {
        let sql = format!("SELECT {} FROM folders WHERE id = ?", FOLDER_COLUMNS);
        Ok(self.conn.query_row(&sql, params![id], row_to_folder).optional()?)
    }

    pub fn upsert_folder(&self, folder: &Folder) -> NoteSyncResult<()> {
        upsert_folder_in(&self.conn, folder)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_setting(&self, key: &str) -> NoteSyncResult<Option<String>> {
        let value: Option<Option<String>> = self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?", params![key], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> NoteSyncResult<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read a boolean flag; `"1"` and `"true"` are enabled, anything else
    /// (including absent) is disabled
    pub fn get_flag(&self, key: &str) -> NoteSyncResult<bool> {
        Ok(matches!(
            self.get_setting(key)?.as_deref().map(str::trim),
            Some("1") | Some("true")
        ))
    }

    pub fn set_flag(&self, key: &str, enabled: bool) -> NoteSyncResult<()> {
        self.set_setting(key, if enabled { "1" } else { "0" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note(id: i64) -> Note {
        let mut note = Note::new(id, format!("Note {}", id), NoteType::Markdown);
        note.tags = "work,ideas".to_string();
        note.created = "2024-01-02 03:04:05".to_string();
        note.updated = "2024-01-03 03:04:05".to_string();
        note
    }

    #[test]
    fn test_insert_and_get_note() {
        let db = Database::new_in_memory().unwrap();
        let mut note = sample_note(7);
        note.attachments.push(Attachment {
            id: "a1".to_string(),
            filename: "a1.png".to_string(),
            ..Default::default()
        });
        db.insert_note(&note).unwrap();

        let loaded = db.get_note(7).unwrap().unwrap();
        assert_eq!(loaded, note);
        assert!(db.get_note(8).unwrap().is_none());
    }

    #[test]
    fn test_partial_update_touches_only_present_fields() {
        let db = Database::new_in_memory().unwrap();
        let mut note = sample_note(1);
        note.favorite = true;
        note.folder_id = Some(3);
        note.trash = true;
        db.insert_note(&note).unwrap();

        let fields = NoteFields {
            heading: Some("Renamed".to_string()),
            ..Default::default()
        };
        assert!(db.update_note_fields(1, &fields).unwrap());

        let loaded = db.get_note(1).unwrap().unwrap();
        assert_eq!(loaded.heading, "Renamed");
        assert_eq!(loaded.tags, "work,ideas");
        assert!(loaded.favorite);
        assert_eq!(loaded.folder_id, Some(3));
        assert!(!loaded.trash);
    }

    #[test]
    fn test_update_can_clear_folder() {
        let db = Database::new_in_memory().unwrap();
        let mut note = sample_note(1);
        note.folder_id = Some(3);
        note.folder = Some("Work".to_string());
        db.insert_note(&note).unwrap();

        let fields = NoteFields {
            folder_id: Some(None),
            folder: Some(None),
            ..Default::default()
        };
        db.update_note_fields(1, &fields).unwrap();

        let loaded = db.get_note(1).unwrap().unwrap();
        assert_eq!(loaded.folder_id, None);
        assert_eq!(loaded.folder, None);
    }

    #[test]
    fn test_fields_merge_prefers_self() {
        let primary = NoteFields {
            heading: Some("From metadata".to_string()),
            folder_id: Some(None),
            ..Default::default()
        };
        let secondary = NoteFields {
            heading: Some("From front matter".to_string()),
            tags: Some("a".to_string()),
            folder_id: Some(Some(4)),
            ..Default::default()
        };
        let merged = primary.or(secondary);
        assert_eq!(merged.heading.as_deref(), Some("From metadata"));
        assert_eq!(merged.tags.as_deref(), Some("a"));
        assert_eq!(merged.folder_id, Some(None));
    }

    #[test]
    fn test_update_missing_note_returns_false() {
        let db = Database::new_in_memory().unwrap();
        assert!(!db.update_note_fields(99, &NoteFields::default()).unwrap());
    }

    #[test]
    fn test_trash_note() {
        let db = Database::new_in_memory().unwrap();
        db.insert_note(&sample_note(1)).unwrap();
        db.insert_note(&sample_note(2)).unwrap();

        assert!(db.trash_note(1).unwrap());
        assert!(!db.trash_note(1).unwrap());
        assert_eq!(active_note_ids_in(db.connection()).unwrap(), vec![2]);
        assert_eq!(db.get_active_notes().unwrap().len(), 1);
        assert_eq!(db.get_all_notes().unwrap().len(), 2);
    }

    #[test]
    fn test_transaction_rollback_discards_upserts() {
        let mut db = Database::new_in_memory().unwrap();
        {
            let tx = db.transaction().unwrap();
            insert_note_in(&tx, &sample_note(1)).unwrap();
            // dropped without commit
        }
        assert!(db.get_note(1).unwrap().is_none());

        let tx = db.transaction().unwrap();
        insert_note_in(&tx, &sample_note(2)).unwrap();
        tx.commit().unwrap();
        assert!(db.get_note(2).unwrap().is_some());
    }

    #[test]
    fn test_folder_upsert() {
        let db = Database::new_in_memory().unwrap();
        db.upsert_folder(&Folder::new(1, "Work", None)).unwrap();
        db.upsert_folder(&Folder::new(2, "Projects", Some(1))).unwrap();
        db.upsert_folder(&Folder::new(1, "Job", None)).unwrap();

        let folders = db.get_all_folders().unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(db.get_folder(1).unwrap().unwrap().name, "Job");
        assert_eq!(db.get_folder(2).unwrap().unwrap().parent_id, Some(1));
        assert_eq!(folder_ids_in(db.connection()).unwrap(), HashSet::from([1, 2]));
    }

    #[test]
    fn test_settings_and_flags() {
        let db = Database::new_in_memory().unwrap();
        assert_eq!(db.get_setting(SETTING_LAST_SYNC).unwrap(), None);
        assert!(!db.get_flag(SETTING_AUTO_PUSH).unwrap());

        db.set_flag(SETTING_AUTO_PUSH, true).unwrap();
        assert!(db.get_flag(SETTING_AUTO_PUSH).unwrap());
        db.set_flag(SETTING_AUTO_PUSH, false).unwrap();
        assert!(!db.get_flag(SETTING_AUTO_PUSH).unwrap());

        db.set_setting(SETTING_AUTO_PULL, "true").unwrap();
        assert!(db.get_flag(SETTING_AUTO_PULL).unwrap());

        db.set_setting(SETTING_LAST_SYNC, "{}").unwrap();
        db.set_setting(SETTING_LAST_SYNC, "{\"a\":1}").unwrap();
        assert_eq!(db.get_setting(SETTING_LAST_SYNC).unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn test_database_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");
        {
            let db = Database::new(&path).unwrap();
            db.insert_note(&sample_note(5)).unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.get_note(5).unwrap().unwrap().heading, "Note 5");
    }
}
