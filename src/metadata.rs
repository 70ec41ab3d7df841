//! The `metadata.json` sidecar.
//!
//! Carries the per-note fields a plain body file cannot hold (tags, folder
//! placement, favorite, timestamps), the complete folder table, and an
//! attachment index used to re-associate attachments with notes on pull.
//!
//! Shape written:
//!
//! ```json
//! { "notes": { "12": { "heading": "...", ... } },
//!   "folders": [ { "id": 1, "name": "Work", "parent_id": null, ... } ],
//!   "attachments": { "img.png": { "id": "...", "note_path": "entries/12.html", ... } } }
//! ```
//!
//! Older repositories hold a flat `{ "12": { ... } }` map; it is read as
//! the `notes` section with no folders.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::database::{Database, NoteFields};
use crate::error::{NoteSyncError, NoteSyncResult};
use crate::models::{Attachment, Folder, Note, NoteType};
use crate::validation::normalize_timestamp;

/// Deserialize a field that may be present-but-null.
fn present<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Folder id as a number or numeric string; `null` clears it.
fn lenient_id<'de, D>(de: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(de)?;
    Ok(Some(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

/// Tags as a comma-separated string or a list of strings.
fn lenient_tags<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    })
}

/// Favorite as a bool, 0/1, or "0"/"1".
fn lenient_bool<'de, D>(de: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(de)?;
    Ok(match value {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" | "" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Per-note fields in the sidecar. Every field is optional on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub note_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub folder: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, deserialize_with = "lenient_bool", skip_serializing_if = "Option::is_none")]
    pub favorite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl NoteMetadata {
    /// Snapshot of a note row
    pub fn from_note(note: &Note) -> Self {
        Self {
            heading: Some(note.heading.clone()),
            note_type: Some(note.note_type.as_str().to_string()),
            tags: Some(note.tags.clone()),
            folder_id: Some(note.folder_id),
            folder: Some(note.folder.clone()),
            workspace: Some(note.workspace.clone()),
            attachments: Some(note.attachments.clone()),
            favorite: Some(note.favorite),
            created: Some(note.created.clone()),
            updated: Some(note.updated.clone()),
        }
    }

    /// Convert to row fields. Empty headings and unparseable types or
    /// timestamps count as absent.
    pub fn into_fields(self) -> NoteFields {
        NoteFields {
            heading: self.heading.filter(|h| !h.trim().is_empty()),
            note_type: self.note_type.as_deref().and_then(NoteType::parse),
            tags: self.tags,
            folder_id: self.folder_id,
            folder: self.folder.map(|f| f.filter(|name| !name.is_empty())),
            workspace: self.workspace.filter(|w| !w.trim().is_empty()),
            attachments: self.attachments,
            favorite: self.favorite,
            created: self.created.as_deref().and_then(normalize_timestamp),
            updated: self.updated.as_deref().and_then(normalize_timestamp),
        }
    }
}

/// Attachment index entry, keyed by filename in the sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub uploaded_at: String,
    /// Repository path of the note that owns the attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_path: Option<String>,
}

impl AttachmentMetadata {
    pub fn to_attachment(&self, filename: &str) -> Attachment {
        Attachment {
            id: self.id.clone(),
            filename: filename.to_string(),
            original_filename: self.original_filename.clone(),
            file_size: self.file_size,
            file_type: self.file_type.clone(),
            uploaded_at: self.uploaded_at.clone(),
            note_path: self.note_path.clone(),
        }
    }
}

/// Normalized sidecar contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetadata {
    #[serde(default)]
    pub notes: BTreeMap<String, NoteMetadata>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, AttachmentMetadata>,
}

/// Result of parsing a sidecar: the normalized content plus entries that
/// had to be skipped
#[derive(Debug, Clone, Default)]
pub struct ParsedMetadata {
    pub metadata: RepoMetadata,
    pub legacy: bool,
    pub warnings: Vec<String>,
}

impl RepoMetadata {
    /// Snapshot of non-trashed notes and the full folder table
    pub fn build(notes: &[Note], folders: &[Folder]) -> Self {
        let mut metadata = RepoMetadata::default();

        for note in notes.iter().filter(|n| !n.trash) {
            let note_path = note.remote_path();
            for attachment in &note.attachments {
                if attachment.filename.is_empty() {
                    continue;
                }
                metadata.attachments.insert(
                    attachment.filename.clone(),
                    AttachmentMetadata {
                        id: attachment.id.clone(),
                        original_filename: attachment.original_filename.clone(),
                        file_size: attachment.file_size,
                        file_type: attachment.file_type.clone(),
                        uploaded_at: attachment.uploaded_at.clone(),
                        note_path: Some(note_path.clone()),
                    },
                );
            }
            metadata
                .notes
                .insert(note.id.to_string(), NoteMetadata::from_note(note));
        }

        let mut folders = folders.to_vec();
        folders.sort_by_key(|f| f.id);
        metadata.folders = folders;
        metadata
    }

    /// Snapshot straight from the store
    pub fn build_from_db(db: &Database) -> NoteSyncResult<Self> {
        Ok(Self::build(&db.get_active_notes()?, &db.get_all_folders()?))
    }

    /// Pretty JSON with stable key order, so an unchanged store produces
    /// identical bytes
    pub fn to_bytes(&self) -> NoteSyncResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse either shape. Malformed individual entries are skipped with a
    /// warning; a document that is not a JSON object is an error.
    pub fn parse(raw: &[u8]) -> NoteSyncResult<ParsedMetadata> {
        let value: Value = serde_json::from_slice(raw)?;
        let Value::Object(mut map) = value else {
            return Err(NoteSyncError::Decode(
                "metadata.json is not a JSON object".to_string(),
            ));
        };

        let mut parsed = ParsedMetadata::default();
        let legacy = !(map.contains_key("notes") || map.contains_key("folders"));
        parsed.legacy = legacy;

        let note_entries = if legacy {
            std::mem::take(&mut map)
        } else {
            match map.remove("notes") {
                Some(Value::Object(notes)) => notes,
                Some(Value::Null) | None => Default::default(),
                Some(_) => {
                    parsed.warnings.push("metadata.json: `notes` is not an object".to_string());
                    Default::default()
                }
            }
        };

        for (key, entry) in note_entries {
            if key.trim().parse::<i64>().is_err() {
                parsed
                    .warnings
                    .push(format!("metadata.json: skipping non-numeric note key {}", key));
                continue;
            }
            match serde_json::from_value::<NoteMetadata>(entry) {
                Ok(note) => {
                    parsed.metadata.notes.insert(key.trim().to_string(), note);
                }
                Err(e) => parsed
                    .warnings
                    .push(format!("metadata.json: skipping note {}: {}", key, e)),
            }
        }

        if legacy {
            return Ok(parsed);
        }

        if let Some(Value::Array(folders)) = map.remove("folders") {
            for entry in folders {
                match serde_json::from_value::<Folder>(entry) {
                    Ok(folder) => parsed.metadata.folders.push(folder),
                    Err(e) => parsed
                        .warnings
                        .push(format!("metadata.json: skipping folder: {}", e)),
                }
            }
        }

        if let Some(Value::Object(attachments)) = map.remove("attachments") {
            for (filename, entry) in attachments {
                match serde_json::from_value::<AttachmentMetadata>(entry) {
                    Ok(att) => {
                        parsed.metadata.attachments.insert(filename, att);
                    }
                    Err(e) => parsed
                        .warnings
                        .push(format!("metadata.json: skipping attachment {}: {}", filename, e)),
                }
            }
        }

        Ok(parsed)
    }

    pub fn note(&self, id: i64) -> Option<&NoteMetadata> {
        self.notes.get(&id.to_string())
    }

    /// Attachments recorded as belonging to the note at `note_path`
    pub fn attachments_for_path(&self, note_path: &str) -> Vec<Attachment> {
        self.attachments
            .iter()
            .filter(|(_, meta)| meta.note_path.as_deref() == Some(note_path))
            .map(|(filename, meta)| meta.to_attachment(filename))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<Note>, Vec<Folder>) {
        let mut a = Note::new(2, "Second", NoteType::Note);
        a.tags = "x,y".to_string();
        a.folder_id = Some(10);
        a.folder = Some("Work".to_string());
        a.favorite = true;
        a.created = "2024-05-01 10:00:00".to_string();
        a.updated = "2024-05-02 10:00:00".to_string();
        a.attachments.push(Attachment {
            id: "att1".to_string(),
            filename: "img_1.png".to_string(),
            original_filename: "photo.png".to_string(),
            file_size: 42,
            file_type: "image/png".to_string(),
            uploaded_at: "2024-05-01 10:00:00".to_string(),
            note_path: None,
        });

        let mut trashed = Note::new(3, "Gone", NoteType::Markdown);
        trashed.trash = true;

        let folders = vec![Folder::new(11, "Child", Some(10)), Folder::new(10, "Work", None)];
        (vec![a, trashed], folders)
    }

    #[test]
    fn test_build_skips_trash_and_indexes_attachments() {
        let (notes, folders) = sample();
        let meta = RepoMetadata::build(&notes, &folders);

        assert_eq!(meta.notes.len(), 1);
        assert!(meta.note(3).is_none());
        let note = meta.note(2).unwrap();
        assert_eq!(note.heading.as_deref(), Some("Second"));
        assert_eq!(note.folder_id, Some(Some(10)));
        assert_eq!(meta.folders[0].id, 10);

        let att = &meta.attachments["img_1.png"];
        assert_eq!(att.note_path.as_deref(), Some("entries/2.html"));
        assert_eq!(meta.attachments_for_path("entries/2.html").len(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let (notes, folders) = sample();
        let first = RepoMetadata::build(&notes, &folders).to_bytes().unwrap();
        let second = RepoMetadata::build(&notes, &folders).to_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_current_shape() {
        let (notes, folders) = sample();
        let bytes = RepoMetadata::build(&notes, &folders).to_bytes().unwrap();

        let parsed = RepoMetadata::parse(&bytes).unwrap();
        assert!(!parsed.legacy);
        assert!(parsed.warnings.is_empty());

        let fields = parsed.metadata.note(2).cloned().unwrap().into_fields();
        assert_eq!(fields.heading.as_deref(), Some("Second"));
        assert_eq!(fields.note_type, Some(NoteType::Note));
        assert_eq!(fields.tags.as_deref(), Some("x,y"));
        assert_eq!(fields.folder_id, Some(Some(10)));
        assert_eq!(fields.favorite, Some(true));
        assert_eq!(fields.created.as_deref(), Some("2024-05-01 10:00:00"));
        assert_eq!(parsed.metadata.folders.len(), 2);
    }

    #[test]
    fn test_parse_legacy_flat_map() {
        let raw = br#"{
            "5": {"heading": "Old", "tags": ["a", " b "], "favorite": "1", "folder_id": "4"},
            "notes.txt": {"heading": "ignored"}
        }"#;
        let parsed = RepoMetadata::parse(raw).unwrap();

        assert!(parsed.legacy);
        assert!(parsed.metadata.folders.is_empty());
        assert_eq!(parsed.warnings.len(), 1);

        let fields = parsed.metadata.note(5).cloned().unwrap().into_fields();
        assert_eq!(fields.heading.as_deref(), Some("Old"));
        assert_eq!(fields.tags.as_deref(), Some("a,b"));
        assert_eq!(fields.favorite, Some(true));
        assert_eq!(fields.folder_id, Some(Some(4)));
    }

    #[test]
    fn test_absent_and_null_fields_are_distinct() {
        let raw = br#"{"notes": {"1": {"folder_id": null}, "2": {}}, "folders": []}"#;
        let parsed = RepoMetadata::parse(raw).unwrap();

        let one = parsed.metadata.note(1).cloned().unwrap().into_fields();
        assert_eq!(one.folder_id, Some(None));
        let two = parsed.metadata.note(2).cloned().unwrap().into_fields();
        assert_eq!(two.folder_id, None);
        assert_eq!(two, NoteFields::default());
    }

    #[test]
    fn test_invalid_timestamps_are_absent() {
        let raw = br#"{"notes": {"1": {"created": "yesterday", "updated": "2024-01-01T08:00:00Z"}}}"#;
        let parsed = RepoMetadata::parse(raw).unwrap();
        let fields = parsed.metadata.note(1).cloned().unwrap().into_fields();
        assert_eq!(fields.created, None);
        assert_eq!(fields.updated.as_deref(), Some("2024-01-01 08:00:00"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let raw = br#"{"notes": {"1": "not an object", "2": {"heading": "ok"}},
                       "folders": [{"id": 1, "name": "A"}, {"name": "no id"}]}"#;
        let parsed = RepoMetadata::parse(raw).unwrap();
        assert_eq!(parsed.metadata.notes.len(), 1);
        assert_eq!(parsed.metadata.folders.len(), 1);
        assert_eq!(parsed.warnings.len(), 2);

        assert!(RepoMetadata::parse(b"[1, 2]").is_err());
        assert!(RepoMetadata::parse(b"{not json").is_err());
    }
}
