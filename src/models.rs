//! Data models for notesync.
//!
//! Notes, folders and attachments mirror the rows of the local store.
//! `RemoteFile` is the ephemeral view of one entry of a remote tree listing.

use serde::{Deserialize, Serialize};

/// Directory prefix for note bodies in the repository
pub const ENTRIES_PREFIX: &str = "entries/";

/// Directory prefix for attachment blobs in the repository
pub const ATTACHMENTS_PREFIX: &str = "attachments/";

/// Path of the metadata sidecar in the repository
pub const METADATA_PATH: &str = "metadata.json";

/// Repository file extensions recognized as note bodies on pull
pub const SUPPORTED_NOTE_EXTENSIONS: &[&str] = &["md", "html", "txt", "markdown", "json", "excalidraw"];

/// Default workspace for notes that carry none
pub const DEFAULT_WORKSPACE: &str = "Notes";

/// Kind of note, which decides file extensions and front matter style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    /// Rich-text note stored as HTML
    #[default]
    Note,
    Markdown,
    /// Task list stored as JSON
    Tasklist,
    /// Excalidraw drawing stored as JSON
    Excalidraw,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::Note => "note",
            NoteType::Markdown => "markdown",
            NoteType::Tasklist => "tasklist",
            NoteType::Excalidraw => "excalidraw",
        }
    }

    /// Parse a stored type name. Unknown names fall back to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "note" | "html" => Some(NoteType::Note),
            "markdown" | "md" => Some(NoteType::Markdown),
            "tasklist" => Some(NoteType::Tasklist),
            "excalidraw" => Some(NoteType::Excalidraw),
            _ => None,
        }
    }

    /// Extension of the body file in the local entries directory
    pub fn local_extension(&self) -> &'static str {
        match self {
            NoteType::Markdown => "md",
            _ => "html",
        }
    }

    /// Extension of the body file in the repository
    pub fn repo_extension(&self) -> &'static str {
        match self {
            NoteType::Note => "html",
            NoteType::Markdown => "md",
            NoteType::Tasklist | NoteType::Excalidraw => "json",
        }
    }

    /// Infer the type from a repository file extension
    pub fn from_repo_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "md" | "markdown" | "txt" => Some(NoteType::Markdown),
            "json" => Some(NoteType::Tasklist),
            "excalidraw" => Some(NoteType::Excalidraw),
            "html" => Some(NoteType::Note),
            _ => None,
        }
    }

    /// Infer the type from a local body file extension
    pub fn from_local_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "md" => Some(NoteType::Markdown),
            "html" => Some(NoteType::Note),
            _ => None,
        }
    }

    /// HTML notes carry their front matter in a comment block
    pub fn uses_comment_front_matter(&self) -> bool {
        matches!(self, NoteType::Note)
    }
}

/// Repository path for a note: derived only from id and type
pub fn note_remote_path(id: i64, note_type: NoteType) -> String {
    format!("{}{}.{}", ENTRIES_PREFIX, id, note_type.repo_extension())
}

/// Local body file name for a note
pub fn note_local_file_name(id: i64, note_type: NoteType) -> String {
    format!("{}.{}", id, note_type.local_extension())
}

/// Repository path for an attachment blob
pub fn attachment_remote_path(filename: &str) -> String {
    format!("{}{}", ATTACHMENTS_PREFIX, filename)
}

/// An uploaded file referenced from a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Attachment {
    /// Stable attachment identifier used in local links
    #[serde(default)]
    pub id: String,
    /// On-disk file name in the attachments directory
    pub filename: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub uploaded_at: String,
    /// Repository path of the owning note, used to re-associate on pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_path: Option<String>,
}

/// A note row.
///
/// The body is not part of the row: it lives in `{id}.{ext}` in the
/// entries directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub heading: String,
    pub note_type: NoteType,
    /// Comma-separated tag list
    pub tags: String,
    pub folder_id: Option<i64>,
    /// Cached name of the folder
    pub folder: Option<String>,
    pub workspace: String,
    pub attachments: Vec<Attachment>,
    pub favorite: bool,
    pub created: String,
    pub updated: String,
    /// Soft-delete flag
    pub trash: bool,
}

impl Note {
    /// Create a note with the given id and heading, stamped now
    pub fn new(id: i64, heading: impl Into<String>, note_type: NoteType) -> Self {
        let now = crate::validation::now_timestamp();
        Self {
            id,
            heading: heading.into(),
            note_type,
            tags: String::new(),
            folder_id: None,
            folder: None,
            workspace: DEFAULT_WORKSPACE.to_string(),
            attachments: Vec::new(),
            favorite: false,
            created: now.clone(),
            updated: now,
            trash: false,
        }
    }

    pub fn remote_path(&self) -> String {
        note_remote_path(self.id, self.note_type)
    }

    pub fn local_file_name(&self) -> String {
        note_local_file_name(self.id, self.note_type)
    }

    /// Tags split on commas, trimmed, empties dropped
    pub fn tag_list(&self) -> Vec<String> {
        split_tags(&self.tags)
    }
}

/// Split a comma-separated tag string
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// A folder row. `parent_id` links folders into a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub icon_color: Option<String>,
}

fn default_workspace() -> String {
    DEFAULT_WORKSPACE.to_string()
}

impl Folder {
    pub fn new(id: i64, name: impl Into<String>, parent_id: Option<i64>) -> Self {
        Self {
            id,
            name: name.into(),
            workspace: default_workspace(),
            parent_id,
            icon: None,
            icon_color: None,
        }
    }
}

/// Kind of a remote tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Blob,
    Tree,
    #[serde(other)]
    Other,
}

/// One entry of a recursive tree listing. Lives for one sync call only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    #[serde(rename = "sha")]
    pub blob_sha: String,
    #[serde(rename = "type")]
    pub kind: RemoteKind,
}

impl RemoteFile {
    pub fn is_blob(&self) -> bool {
        self.kind == RemoteKind::Blob
    }
}
