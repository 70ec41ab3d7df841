//! Front matter embedded in note bodies, and attachment link rewriting.
//!
//! HTML notes carry an HTML comment block so the file stays valid HTML:
//!
//! ```text
//! <!--notesync
//! title: "Groceries"
//! tags: ["home", "todo"]
//! created: 2024-05-01 10:00:00
//! updated: 2024-05-02 09:30:00
//! favorite: 0
//! note_id: 12
//! type: note
//! -->
//! ```
//!
//! Every other type gets a YAML-style `---` block. Parsing is line-oriented
//! and tolerant: the first occurrence of each key wins and unknown keys are
//! ignored.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::database::NoteFields;
use crate::models::{split_tags, Attachment, Note, NoteType};
use crate::validation::{normalize_timestamp, MAX_DERIVED_HEADING_LENGTH};

/// Opening marker of the HTML comment block
pub const HTML_MARKER: &str = "<!--notesync";

/// Heading used when nothing better can be derived
pub const UNTITLED: &str = "Untitled";

static YAML_KEY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[A-Za-z_][\w-]*[ \t]*:").unwrap());

static YAML_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n(?:\r?\n)?|\z)").unwrap()
});

static HTML_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A<!--notesync\r?\n(.*?)\r?\n-->[ \t]*(?:\r?\n)?").unwrap()
});

// /api/v1/notes/{note}/attachments/{attachment}
static LOCAL_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/api/v1/notes/(\d+)/attachments/([A-Za-z0-9_-]+)").unwrap()
});

// attachments/{file} or ../attachments/{file}, not preceded by a path segment
static REPO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[^/\w.])((?:\.\./)?attachments/([^"'\s)<>]+))"#).unwrap()
});

static HTML_ATTACHMENT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:src|href)=["'](?:\.\./)?attachments/([^"']+)["']"#).unwrap()
});

static MD_ATTACHMENT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\((?:\.\./)?attachments/([^)\s]+)\)").unwrap()
});

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

static H1_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap());

static MD_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*\r?$").unwrap());

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Per-note fields carried in a front matter block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub tags: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub favorite: Option<bool>,
    pub note_id: Option<i64>,
    pub note_type: Option<NoteType>,
}

impl FrontMatter {
    pub fn from_note(note: &Note) -> Self {
        Self {
            title: Some(note.heading.clone()),
            tags: Some(note.tags.clone()),
            created: Some(note.created.clone()),
            updated: Some(note.updated.clone()),
            favorite: Some(note.favorite),
            note_id: Some(note.id),
            note_type: Some(note.note_type),
        }
    }

    /// Row fields present in the block
    pub fn into_fields(self) -> NoteFields {
        NoteFields {
            heading: self.title.filter(|t| !t.trim().is_empty()),
            note_type: self.note_type,
            tags: self.tags,
            favorite: self.favorite,
            created: self.created.as_deref().and_then(normalize_timestamp),
            updated: self.updated.as_deref().and_then(normalize_timestamp),
            ..Default::default()
        }
    }

    fn render_lines(&self) -> String {
        let mut out = String::new();
        let title = self
            .title
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED);
        out.push_str(&format!("title: {}\n", Value::String(title.to_string())));

        let tags = self.tags.as_deref().map(split_tags).unwrap_or_default();
        if !tags.is_empty() {
            let quoted: Vec<String> = tags.into_iter().map(|t| Value::String(t).to_string()).collect();
            out.push_str(&format!("tags: [{}]\n", quoted.join(", ")));
        }
        if let Some(created) = &self.created {
            out.push_str(&format!("created: {}\n", created));
        }
        if let Some(updated) = &self.updated {
            out.push_str(&format!("updated: {}\n", updated));
        }
        out.push_str(&format!("favorite: {}\n", if self.favorite.unwrap_or(false) { 1 } else { 0 }));
        if let Some(id) = self.note_id {
            out.push_str(&format!("note_id: {}\n", id));
        }
        if let Some(note_type) = self.note_type {
            out.push_str(&format!("type: {}\n", note_type.as_str()));
        }
        out
    }

    fn parse_lines(block: &str) -> Self {
        let mut fm = FrontMatter::default();

        for line in block.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "title" if fm.title.is_none() => fm.title = Some(unquote(value)),
                "tags" if fm.tags.is_none() => {
                    let inner = value.trim_start_matches('[').trim_end_matches(']');
                    let tags: Vec<String> = inner
                        .split(',')
                        .map(unquote)
                        .filter(|t| !t.is_empty())
                        .collect();
                    fm.tags = Some(tags.join(","));
                }
                "created" if fm.created.is_none() => fm.created = Some(value.to_string()),
                "updated" if fm.updated.is_none() => fm.updated = Some(value.to_string()),
                "favorite" if fm.favorite.is_none() => {
                    fm.favorite = match value {
                        "1" | "true" => Some(true),
                        "0" | "false" => Some(false),
                        _ => None,
                    }
                }
                "note_id" if fm.note_id.is_none() => fm.note_id = value.parse().ok(),
                "type" if fm.note_type.is_none() => fm.note_type = NoteType::parse(value),
                _ => {}
            }
        }

        fm
    }
}

/// A JSON string literal, or a bare value with surrounding quotes trimmed
fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(value) {
            return s;
        }
    }
    value.trim_matches(|c| c == '"' || c == '\'' || c == ' ').to_string()
}

/// Embeds and extracts per-note front matter.
pub trait FrontMatterCodec: Send + Sync {
    /// Body as it should be stored in the repository
    fn embed(&self, body: &str, note: &Note) -> String;

    /// Split repository content into its front matter (if any) and the
    /// remaining body
    fn extract(&self, content: &str) -> (Option<FrontMatter>, String);
}

/// Line-oriented codec matching the block with regular expressions
#[derive(Debug, Clone, Copy, Default)]
pub struct LineFrontMatter;

impl FrontMatterCodec for LineFrontMatter {
    fn embed(&self, body: &str, note: &Note) -> String {
        let fm = FrontMatter::from_note(note);

        if note.note_type.uses_comment_front_matter() {
            // Replace a stale block rather than stacking a second one
            let body = HTML_BLOCK.replace(body, "");
            return format!("{}\n{}-->\n{}", HTML_MARKER, fm.render_lines(), body);
        }

        // A body that already opens with front matter is left alone
        if yaml_block(body).is_some() {
            return body.to_string();
        }
        format!("---\n{}---\n\n{}", fm.render_lines(), body)
    }

    fn extract(&self, content: &str) -> (Option<FrontMatter>, String) {
        if let Some(caps) = HTML_BLOCK.captures(content) {
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let block = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return (Some(FrontMatter::parse_lines(block)), content[end..].to_string());
        }
        if let Some(caps) = yaml_block(content) {
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let block = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return (Some(FrontMatter::parse_lines(block)), content[end..].to_string());
        }
        (None, content.to_string())
    }
}

/// Leading `---` block holding at least one `key:` line. A markdown
/// thematic break opening the body is not front matter.
fn yaml_block(content: &str) -> Option<Captures<'_>> {
    YAML_BLOCK
        .captures(content)
        .filter(|caps| caps.get(1).is_some_and(|block| YAML_KEY_LINE.is_match(block.as_str())))
}

/// Rewrite local API attachment links of `note_id` to repo-relative links.
/// Unknown attachment ids are left as they are.
pub fn to_repo_links(content: &str, note_id: i64, attachments: &[Attachment]) -> String {
    let id_to_file: HashMap<&str, &str> = attachments
        .iter()
        .filter(|a| !a.id.is_empty() && !a.filename.is_empty())
        .map(|a| (a.id.as_str(), a.filename.as_str()))
        .collect();
    if id_to_file.is_empty() {
        return content.to_string();
    }

    let note = note_id.to_string();
    LOCAL_LINK
        .replace_all(content, |caps: &Captures| {
            match (caps.get(1), caps.get(2)) {
                (Some(n), Some(att)) if n.as_str() == note => match id_to_file.get(att.as_str()) {
                    Some(file) => format!("../attachments/{}", file),
                    None => caps[0].to_string(),
                },
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Rewrite repo-relative attachment links to local API links of `note_id`.
/// Filenames missing from `file_to_id` are left as they are.
pub fn to_local_links(content: &str, note_id: i64, file_to_id: &HashMap<String, String>) -> String {
    if file_to_id.is_empty() {
        return content.to_string();
    }

    REPO_LINK
        .replace_all(content, |caps: &Captures| {
            let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let file = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            match file_to_id.get(file) {
                Some(id) => format!("{}/api/v1/notes/{}/attachments/{}", prefix, note_id, id),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Attachment filenames referenced from repo-form content, in order of
/// first appearance
pub fn referenced_attachment_files(content: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut positions: Vec<(usize, String)> = Vec::new();

    for re in [&*HTML_ATTACHMENT_REF, &*MD_ATTACHMENT_REF] {
        for caps in re.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                positions.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    positions.sort_by_key(|(pos, _)| *pos);

    for (_, file) in positions {
        if !seen.contains(&file) {
            seen.push(file);
        }
    }
    seen
}

/// Best-effort heading for a body with no metadata: `<title>`, then the
/// first `<h1>` or `# heading`, then the first non-empty line.
pub fn derive_heading(body: &str, note_type: NoteType) -> String {
    let candidate = match note_type {
        NoteType::Note => TITLE_TAG
            .captures(body)
            .or_else(|| H1_TAG.captures(body))
            .and_then(|c| c.get(1))
            .map(|m| strip_tags(m.as_str()))
            .filter(|s| !s.is_empty())
            .or_else(|| first_text_line(&ANY_TAG.replace_all(body, ""))),
        NoteType::Markdown => MD_HEADING
            .captures(body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| first_text_line(body)),
        NoteType::Tasklist | NoteType::Excalidraw => None,
    };

    match candidate {
        Some(heading) => heading.chars().take(MAX_DERIVED_HEADING_LENGTH).collect(),
        None => UNTITLED.to_string(),
    }
}

fn strip_tags(s: &str) -> String {
    ANY_TAG.replace_all(s, " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text_line(s: &str) -> Option<String> {
    s.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
