//! Input validation for notesync.
//!
//! Validators for configuration values and for data arriving from the
//! remote. All validators return `NoteSyncError::Validation` on failure.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{NoteSyncError, NoteSyncResult};

/// Maximum length of a heading derived from note content
pub const MAX_DERIVED_HEADING_LENGTH: usize = 100;

/// Maximum length of a branch name
pub const MAX_BRANCH_LENGTH: usize = 255;

/// Stored datetime format: "YYYY-MM-DD HH:MM:SS".
/// Must always be zero-padded so that string comparison orders correctly.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current time in the stored datetime format
pub fn now_timestamp() -> String {
    Utc::now().format(DATETIME_FORMAT).to_string()
}

/// Validate a datetime string format.
///
/// Valid: "2025-01-01 00:00:00". Invalid: "2025-1-1 0:0:0", "01-01-2025".
pub fn validate_datetime(value: &str, field_name: &str) -> NoteSyncResult<()> {
    if value.len() != 19 {
        return Err(NoteSyncError::validation(
            field_name,
            format!(
                "datetime must be exactly 19 characters in format 'YYYY-MM-DD HH:MM:SS', got {} characters",
                value.len()
            ),
        ));
    }

    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT).map_err(|e| {
        NoteSyncError::validation(
            field_name,
            format!("datetime must be in format 'YYYY-MM-DD HH:MM:SS': {}", e),
        )
    })?;

    Ok(())
}

/// Normalize a timestamp from the remote to the stored format.
///
/// Accepts the stored format or RFC 3339. Anything else yields `None`
/// and is treated as an absent field.
pub fn normalize_timestamp(value: &str) -> Option<String> {
    let value = value.trim();
    if validate_datetime(value, "timestamp").is_ok() {
        return Some(value.to_string());
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(DATETIME_FORMAT).to_string())
}

/// Validate a repository slug of the form `owner/name`.
pub fn validate_repo(repo: &str) -> NoteSyncResult<()> {
    let mut parts = repo.split('/');
    let (owner, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => (owner, name),
        _ => return Err(NoteSyncError::validation("repo", "must be in the form 'owner/name'")),
    };

    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };

    if !valid_part(owner) {
        return Err(NoteSyncError::validation("repo", format!("invalid owner '{}'", owner)));
    }
    if !valid_part(name) {
        return Err(NoteSyncError::validation("repo", format!("invalid repository name '{}'", name)));
    }

    Ok(())
}

/// Validate a branch name against the git ref rules that matter for the API.
pub fn validate_branch(branch: &str) -> NoteSyncResult<()> {
    if branch.is_empty() {
        return Err(NoteSyncError::validation("branch", "cannot be empty"));
    }
    if branch.len() > MAX_BRANCH_LENGTH {
        return Err(NoteSyncError::validation(
            "branch",
            format!("exceeds maximum length of {} characters", MAX_BRANCH_LENGTH),
        ));
    }
    if branch.starts_with('/') || branch.ends_with('/') || branch.starts_with('-') {
        return Err(NoteSyncError::validation("branch", "cannot start or end with '/' or start with '-'"));
    }
    if branch.contains("..") || branch.contains("//") || branch.ends_with(".lock") {
        return Err(NoteSyncError::validation("branch", "contains an invalid sequence"));
    }
    if branch
        .chars()
        .any(|c| c.is_control() || c.is_whitespace() || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(NoteSyncError::validation("branch", "contains an invalid character"));
    }
    Ok(())
}

/// Split a body file name `{id}.{ext}` into its numeric id and extension.
///
/// Returns `None` for non-numeric stems; such files are skipped, not errors.
pub fn parse_note_file_name(file_name: &str) -> Option<(i64, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let id = stem.parse::<i64>().ok()?;
    if id <= 0 {
        return None;
    }
    Some((id, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_datetime() {
        assert!(validate_datetime("2025-01-01 00:00:00", "created").is_ok());
        assert!(validate_datetime("2025-1-1 0:0:0", "created").is_err());
        assert!(validate_datetime("2025-13-01 00:00:00", "created").is_err());
        assert!(validate_datetime("01-01-2025 00:00:00", "created").is_err());
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp("2024-05-06 07:08:09"),
            Some("2024-05-06 07:08:09".to_string())
        );
        assert_eq!(
            normalize_timestamp("2024-05-06T07:08:09+02:00"),
            Some("2024-05-06 05:08:09".to_string())
        );
        assert_eq!(normalize_timestamp("yesterday"), None);
    }

    #[test]
    fn test_validate_repo() {
        assert!(validate_repo("alice/notes").is_ok());
        assert!(validate_repo("my-org/my.notes_2").is_ok());
        assert!(validate_repo("notes").is_err());
        assert!(validate_repo("a/b/c").is_err());
        assert!(validate_repo("/notes").is_err());
        assert!(validate_repo("alice/no tes").is_err());
    }

    #[test]
    fn test_validate_branch() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/sync-2").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("bad..branch").is_err());
        assert!(validate_branch("has space").is_err());
        assert!(validate_branch("-flag").is_err());
        assert!(validate_branch("x.lock").is_err());
    }

    #[test]
    fn test_parse_note_file_name() {
        assert_eq!(parse_note_file_name("12.md"), Some((12, "md")));
        assert_eq!(parse_note_file_name("7.html"), Some((7, "html")));
        assert_eq!(parse_note_file_name("readme.md"), None);
        assert_eq!(parse_note_file_name("0.md"), None);
        assert_eq!(parse_note_file_name("12"), None);
        assert_eq!(parse_note_file_name("1a.md"), None);
    }
}
