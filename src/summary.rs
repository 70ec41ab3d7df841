//! Per-file outcomes and the run summary they fold into.
//!
//! Every unit of work in a push or pull yields one [`FileReport`]. A run's
//! [`SyncSummary`] is the fold of those reports, so a failed file is just
//! another report: it lands in `errors` and the run carries on.

use serde::{Deserialize, Serialize};

use crate::validation::now_timestamp;

/// Which way a run moved data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    #[default]
    Push,
    Pull,
}

/// What kind of file a report is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Note,
    Attachment,
    Metadata,
    Folder,
}

/// The operation attempted on the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Upload,
    Delete,
    Download,
    Insert,
    Update,
    Trash,
}

/// Outcome of one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Nothing to do (unchanged, or already present)
    Skipped,
    Written,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: String,
    pub category: FileCategory,
    pub operation: FileOperation,
    pub outcome: FileOutcome,
}

impl FileReport {
    pub fn new(
        path: impl Into<String>,
        category: FileCategory,
        operation: FileOperation,
        outcome: FileOutcome,
    ) -> Self {
        Self {
            path: path.into(),
            category,
            operation,
            outcome,
        }
    }

    /// Report from a fallible step: `Ok(true)` written, `Ok(false)`
    /// skipped, `Err` failed
    pub fn from_result<E: std::fmt::Display>(
        path: impl Into<String>,
        category: FileCategory,
        operation: FileOperation,
        result: Result<bool, E>,
    ) -> Self {
        let outcome = match result {
            Ok(true) => FileOutcome::Written,
            Ok(false) => FileOutcome::Skipped,
            Err(e) => FileOutcome::Failed(e.to_string()),
        };
        Self::new(path, category, operation, outcome)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, FileOutcome::Failed(_))
    }

    fn debug_line(&self) -> String {
        let op = match self.operation {
            FileOperation::Upload => "upload",
            FileOperation::Delete => "delete",
            FileOperation::Download => "download",
            FileOperation::Insert => "insert",
            FileOperation::Update => "update",
            FileOperation::Trash => "trash",
        };
        match &self.outcome {
            FileOutcome::Skipped => format!("{} {}: unchanged", op, self.path),
            FileOutcome::Written => format!("{} {}: ok", op, self.path),
            FileOutcome::Failed(e) => format!("{} {}: ERROR {}", op, self.path, e),
        }
    }
}

/// A per-file error in the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Result of one push or pull run.
///
/// `success` with a non-empty `errors` list is a partial success: the run
/// completed, some files did not make it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub direction: SyncDirection,
    pub success: bool,
    /// Note bodies uploaded
    pub pushed: usize,
    pub attachments_pushed: usize,
    /// Notes inserted or updated locally
    pub pulled: usize,
    /// Of `pulled`, notes that already existed
    pub updated: usize,
    pub attachments_pulled: usize,
    pub folders_created: usize,
    /// Remote files deleted (push) or local notes trashed (pull)
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<FileError>,
    pub warnings: Vec<String>,
    /// Set when the run aborted before completing
    pub error: Option<String>,
    pub debug: Vec<String>,
}

impl SyncSummary {
    /// Empty summary for a run that is about to start
    pub fn started(direction: SyncDirection) -> Self {
        Self {
            direction,
            success: true,
            ..Default::default()
        }
    }

    /// Summary of a run that aborted with a top-level error
    pub fn failed(direction: SyncDirection, error: impl Into<String>) -> Self {
        Self {
            direction,
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Fold one report into the counters
    pub fn record(&mut self, report: FileReport) {
        self.debug.push(report.debug_line());

        match report.outcome {
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed(error) => self.errors.push(FileError {
                path: report.path,
                error,
            }),
            FileOutcome::Written => match (report.operation, report.category) {
                (FileOperation::Upload, FileCategory::Note) => self.pushed += 1,
                (FileOperation::Upload, FileCategory::Attachment) => self.attachments_pushed += 1,
                (FileOperation::Download, FileCategory::Attachment) => self.attachments_pulled += 1,
                (FileOperation::Insert, FileCategory::Note) => self.pulled += 1,
                (FileOperation::Update, FileCategory::Note) => {
                    self.pulled += 1;
                    self.updated += 1;
                }
                (FileOperation::Insert, FileCategory::Folder) => self.folders_created += 1,
                (FileOperation::Delete, _) | (FileOperation::Trash, _) => self.deleted += 1,
                _ => {}
            },
        }
    }

    /// `record` in builder form, for folding
    pub fn with(mut self, report: FileReport) -> Self {
        self.record(report);
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.debug.push(format!("warning: {}", message));
        self.warnings.push(message);
    }

    /// Abort the run with a top-level error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }

    /// Completed, but some files failed
    pub fn is_partial(&self) -> bool {
        self.success && !self.errors.is_empty()
    }

    /// Compact record persisted in the settings table
    pub fn to_record(&self) -> LastSyncRecord {
        LastSyncRecord {
            timestamp: now_timestamp(),
            direction: self.direction,
            success: self.success,
            pushed: self.pushed + self.attachments_pushed,
            pulled: self.pulled + self.attachments_pulled,
            deleted: self.deleted,
            skipped: self.skipped,
            errors: self.errors.len(),
            error: self.error.clone(),
        }
    }
}

impl Extend<FileReport> for SyncSummary {
    fn extend<I: IntoIterator<Item = FileReport>>(&mut self, iter: I) {
        for report in iter {
            self.record(report);
        }
    }
}

/// The single persisted record of the most recent run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSyncRecord {
    pub timestamp: String,
    pub direction: SyncDirection,
    pub success: bool,
    pub pushed: usize,
    pub pulled: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
