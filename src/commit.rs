//! Commit data model shared by the fetcher, sync engine and digest builders.

use chrono::{DateTime, Utc};

/// Number of characters kept in a display commit id
pub const SHORT_ID_LEN: usize = 7;

/// Kind of change applied to a file in a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
    Changed,
    Unchanged,
    Other(String),
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Copied => "copied",
            ChangeKind::Changed => "changed",
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "added" => ChangeKind::Added,
            "modified" => ChangeKind::Modified,
            "removed" => ChangeKind::Removed,
            "renamed" => ChangeKind::Renamed,
            "copied" => ChangeKind::Copied,
            "changed" => ChangeKind::Changed,
            "unchanged" => ChangeKind::Unchanged,
            other => ChangeKind::Other(other.to_string()),
        }
    }
}

/// A file touched by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub change_kind: ChangeKind,
    pub additions: u64,
    pub deletions: u64,
}

/// A single commit as fetched from the remote API
///
/// Immutable once fetched. `changed_files` is empty when detail enrichment failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub full_id: String,
    pub short_id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: DateTime<Utc>,
    pub url: String,
    pub changed_files: Vec<ChangedFile>,
}

impl Commit {
    /// Build a commit without file details; `short_id` is derived from `full_id`
    pub fn new(
        full_id: impl Into<String>,
        message: impl Into<String>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
        authored_at: DateTime<Utc>,
        url: impl Into<String>,
    ) -> Self {
        let full_id = full_id.into();
        let short_id = short_id(&full_id);
        Self {
            full_id,
            short_id,
            message: message.into().trim().to_string(),
            author_name: author_name.into(),
            author_email: author_email.into(),
            authored_at,
            url: url.into(),
            changed_files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<ChangedFile>) -> Self {
        self.changed_files = files;
        self
    }

    /// First line of the commit message
    pub fn headline(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }

    /// Message cut to `max_chars` characters, with `...` appended when cut
    pub fn truncated_message(&self, max_chars: usize) -> String {
        truncate_chars(&self.message, max_chars)
    }
}

/// Display form of a commit id
pub fn short_id(full_id: &str) -> String {
    full_id.chars().take(SHORT_ID_LEN).collect()
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
