//! Raw-listing digest used when the summarizer is unavailable or fails.

use std::fmt::Write;

use crate::commit::{truncate_chars, Commit};

/// Commits listed before the overflow line
pub const FALLBACK_MAX_ENTRIES: usize = 5;

/// Characters of the commit headline kept per entry
pub const FALLBACK_MESSAGE_CHARS: usize = 100;

/// Build the fallback digest for an oldest-first batch
pub fn fallback_digest(repo: &str, commits: &[Commit]) -> String {
    let mut text = format!("🔄 {} has {} new commit(s):\n\n", repo, commits.len());

    for commit in commits.iter().take(FALLBACK_MAX_ENTRIES) {
        let _ = writeln!(
            text,
            "• {}: {}",
            commit.short_id,
            truncate_chars(commit.headline(), FALLBACK_MESSAGE_CHARS)
        );
        let _ = writeln!(text, "  👤 {} | 🔗 {}\n", commit.author_name, commit.url);
    }

    if commits.len() > FALLBACK_MAX_ENTRIES {
        let _ = write!(text, "... and {} more", commits.len() - FALLBACK_MAX_ENTRIES);
    }

    text.trim_end().to_string()
}
