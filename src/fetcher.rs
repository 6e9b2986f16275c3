//! Branch Fetcher - newest-first commit history for one (repository, branch) pair
//!
//! Wraps a [`CommitSource`] with the cursor truncation, per-commit detail
//! enrichment and error degradation the sync engine relies on. Nothing here
//! returns an error: a branch that cannot be read contributes no commits.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::commit::{short_id, Commit};
use crate::github::CommitSource;

pub struct BranchFetcher {
    source: Arc<dyn CommitSource>,
    page_size: u8,
}

impl BranchFetcher {
    pub fn new(source: Arc<dyn CommitSource>, page_size: u8) -> Self {
        Self { source, page_size }
    }

    /// Fetch the commits of one branch newer than the checkpoint
    ///
    /// Everything at and after `stop_at` in the newest-first listing is discarded.
    /// `stop_expected` says whether `stop_at` is normally reachable from this
    /// branch; a full page without it is only worth a warning when it is.
    pub async fn fetch_branch_commits(
        &self,
        repo: &str,
        branch: Option<&str>,
        since: Option<DateTime<Utc>>,
        stop_at: Option<&str>,
        stop_expected: bool,
    ) -> Vec<Commit> {
        let branch_label = branch.unwrap_or("<default>");

        let listing = match self
            .source
            .list_commits(repo, branch, since, self.page_size)
            .await
        {
            Ok(commits) => commits,
            Err(e) if e.is_permanent() => {
                error!("Cannot read {}@{}: {}", repo, branch_label, e);
                return Vec::new();
            }
            Err(e) => {
                warn!("Skipping {}@{} this cycle: {}", repo, branch_label, e);
                return Vec::new();
            }
        };

        let listed = listing.len();
        let (retained, stop_found) = truncate_at(listing, stop_at);

        let exhausted = window_exceeded(listed, self.page_size, stop_found);
        match stop_at {
            Some(stop) if exhausted && stop_expected => warn!(
                "{}@{}: checkpoint commit {} not within the first {} commits; \
                 older new commits may be skipped",
                repo,
                branch_label,
                short_id(stop),
                self.page_size
            ),
            Some(stop) if exhausted => debug!(
                "{}@{}: checkpoint commit {} not among {} listed commits; \
                 the cursor belongs to another branch",
                repo,
                branch_label,
                short_id(stop),
                listed
            ),
            _ => {}
        }

        debug!(
            "{}@{}: {} listed, {} new",
            repo,
            branch_label,
            listed,
            retained.len()
        );

        let mut enriched = Vec::with_capacity(retained.len());
        for commit in retained {
            enriched.push(self.enrich(repo, commit).await);
        }

        if !enriched.is_empty() {
            info!(
                "{}@{}: {} new commit(s)",
                repo,
                branch_label,
                enriched.len()
            );
        }

        enriched
    }

    /// Replace a listing entry with its full detail; on failure keep it without files
    async fn enrich(&self, repo: &str, commit: Commit) -> Commit {
        match self.source.commit_detail(repo, &commit.full_id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(
                    "Failed to fetch details of {} in {}: {}",
                    commit.short_id, repo, e
                );
                Commit {
                    changed_files: Vec::new(),
                    ..commit
                }
            }
        }
    }
}

/// A full page that did not reach the stop commit may hide older new commits
pub fn window_exceeded(listed: usize, page_size: u8, stop_found: bool) -> bool {
    !stop_found && listed >= usize::from(page_size)
}

/// Keep the commits before the first one whose id equals `stop_at`
///
/// Returns the retained prefix and whether the stop commit was seen.
pub fn truncate_at(mut commits: Vec<Commit>, stop_at: Option<&str>) -> (Vec<Commit>, bool) {
    let Some(stop) = stop_at else {
        return (commits, false);
    };

    match commits.iter().position(|c| c.full_id == stop) {
        Some(idx) => {
            commits.truncate(idx);
            (commits, true)
        }
        None => (commits, false),
    }
}
