//! Sync Engine - new-commit detection across a repository's branch set
//!
//! For one repository the engine fetches every configured branch through the
//! [`BranchFetcher`], drops commits already covered by the checkpoint, removes
//! commits reachable from more than one branch and returns the remainder
//! oldest-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::commit::Commit;
use crate::fetcher::BranchFetcher;

/// Branches watched for a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSet {
    /// The remote API's default listing, without a branch selector
    All,
    /// Named branches, in declared order
    Named(Vec<String>),
}

impl BranchSet {
    /// Build from configured names; empty lists and `"*"` mean all branches
    pub fn from_names(names: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let mut named = Vec::new();

        for name in names {
            let name = name.trim().to_string();
            if name == "*" {
                return BranchSet::All;
            }
            if !name.is_empty() && seen.insert(name.clone()) {
                named.push(name);
            }
        }

        if named.is_empty() {
            BranchSet::All
        } else {
            BranchSet::Named(named)
        }
    }

    /// One fetch selector per branch; `None` is the unselected default listing
    pub fn selectors(&self) -> Vec<Option<&str>> {
        match self {
            BranchSet::All => vec![None],
            BranchSet::Named(names) => names.iter().map(|n| Some(n.as_str())).collect(),
        }
    }

    /// Human-readable form for logs
    pub fn describe(&self) -> String {
        match self {
            BranchSet::All => "all branches".to_string(),
            BranchSet::Named(names) => names.join(", "),
        }
    }
}

/// How per-branch results are combined into one ordered batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeOrder {
    /// Concatenate newest-first branch listings in declared order, then reverse
    ///
    /// Branches whose commit times interleave may come out non-chronological.
    #[default]
    Concatenate,
    /// Order the deduplicated batch by author time, ties broken by commit id
    Chronological,
}

pub struct SyncEngine {
    fetcher: BranchFetcher,
    ordering: MergeOrder,
}

impl SyncEngine {
    pub fn new(fetcher: BranchFetcher, ordering: MergeOrder) -> Self {
        Self { fetcher, ordering }
    }

    /// New commits for `repo`, oldest-first, each commit exactly once
    ///
    /// Without `last_commit_id` every commit in the page window counts as new;
    /// without `last_check_time` no time filter is sent.
    pub async fn get_new_commits(
        &self,
        repo: &str,
        branches: &BranchSet,
        last_check_time: Option<DateTime<Utc>>,
        last_commit_id: Option<&str>,
    ) -> Vec<Commit> {
        let mut per_branch = Vec::new();

        // The cursor is the head of the first branch that had new commits, so
        // later branches routinely list a full page without reaching it
        for (index, selector) in branches.selectors().into_iter().enumerate() {
            let commits = self
                .fetcher
                .fetch_branch_commits(repo, selector, last_check_time, last_commit_id, index == 0)
                .await;
            per_branch.push(commits);
        }

        let merged = merge_branches(per_branch, self.ordering);

        debug!(
            "{}: {} new commit(s) across {}",
            repo,
            merged.len(),
            branches.describe()
        );

        merged
    }
}

/// Combine newest-first per-branch listings into one oldest-first batch
///
/// Deduplication keeps the first occurrence in branch declaration order.
pub fn merge_branches(per_branch: Vec<Vec<Commit>>, ordering: MergeOrder) -> Vec<Commit> {
    let mut seen = HashSet::new();
    let mut combined: Vec<Commit> = per_branch
        .into_iter()
        .flatten()
        .filter(|commit| seen.insert(commit.full_id.clone()))
        .collect();

    match ordering {
        MergeOrder::Concatenate => combined.reverse(),
        MergeOrder::Chronological => {
            combined.sort_by(|a, b| {
                a.authored_at
                    .cmp(&b.authored_at)
                    .then_with(|| a.full_id.cmp(&b.full_id))
            });
        }
    }

    combined
}
