//! Delivery Coordinator - one compute/confirm/commit cycle for a repository
//!
//! 1. read the checkpoint
//! 2. compute the new-commit batch through the [`SyncEngine`]
//! 3. summarize it (falling back to a raw listing)
//! 4. deliver the digest
//! 5. advance the checkpoint, only if delivery was confirmed
//!
//! The checkpoint write is the only durable mutation of a cycle. Any failure
//! before it leaves the checkpoint untouched, so the next cycle recomputes and
//! re-offers the same batch.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::commit::{short_id, Commit};
use crate::config::{Config, RepoConfig};
use crate::digest::fallback_digest;
use crate::fetcher::BranchFetcher;
use crate::github::GitHubClient;
use crate::notifier::{GroupBotNotifier, Notifier};
use crate::state::{CheckpointStore, RepoCheckpoint, StateDb};
use crate::summarizer::{OpenAiSummarizer, Summarizer};
use crate::sync::SyncEngine;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What a single repository cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing new since the checkpoint; no side effects
    NoNewCommits,
    /// Digest delivered. `checkpoint_saved` is false when the write failed.
    Delivered {
        commits: usize,
        last_commit_id: String,
        checkpoint_saved: bool,
    },
    /// Delivery was not confirmed; the batch will be offered again next cycle
    DeliveryFailed { commits: usize },
}

pub struct DeliveryCoordinator {
    engine: SyncEngine,
    store: Arc<dyn CheckpointStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
    notifier: Arc<dyn Notifier>,
    clock: Clock,
}

impl DeliveryCoordinator {
    pub fn new(
        engine: SyncEngine,
        store: Arc<dyn CheckpointStore>,
        summarizer: Option<Arc<dyn Summarizer>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            engine,
            store,
            summarizer,
            notifier,
            clock: Arc::new(Utc::now),
        }
    }

    /// Wire the production components described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let github = GitHubClient::new(config).context("Failed to create GitHub client")?;
        let fetcher = BranchFetcher::new(Arc::new(github), config.github.page_size);
        let engine = SyncEngine::new(fetcher, config.sync.ordering);

        let store: Arc<dyn CheckpointStore> = Arc::new(
            StateDb::open_at(config.database_path()).context("Failed to open state database")?,
        );

        let summarizer = OpenAiSummarizer::from_config(&config.summarizer)?
            .map(|s| Arc::new(s) as Arc<dyn Summarizer>);
        if summarizer.is_none() {
            warn!("No summarizer API key configured; digests will be raw commit listings");
        }

        let notifier: Arc<dyn Notifier> =
            Arc::new(GroupBotNotifier::from_config(&config.delivery)?);

        Ok(Self::new(engine, store, summarizer, notifier))
    }

    /// Replace the wall clock used for `last_check_time`
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// The checkpoint and the batch the next cycle would deliver
    ///
    /// Nothing is summarized, delivered or written.
    pub async fn pending_commits(
        &self,
        repo_config: &RepoConfig,
    ) -> (Option<RepoCheckpoint>, Vec<Commit>) {
        let repo = repo_config.repo.as_str();

        let checkpoint = self.read_checkpoint(repo);
        let (last_check_time, last_commit_id) = match &checkpoint {
            Some(cp) => (cp.last_check_time, cp.last_commit_id.as_deref()),
            None => (None, None),
        };

        let commits = self
            .engine
            .get_new_commits(repo, &repo_config.branches, last_check_time, last_commit_id)
            .await;

        (checkpoint, commits)
    }

    /// Run one cycle for `repo_config`
    pub async fn process_repo(&self, repo_config: &RepoConfig) -> Result<CycleOutcome> {
        let repo = repo_config.repo.as_str();

        info!(
            "Checking {} for new commits ({})",
            repo,
            repo_config.branches.describe()
        );

        let (_, commits) = self.pending_commits(repo_config).await;

        let Some(newest) = commits.last() else {
            info!("{}: no new commits", repo);
            return Ok(CycleOutcome::NoNewCommits);
        };
        let newest_id = newest.full_id.clone();

        info!("{}: {} new commit(s)", repo, commits.len());
        for commit in &commits {
            info!("  - {}: {}", commit.short_id, commit.headline());
        }

        let text = compose_digest(self.summarizer.as_deref(), repo, &commits).await;

        if !self.notifier.deliver(&text).await {
            error!(
                "{}: delivery failed, checkpoint left unchanged; batch will be retried",
                repo
            );
            return Ok(CycleOutcome::DeliveryFailed {
                commits: commits.len(),
            });
        }

        info!("{}: digest delivered", repo);

        let checkpoint_saved = match self.store.advance(repo, (self.clock)(), &newest_id) {
            Ok(()) => {
                info!("{}: checkpoint advanced to {}", repo, short_id(&newest_id));
                true
            }
            Err(e) => {
                error!(
                    "{}: failed to save checkpoint after delivery, \
                     batch will be delivered again: {:#}",
                    repo, e
                );
                false
            }
        };

        Ok(CycleOutcome::Delivered {
            commits: commits.len(),
            last_commit_id: newest_id,
            checkpoint_saved,
        })
    }

    /// Read failures degrade to "never checked", which re-fetches the full page window
    fn read_checkpoint(&self, repo: &str) -> Option<RepoCheckpoint> {
        match self.store.load(repo) {
            Ok(checkpoint) => {
                if checkpoint.is_none() {
                    info!("{}: first check, no checkpoint yet", repo);
                }
                checkpoint
            }
            Err(e) => {
                error!(
                    "{}: failed to read checkpoint, treating as first check \
                     (older commits may be re-delivered): {:#}",
                    repo, e
                );
                None
            }
        }
    }
}

/// Summarize a batch, or fall back to the raw listing when no summarizer
/// is configured or it fails
pub async fn compose_digest(
    summarizer: Option<&dyn Summarizer>,
    repo: &str,
    commits: &[Commit],
) -> String {
    let Some(summarizer) = summarizer else {
        return fallback_digest(repo, commits);
    };

    match summarizer.summarize(repo, commits).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!("{}: summarizer failed, sending raw listing: {:#}", repo, e);
            fallback_digest(repo, commits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::BranchFetcher;
    use crate::github::{CommitSource, FetchError};
    use crate::notifier::MockNotifier;
    use crate::state::StateDb;
    use crate::summarizer::MockSummarizer;
    use crate::sync::{BranchSet, MergeOrder};
    use anyhow::anyhow;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Serves a fixed newest-first listing and honors nothing else
    struct StaticSource(Vec<Commit>);

    #[async_trait]
    impl CommitSource for StaticSource {
        async fn list_commits(
            &self,
            _repo: &str,
            _branch: Option<&str>,
            _since: Option<DateTime<Utc>>,
            _per_page: u8,
        ) -> Result<Vec<Commit>, FetchError> {
            Ok(self.0.clone())
        }

        async fn commit_detail(&self, _repo: &str, full_id: &str) -> Result<Commit, FetchError> {
            self.0
                .iter()
                .find(|c| c.full_id == full_id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(full_id.to_string()))
        }
    }

    fn listing(n: usize) -> Vec<Commit> {
        (1..=n)
            .rev()
            .map(|i| {
                Commit::new(
                    format!("c{}", i),
                    format!("change {}", i),
                    "Ada",
                    "ada@example.com",
                    Utc.with_ymd_and_hms(2025, 1, 1, 0, i as u32, 0).unwrap(),
                    format!("https://github.com/o/r/commit/c{}", i),
                )
            })
            .collect()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap()
    }

    fn repo_config() -> RepoConfig {
        RepoConfig {
            repo: "o/r".to_string(),
            branches: BranchSet::All,
        }
    }

    fn coordinator(
        commits: Vec<Commit>,
        store: Arc<dyn CheckpointStore>,
        summarizer: Option<MockSummarizer>,
        notifier: MockNotifier,
    ) -> DeliveryCoordinator {
        let fetcher = BranchFetcher::new(Arc::new(StaticSource(commits)), 30);
        let engine = SyncEngine::new(fetcher, MergeOrder::Concatenate);
        DeliveryCoordinator::new(
            engine,
            store,
            summarizer.map(|s| Arc::new(s) as Arc<dyn Summarizer>),
            Arc::new(notifier),
        )
        .with_clock(fixed_now)
    }

    struct BrokenStore;

    impl CheckpointStore for BrokenStore {
        fn load(&self, _repo: &str) -> Result<Option<RepoCheckpoint>> {
            Err(anyhow!("disk unavailable"))
        }
        fn advance(&self, _repo: &str, _at: DateTime<Utc>, _id: &str) -> Result<()> {
            Err(anyhow!("disk unavailable"))
        }
        fn list(&self) -> Result<Vec<RepoCheckpoint>> {
            Err(anyhow!("disk unavailable"))
        }
        fn reset(&self, _repo: &str) -> Result<bool> {
            Err(anyhow!("disk unavailable"))
        }
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().times(0);
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(0);

        let coordinator = coordinator(Vec::new(), store.clone(), Some(summarizer), notifier);
        let outcome = coordinator.process_repo(&repo_config()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::NoNewCommits);
        assert!(store.load("o/r").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_delivery_advances_checkpoint_to_newest() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .withf(|repo, commits| {
                repo == "o/r"
                    && commits.iter().map(|c| c.full_id.as_str()).collect::<Vec<_>>()
                        == vec!["c1", "c2", "c3"]
            })
            .times(1)
            .returning(|_, _| Ok("summary text".to_string()));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|text| text == "summary text")
            .times(1)
            .returning(|_| true);

        let coordinator = coordinator(listing(3), store.clone(), Some(summarizer), notifier);
        let outcome = coordinator.process_repo(&repo_config()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                commits: 3,
                last_commit_id: "c3".to_string(),
                checkpoint_saved: true,
            }
        );
        let checkpoint = store.load("o/r").unwrap().unwrap();
        assert_eq!(checkpoint.last_commit_id.as_deref(), Some("c3"));
        assert_eq!(checkpoint.last_check_time, Some(fixed_now()));
    }

    #[tokio::test]
    async fn test_summarizer_failure_falls_back_to_listing() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let mut summarizer = MockSummarizer::new();
        summarizer
            .expect_summarize()
            .times(1)
            .returning(|_, _| Err(anyhow!("model overloaded")));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|text| text.matches("• ").count() == 5 && text.ends_with("... and 2 more"))
            .times(1)
            .returning(|_| true);

        let coordinator = coordinator(listing(7), store, Some(summarizer), notifier);
        let outcome = coordinator.process_repo(&repo_config()).await.unwrap();

        assert_matches!(outcome, CycleOutcome::Delivered { commits: 7, .. });
    }

    #[tokio::test]
    async fn test_without_summarizer_uses_listing() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|text| text.starts_with("🔄 o/r has 2 new commit(s):"))
            .times(1)
            .returning(|_| true);

        let coordinator = coordinator(listing(2), store, None, notifier);
        coordinator.process_repo(&repo_config()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_failure_leaves_checkpoint_untouched() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        store.advance("o/r", fixed_now(), "c0").unwrap();
        let before = store.load("o/r").unwrap();

        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(1).returning(|_| false);

        let coordinator = coordinator(listing(2), store.clone(), None, notifier);
        let outcome = coordinator.process_repo(&repo_config()).await.unwrap();

        assert_eq!(outcome, CycleOutcome::DeliveryFailed { commits: 2 });
        assert_eq!(store.load("o/r").unwrap(), before);
    }

    #[tokio::test]
    async fn test_store_failures_do_not_abort_cycle() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(1).returning(|_| true);

        let coordinator = coordinator(listing(2), Arc::new(BrokenStore), None, notifier);
        let outcome = coordinator.process_repo(&repo_config()).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                commits: 2,
                last_commit_id: "c2".to_string(),
                checkpoint_saved: false,
            }
        );
    }

    #[tokio::test]
    async fn test_pending_commits_has_no_side_effects() {
        let store = Arc::new(StateDb::open_in_memory().unwrap());
        store.advance("o/r", fixed_now(), "c2").unwrap();
        let before = store.load("o/r").unwrap();

        let mut summarizer = MockSummarizer::new();
        summarizer.expect_summarize().times(0);
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().times(0);

        let coordinator = coordinator(listing(4), store.clone(), Some(summarizer), notifier);
        let (checkpoint, commits) = coordinator.pending_commits(&repo_config()).await;

        assert_eq!(checkpoint, before);
        let ids: Vec<_> = commits.iter().map(|c| c.full_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c4"]);
        assert_eq!(store.load("o/r").unwrap(), before);
    }

    #[tokio::test]
    async fn test_compose_digest_without_summarizer() {
        let digest = compose_digest(None, "o/r", &listing(1)).await;
        assert!(digest.contains("c1: change 1"));
    }
}
