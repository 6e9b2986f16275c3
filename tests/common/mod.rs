/// Common test doubles and helpers for commitcast integration tests
#[allow(dead_code)]
pub mod fakes {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};

    use commitcast::{
        BranchFetcher, ChangeKind, ChangedFile, CheckpointStore, Commit, CommitSource,
        DeliveryCoordinator, FetchError, MergeOrder, Notifier, RepoCheckpoint, StateDb,
        Summarizer, SyncEngine,
    };

    pub fn commit(id: &str, minute: u32) -> Commit {
        Commit::new(
            id,
            format!("Change {}", id),
            "Ada",
            "ada@example.com",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap(),
            format!("https://github.com/o/r/commit/{}", id),
        )
    }

    pub fn ids(commits: &[Commit]) -> Vec<String> {
        commits.iter().map(|c| c.full_id.clone()).collect()
    }

    /// A recorded `list_commits` call
    #[derive(Debug, Clone, PartialEq)]
    pub struct ListCall {
        pub repo: String,
        pub branch: Option<String>,
        pub since: Option<DateTime<Utc>>,
    }

    /// In-memory repository history keyed by branch selector
    #[derive(Default)]
    pub struct ScriptedSource {
        listings: Mutex<HashMap<Option<String>, Vec<Commit>>>,
        failing: Mutex<HashMap<Option<String>, FetchError>>,
        calls: Mutex<Vec<ListCall>>,
    }

    impl ScriptedSource {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Make `commit` the new head of `branch`
        pub fn push(&self, branch: Option<&str>, commit: Commit) {
            self.listings
                .lock()
                .unwrap()
                .entry(branch.map(str::to_string))
                .or_default()
                .insert(0, commit);
        }

        pub fn fail_branch(&self, branch: Option<&str>, err: FetchError) {
            self.failing
                .lock()
                .unwrap()
                .insert(branch.map(str::to_string), err);
        }

        pub fn calls(&self) -> Vec<ListCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl CommitSource for ScriptedSource {
        async fn list_commits(
            &self,
            repo: &str,
            branch: Option<&str>,
            since: Option<DateTime<Utc>>,
            per_page: u8,
        ) -> Result<Vec<Commit>, FetchError> {
            let key = branch.map(str::to_string);
            self.calls.lock().unwrap().push(ListCall {
                repo: repo.to_string(),
                branch: key.clone(),
                since,
            });

            if let Some(err) = self.failing.lock().unwrap().get(&key) {
                return Err(err.clone());
            }

            Ok(self
                .listings
                .lock()
                .unwrap()
                .get(&key)
                .map(|commits| {
                    commits
                        .iter()
                        .take(usize::from(per_page))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn commit_detail(&self, _repo: &str, full_id: &str) -> Result<Commit, FetchError> {
            let listings = self.listings.lock().unwrap();
            let commit = listings
                .values()
                .flatten()
                .find(|c| c.full_id == full_id)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(full_id.to_string()))?;

            Ok(commit.with_files(vec![ChangedFile {
                path: "src/lib.rs".to_string(),
                change_kind: ChangeKind::Modified,
                additions: 3,
                deletions: 1,
            }]))
        }
    }

    /// SQLite store whose writes can be switched off
    pub struct FlakyStore {
        inner: StateDb,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
    }

    impl FlakyStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: StateDb::open_in_memory().unwrap(),
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
            })
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }
    }

    impl CheckpointStore for FlakyStore {
        fn load(&self, repo: &str) -> Result<Option<RepoCheckpoint>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(anyhow!("simulated read failure"));
            }
            self.inner.load(repo)
        }

        fn advance(
            &self,
            repo: &str,
            checked_at: DateTime<Utc>,
            last_commit_id: &str,
        ) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(anyhow!("simulated write failure"));
            }
            self.inner.advance(repo, checked_at, last_commit_id)
        }

        fn list(&self) -> Result<Vec<RepoCheckpoint>> {
            self.inner.list()
        }

        fn reset(&self, repo: &str) -> Result<bool> {
            self.inner.reset(repo)
        }
    }

    /// Records every delivered text; acceptance can be toggled
    pub struct RecordingNotifier {
        accept: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                accept: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }

        pub fn set_accept(&self, accept: bool) {
            self.accept.store(accept, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, text: &str) -> bool {
            self.sent.lock().unwrap().push(text.to_string());
            self.accept.load(Ordering::SeqCst)
        }
    }

    /// Summarizer that lists the ids it was given, or always fails
    pub struct StubSummarizer {
        pub fail: bool,
    }

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, repo: &str, commits: &[Commit]) -> Result<String> {
            if self.fail {
                return Err(anyhow!("summarizer unavailable"));
            }
            Ok(format!("summary of {}: {}", repo, ids(commits).join(",")))
        }
    }

    /// Clock advancing one minute per reading
    pub fn ticking_clock() -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        let tick = Arc::new(AtomicI64::new(0));
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        move || base + chrono::Duration::minutes(tick.fetch_add(1, Ordering::SeqCst))
    }

    pub struct Harness {
        pub source: Arc<ScriptedSource>,
        pub store: Arc<FlakyStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub coordinator: DeliveryCoordinator,
    }

    impl Harness {
        pub fn new(summarizer: Option<StubSummarizer>) -> Self {
            Self::with_page_size(summarizer, 30)
        }

        pub fn with_page_size(summarizer: Option<StubSummarizer>, page_size: u8) -> Self {
            let source = ScriptedSource::new();
            let store = FlakyStore::new();
            let notifier = RecordingNotifier::new();

            let fetcher = BranchFetcher::new(source.clone(), page_size);
            let coordinator = DeliveryCoordinator::new(
                SyncEngine::new(fetcher, MergeOrder::Concatenate),
                store.clone(),
                summarizer.map(|s| Arc::new(s) as Arc<dyn Summarizer>),
                notifier.clone(),
            )
            .with_clock(ticking_clock());

            Self {
                source,
                store,
                notifier,
                coordinator,
            }
        }

        pub fn checkpoint(&self, repo: &str) -> Option<RepoCheckpoint> {
            self.store.load(repo).unwrap()
        }
    }
}

/// Assertion helpers for test validation
#[allow(dead_code)]
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
