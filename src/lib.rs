//! commitcast - GitHub commit digest broadcaster
//!
//! commitcast polls a list of GitHub repositories on a fixed interval, works out
//! which commits have not been reported yet, summarizes them and posts the
//! digest to a group chat bot. Delivery is at-least-once: the per-repository
//! checkpoint only moves after the delivery channel confirms a message.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with XDG defaults
//! - [`github`]: GitHub API access and authentication
//! - [`fetcher`]: per-branch commit listing, truncation and enrichment
//! - [`sync`]: cross-branch new-commit detection
//! - [`state`]: SQLite checkpoint store
//! - [`summarizer`] / [`digest`]: digest text, AI or raw listing
//! - [`notifier`]: group chat delivery
//! - [`coordinator`]: one compute/deliver/checkpoint cycle
//! - [`daemon`]: the polling scheduler

pub mod commit;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod digest;
pub mod fetcher;
pub mod github;
pub mod notifier;
pub mod state;
pub mod summarizer;
pub mod sync;

pub use commit::{ChangeKind, ChangedFile, Commit};
pub use config::{Config, RepoConfig};
pub use coordinator::{CycleOutcome, DeliveryCoordinator};
pub use daemon::{PassSummary, Scheduler, SchedulerStats, ShutdownHandle};
pub use fetcher::BranchFetcher;
pub use github::{CommitSource, FetchError, GitHubClient};
pub use notifier::{GroupBotNotifier, Notifier};
pub use state::{CheckpointStore, RepoCheckpoint, StateDb};
pub use summarizer::{OpenAiSummarizer, Summarizer};
pub use sync::{BranchSet, MergeOrder, SyncEngine};
