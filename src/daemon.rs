//! Scheduler - the long-running polling loop
//!
//! Every pass walks the configured repositories in declared order and runs one
//! [`DeliveryCoordinator`] cycle for each. Failures and panics of a single
//! repository are contained at the per-repository boundary; the pass moves on
//! to the next repository. After a pass the scheduler sleeps for the check
//! interval, or for the error backoff when the pass itself blew up.
//!
//! Shutdown is cooperative: a Ctrl+C (or [`ShutdownHandle::shutdown`]) is
//! honored between repositories and while sleeping, never in the middle of a
//! repository's deliver/checkpoint step.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RepoConfig};
use crate::coordinator::{CycleOutcome, DeliveryCoordinator};

/// Scheduler state and control
pub struct Scheduler {
    repos: Vec<RepoConfig>,
    coordinator: DeliveryCoordinator,
    interval: Duration,
    error_backoff: Duration,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
    stats: SchedulerStats,
    /// Number of upcoming passes that panic before touching any repository
    #[cfg(test)]
    failing_passes: u32,
}

/// Counters accumulated over the scheduler's lifetime
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub delivered: u64,
    pub idle: u64,
    pub delivery_failures: u64,
    pub repo_errors: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
}

/// Result of one pass over the repository list
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub delivered: usize,
    pub idle: usize,
    pub delivery_failed: usize,
    pub errored: usize,
    /// Set when shutdown cut the pass short
    pub interrupted: bool,
    pub duration: Duration,
}

impl PassSummary {
    pub fn processed(&self) -> usize {
        self.delivered + self.idle + self.delivery_failed + self.errored
    }
}

/// Cloneable handle that asks a running scheduler to stop
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: broadcast::Sender<()>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Scheduler {
    pub fn new(
        repos: Vec<RepoConfig>,
        coordinator: DeliveryCoordinator,
        interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            repos,
            coordinator,
            interval,
            error_backoff,
            shutdown_sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            stats: SchedulerStats::default(),
            #[cfg(test)]
            failing_passes: 0,
        }
    }

    /// Wire the production components described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.repo_configs(),
            DeliveryCoordinator::from_config(config)?,
            config.check_interval()?,
            config.error_backoff()?,
        ))
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown_sender.clone(),
            requested: self.shutdown_requested.clone(),
        }
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    pub fn coordinator(&self) -> &DeliveryCoordinator {
        &self.coordinator
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Run passes until shutdown is requested
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Starting scheduler: {} repositories, check interval {:?}",
            self.repos.len(),
            self.interval
        );

        let mut shutdown_receiver = self.shutdown_sender.subscribe();

        let handle = self.shutdown_handle();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received, stopping after the current repository...");
                    handle.shutdown();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
        });

        loop {
            if self.shutdown_requested() {
                break;
            }

            let pass = AssertUnwindSafe(self.run_pass()).catch_unwind().await;
            let pause = match pass {
                Ok(summary) => {
                    log_pass(&summary);
                    self.interval
                }
                Err(panic) => {
                    self.stats.failed_passes += 1;
                    error!(
                        "Pass aborted unexpectedly: {}; retrying in {:?}",
                        panic_message(panic.as_ref()),
                        self.error_backoff
                    );
                    self.error_backoff
                }
            };

            if self.shutdown_requested() {
                break;
            }

            debug!("Next pass in {:?}", pause);

            tokio::select! {
                _ = shutdown_receiver.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// One pass over every repository, in declared order
    pub async fn run_pass(&mut self) -> PassSummary {
        #[cfg(test)]
        if self.failing_passes > 0 {
            self.failing_passes -= 1;
            panic!("pass failed before processing repositories");
        }

        let summary = self.process_repos().await;

        self.stats.passes += 1;
        self.stats.delivered += summary.delivered as u64;
        self.stats.idle += summary.idle as u64;
        self.stats.delivery_failures += summary.delivery_failed as u64;
        self.stats.repo_errors += summary.errored as u64;
        self.stats.last_pass_at = Some(Utc::now());

        summary
    }

    async fn process_repos(&self) -> PassSummary {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        for repo in &self.repos {
            if self.shutdown_requested() {
                info!("Shutdown requested, ending pass before {}", repo.repo);
                summary.interrupted = true;
                break;
            }

            match AssertUnwindSafe(self.coordinator.process_repo(repo))
                .catch_unwind()
                .await
            {
                Ok(Ok(CycleOutcome::NoNewCommits)) => summary.idle += 1,
                Ok(Ok(CycleOutcome::Delivered { .. })) => summary.delivered += 1,
                Ok(Ok(CycleOutcome::DeliveryFailed { .. })) => summary.delivery_failed += 1,
                Ok(Err(e)) => {
                    summary.errored += 1;
                    error!("Error while processing {}: {:#}", repo.repo, e);
                }
                Err(panic) => {
                    summary.errored += 1;
                    error!(
                        "Processing {} panicked: {}",
                        repo.repo,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        summary.duration = started.elapsed();
        summary
    }
}

fn log_pass(summary: &PassSummary) {
    info!(
        "Pass completed in {:.2}s: {} delivered, {} idle, {} delivery failures, {} errors{}",
        summary.duration.as_secs_f64(),
        summary.delivered,
        summary.idle,
        summary.delivery_failed,
        summary.errored,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
