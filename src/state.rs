//! Checkpoint Store - SQLite-based persistence of per-repository delivery cursors
//!
//! Each watched repository has one row recording when it was last successfully
//! delivered and the newest commit of that delivered batch. Rows are created on
//! the first successful cycle and updated in place afterwards.
//!
//! The database is stored in XDG_DATA_HOME/commitcast/state.db

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Durable cursor for one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCheckpoint {
    pub repo: String,
    /// `None` means the repository was never successfully delivered
    pub last_check_time: Option<DateTime<Utc>>,
    /// Newest commit of the most recently delivered batch
    pub last_commit_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Keyed checkpoint storage with point lookup and atomic upsert
pub trait CheckpointStore: Send + Sync {
    /// Look up the checkpoint for a repository
    fn load(&self, repo: &str) -> Result<Option<RepoCheckpoint>>;

    /// Atomically move the cursor forward after a confirmed delivery
    fn advance(&self, repo: &str, checked_at: DateTime<Utc>, last_commit_id: &str) -> Result<()>;

    /// All checkpoints, ordered by repository
    fn list(&self) -> Result<Vec<RepoCheckpoint>>;

    /// Delete a checkpoint (operator action). Returns whether a row existed.
    fn reset(&self, repo: &str) -> Result<bool>;
}

/// SQLite-backed checkpoint store
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open or create the state database at the default location
    pub fn open() -> Result<Self> {
        Self::open_at(Self::default_path())
    }

    /// Open or create the state database at a specific path
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        info!("State database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Default database path
    pub fn default_path() -> PathBuf {
        let data_dir = if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(data_home)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".local/share")
        } else {
            PathBuf::from("/tmp")
        };

        data_dir.join("commitcast").join("state.db")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database lock poisoned"))
    }

    fn initialize(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS repo_checkpoints (
                    repo TEXT PRIMARY KEY,
                    last_check_time TEXT,
                    last_commit_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
            )
            .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn row_to_checkpoint(row: &Row<'_>) -> rusqlite::Result<RepoCheckpoint> {
        let repo: String = row.get(0)?;
        let last_check_time =
            stored_timestamp(&repo, "last_check_time", row.get::<_, Option<String>>(1)?);
        let created_at = stored_timestamp(&repo, "created_at", row.get(3).ok());
        let updated_at = stored_timestamp(&repo, "updated_at", row.get(4).ok());

        Ok(RepoCheckpoint {
            last_check_time,
            last_commit_id: row.get(2)?,
            created_at: created_at.unwrap_or_else(Utc::now),
            updated_at: updated_at.unwrap_or_else(Utc::now),
            repo,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Unreadable values are logged and read as absent
fn stored_timestamp(repo: &str, column: &str, value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    let parsed = parse_timestamp(&value);
    if parsed.is_none() {
        warn!(
            "{}: stored {} {:?} is not an RFC 3339 timestamp; ignoring it",
            repo, column, value
        );
    }
    parsed
}

impl CheckpointStore for StateDb {
    fn load(&self, repo: &str) -> Result<Option<RepoCheckpoint>> {
        let checkpoint = self
            .conn()?
            .query_row(
                r#"
                SELECT repo, last_check_time, last_commit_id, created_at, updated_at
                FROM repo_checkpoints
                WHERE repo = ?1
                "#,
                params![repo],
                Self::row_to_checkpoint,
            )
            .optional()
            .context("Failed to query checkpoint")?;

        Ok(checkpoint)
    }

    fn advance(&self, repo: &str, checked_at: DateTime<Utc>, last_commit_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO repo_checkpoints (repo, last_check_time, last_commit_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                ON CONFLICT(repo) DO UPDATE SET
                    last_check_time = excluded.last_check_time,
                    last_commit_id = excluded.last_commit_id,
                    updated_at = excluded.updated_at
                "#,
                params![repo, checked_at.to_rfc3339(), last_commit_id, now],
            )
            .context("Failed to upsert checkpoint")?;

        debug!(
            "Advanced checkpoint for {} to {}",
            repo,
            crate::commit::short_id(last_commit_id)
        );
        Ok(())
    }

    fn list(&self) -> Result<Vec<RepoCheckpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT repo, last_check_time, last_commit_id, created_at, updated_at
            FROM repo_checkpoints
            ORDER BY repo
            "#,
        )?;

        let checkpoints = stmt
            .query_map([], Self::row_to_checkpoint)
            .context("Failed to query checkpoints")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect checkpoints")?;

        Ok(checkpoints)
    }

    fn reset(&self, repo: &str) -> Result<bool> {
        let count = self
            .conn()?
            .execute(
                "DELETE FROM repo_checkpoints WHERE repo = ?1",
                params![repo],
            )
            .context("Failed to delete checkpoint")?;

        if count > 0 {
            info!("Checkpoint for {} deleted", repo);
        }
        Ok(count > 0)
    }
}
