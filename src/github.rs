use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::env;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::commit::{ChangeKind, ChangedFile, Commit};
use crate::config::Config;

/// Distinguishable failures of the remote commit-history API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("access forbidden, check token permissions: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request failed: {0}")]
    Transient(String),
}

impl FetchError {
    /// Errors that will not go away by retrying on the next cycle
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound(_) | FetchError::Unauthorized(_) | FetchError::Forbidden(_)
        )
    }

    /// Classify an HTTP status and GitHub error message
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => FetchError::Unauthorized(message),
            404 => FetchError::NotFound(message),
            429 => FetchError::RateLimited(message),
            403 if message.to_lowercase().contains("rate limit") => {
                FetchError::RateLimited(message)
            }
            403 => FetchError::Forbidden(message),
            other => FetchError::Transient(format!("HTTP {}: {}", other, message)),
        }
    }
}

impl From<octocrab::Error> for FetchError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                FetchError::from_status(source.status_code.as_u16(), source.message.clone())
            }
            other => FetchError::Transient(other.to_string()),
        }
    }
}

/// Read access to a repository's commit history
///
/// Listings are newest-first, as the remote API returns them.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// List commits reachable from `branch` (default branch when `None`)
    async fn list_commits(
        &self,
        repo: &str,
        branch: Option<&str>,
        since: Option<DateTime<Utc>>,
        per_page: u8,
    ) -> Result<Vec<Commit>, FetchError>;

    /// Fetch one commit including author email and changed files
    async fn commit_detail(&self, repo: &str, full_id: &str) -> Result<Commit, FetchError>;
}

// Wire format of GET /repos/{repo}/commits[/{sha}]

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitData,
    #[serde(default)]
    files: Option<Vec<ApiFile>>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitData {
    message: String,
    author: Option<ApiAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiFile {
    filename: String,
    status: String,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

#[derive(Debug, Serialize)]
struct ListCommitsParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<String>,
    per_page: u8,
}

impl From<ApiCommit> for Commit {
    fn from(api: ApiCommit) -> Self {
        let (name, email, date) = match api.commit.author {
            Some(author) => (author.name, author.email, author.date.unwrap_or_default()),
            None => (String::new(), String::new(), DateTime::<Utc>::default()),
        };

        let files = api
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|file| ChangedFile {
                path: file.filename,
                change_kind: ChangeKind::parse(&file.status),
                additions: file.additions,
                deletions: file.deletions,
            })
            .collect();

        Commit::new(api.sha, api.commit.message, name, email, date, api.html_url).with_files(files)
    }
}

/// Format used for the `since` query parameter
fn format_since(since: DateTime<Utc>) -> String {
    since.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// GitHub client wrapper with authentication management
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

/// GitHub authentication strategies
#[derive(Debug, Clone)]
pub enum AuthStrategy {
    /// Token written in the config file
    ConfigToken,
    /// Use GitHub CLI authentication
    GitHubCLI,
    /// Use environment variable token
    EnvironmentToken,
}

impl GitHubClient {
    /// Create a new GitHub client with automatic authentication
    pub fn new(config: &Config) -> Result<Self> {
        let (auth_strategy, token) = Self::detect_authentication(config)?;

        info!("Using authentication strategy: {:?}", auth_strategy);

        Self::with_token(token, config.github.api_url.as_deref())
    }

    /// Create a client from an explicit token and optional API base URL
    pub fn with_token(token: String, api_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);

        if let Some(url) = api_url {
            builder = builder
                .base_uri(url)
                .with_context(|| format!("Invalid GitHub API URL: {}", url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Detect and obtain GitHub authentication
    fn detect_authentication(config: &Config) -> Result<(AuthStrategy, String)> {
        if let Some(token) = config.github.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok((AuthStrategy::ConfigToken, token.clone()));
        }

        match config.github.auth_method.as_str() {
            "auto" => {
                if let Ok(token) = Self::try_github_cli() {
                    Ok((AuthStrategy::GitHubCLI, token))
                } else if let Ok(token) = Self::try_environment_token() {
                    Ok((AuthStrategy::EnvironmentToken, token))
                } else {
                    Err(anyhow!(
                        "No GitHub authentication found. Please either:\n\
                         1. Install and authenticate GitHub CLI: gh auth login\n\
                         2. Set GITHUB_TOKEN environment variable\n\
                         3. Set github.token in the config file"
                    ))
                }
            }
            "gh_cli" => {
                let token = Self::try_github_cli()
                    .context("GitHub CLI authentication failed. Run: gh auth login")?;
                Ok((AuthStrategy::GitHubCLI, token))
            }
            "token" => {
                let token = Self::try_environment_token()
                    .context("GITHUB_TOKEN environment variable not found or invalid")?;
                Ok((AuthStrategy::EnvironmentToken, token))
            }
            other => Err(anyhow!("Unknown auth method: {}", other)),
        }
    }

    /// Try to get token from GitHub CLI
    fn try_github_cli() -> Result<String> {
        debug!("Attempting GitHub CLI authentication");

        let token_output = Command::new("gh")
            .args(["auth", "token"])
            .output()
            .context("Failed to run GitHub CLI (is gh installed?)")?;

        if !token_output.status.success() {
            return Err(anyhow!(
                "Failed to retrieve token from GitHub CLI: {}",
                String::from_utf8_lossy(&token_output.stderr)
            ));
        }

        let token = String::from_utf8(token_output.stdout)
            .context("GitHub CLI token is not valid UTF-8")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Err(anyhow!("GitHub CLI returned empty token"));
        }

        debug!("Successfully obtained token from GitHub CLI");
        Ok(token)
    }

    /// Try to get token from environment variable
    fn try_environment_token() -> Result<String> {
        debug!("Attempting environment variable authentication");

        let token = env::var("GITHUB_TOKEN").context("GITHUB_TOKEN environment variable not set")?;

        if token.is_empty() {
            return Err(anyhow!("GITHUB_TOKEN is empty"));
        }

        if !token.starts_with("ghp_")
            && !token.starts_with("gho_")
            && !token.starts_with("ghs_")
            && !token.starts_with("github_pat_")
        {
            warn!("GITHUB_TOKEN doesn't look like a valid GitHub token");
        }

        Ok(token)
    }
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn list_commits(
        &self,
        repo: &str,
        branch: Option<&str>,
        since: Option<DateTime<Utc>>,
        per_page: u8,
    ) -> Result<Vec<Commit>, FetchError> {
        let params = ListCommitsParams {
            sha: branch,
            since: since.map(format_since),
            per_page,
        };

        debug!(
            "Listing commits for {} (branch: {}, since: {:?})",
            repo,
            branch.unwrap_or("<default>"),
            params.since
        );

        let commits: Vec<ApiCommit> = self
            .client
            .get(format!("/repos/{}/commits", repo), Some(&params))
            .await?;

        Ok(commits.into_iter().map(Commit::from).collect())
    }

    async fn commit_detail(&self, repo: &str, full_id: &str) -> Result<Commit, FetchError> {
        let commit: ApiCommit = self
            .client
            .get(format!("/repos/{}/commits/{}", repo, full_id), None::<&()>)
            .await?;

        Ok(commit.into())
    }
}
