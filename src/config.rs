use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::{BranchSet, MergeOrder};

/// Smallest check interval accepted, to stay inside GitHub API rate limits
pub const MIN_CHECK_INTERVAL_SECS: u64 = 60;

/// GitHub caps `per_page` on the commits endpoint at 100
pub const MAX_PAGE_SIZE: u8 = 100;

/// Main configuration structure for commitcast
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Repositories to watch, processed in declared order
    pub repositories: Vec<RepoEntry>,

    /// GitHub authentication and fetch settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Polling schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Commit merge behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// AI summarizer settings
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Delivery channel settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// SQLite checkpoint database (defaults to XDG data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A repository entry as written in the config file
///
/// Accepts a bare `"owner/repo"` (all branches), `{repo, branch}` or `{repo, branches}`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RepoEntry {
    Name(String),
    Detailed {
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branches: Option<OneOrMany>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Normalized, read-only repository configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    pub repo: String,
    pub branches: BranchSet,
}

impl RepoEntry {
    pub fn repo(&self) -> &str {
        match self {
            RepoEntry::Name(repo) => repo,
            RepoEntry::Detailed { repo, .. } => repo,
        }
    }

    pub fn to_repo_config(&self) -> RepoConfig {
        let branches = match self {
            RepoEntry::Name(_) => BranchSet::All,
            RepoEntry::Detailed {
                branch: Some(branch),
                ..
            } => BranchSet::from_names(vec![branch.clone()]),
            RepoEntry::Detailed {
                branches: Some(OneOrMany::One(branch)),
                ..
            } => BranchSet::from_names(vec![branch.clone()]),
            RepoEntry::Detailed {
                branches: Some(OneOrMany::Many(names)),
                ..
            } => BranchSet::from_names(names.clone()),
            RepoEntry::Detailed { .. } => BranchSet::All,
        };

        RepoConfig {
            repo: self.repo().trim().to_string(),
            branches,
        }
    }
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Explicit personal access token; takes precedence over auth_method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// API base URL override (GitHub Enterprise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Commits requested per branch per cycle; only the first page is read
    #[serde(default = "default_page_size")]
    pub page_size: u8,
}

/// Polling schedule
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    /// Sleep between full passes
    #[serde(default = "default_check_interval")]
    pub check_interval: String, // "5m"

    /// Sleep after a pass fails outside any single repository
    #[serde(default = "default_error_backoff")]
    pub error_backoff: String, // "60s"
}

/// Commit merge configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub ordering: MergeOrder,
}

/// OpenAI-compatible summarizer configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummarizerConfig {
    /// API key; falls back to OPENAI_API_KEY. Without a key digests use the raw listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_summarizer_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Group chat bot (OneBot HTTP API) configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_url")]
    pub url: String,

    #[serde(default)]
    pub group_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_page_size() -> u8 {
    30
}
fn default_check_interval() -> String {
    "5m".to_string()
}
fn default_error_backoff() -> String {
    "60s".to_string()
}
fn default_summarizer_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    800
}
fn default_delivery_url() -> String {
    "http://127.0.0.1:5700".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
            token: None,
            api_url: None,
            page_size: default_page_size(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            error_backoff: default_error_backoff(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_summarizer_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: default_delivery_url(),
            group_id: String::new(),
            access_token: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SummarizerConfig {
    /// API key from config, then OPENAI_API_KEY; `None` disables the summarizer
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl Config {
    /// Load and validate configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("commitcast").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(path) = &self.database_path {
            self.database_path = Some(
                shellexpand::full(path)
                    .context("Failed to expand database_path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Reject configurations the scheduler cannot run safely
    pub fn validate(&self) -> Result<()> {
        if self.repositories.is_empty() {
            bail!("repositories must not be empty");
        }

        for entry in &self.repositories {
            let repo = entry.repo().trim();
            let valid = matches!(
                repo.split_once('/'),
                Some((owner, name)) if !owner.is_empty() && !name.is_empty()
            );
            if !valid {
                bail!("invalid repository '{}': expected owner/repo", repo);
            }
        }

        let interval = self.check_interval()?;
        if interval.as_secs() < MIN_CHECK_INTERVAL_SECS {
            bail!(
                "check_interval must be at least {}s, got {}s",
                MIN_CHECK_INTERVAL_SECS,
                interval.as_secs()
            );
        }
        self.error_backoff()?;

        if self.github.page_size == 0 || self.github.page_size > MAX_PAGE_SIZE {
            bail!(
                "github.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                self.github.page_size
            );
        }

        if self.delivery.url.trim().is_empty() {
            bail!("delivery.url must not be empty");
        }

        Ok(())
    }

    /// Normalized repository list in declared order
    pub fn repo_configs(&self) -> Vec<RepoConfig> {
        self.repositories
            .iter()
            .map(RepoEntry::to_repo_config)
            .collect()
    }

    pub fn check_interval(&self) -> Result<Duration> {
        parse_duration(&self.schedule.check_interval)
            .context("Failed to parse schedule.check_interval")
    }

    pub fn error_backoff(&self) -> Result<Duration> {
        parse_duration(&self.schedule.error_backoff)
            .context("Failed to parse schedule.error_backoff")
    }

    /// Resolved checkpoint database location
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => PathBuf::from(path),
            None => crate::state::StateDb::default_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: vec![RepoEntry::Detailed {
                repo: "owner/repo".to_string(),
                branch: Some("main".to_string()),
                branches: None,
            }],
            github: GitHubConfig::default(),
            schedule: ScheduleConfig::default(),
            sync: SyncConfig::default(),
            summarizer: SummarizerConfig::default(),
            delivery: DeliveryConfig::default(),
            database_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Parse duration strings like "30s", "5m", "1h", "2d" or bare seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, unit, what) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, 1u64, "seconds")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, 86400, "days")
    } else {
        let secs = duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30s', '5m', '1h'")?;
        return Ok(Duration::from_secs(secs));
    };

    let secs = value
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", what))?
        .checked_mul(unit)
        .with_context(|| format!("Duration too large: {}", duration_str))?;

    Ok(Duration::from_secs(secs))
}
