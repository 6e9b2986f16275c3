//! AI commit summarizer backed by an OpenAI-compatible chat completions API.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

use crate::commit::Commit;
use crate::config::SummarizerConfig;

/// Changed files listed per commit in the prompt
const PROMPT_MAX_FILES: usize = 5;

const SYSTEM_PROMPT: &str = "You are a concise assistant that summarizes GitHub commit history \
for a team chat. Group changes into features, fixes, refactoring and other notable changes.";

/// Produces the digest text for a batch of commits
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, repo: &str, commits: &[Commit]) -> Result<String>;
}

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl OpenAiSummarizer {
    /// Build from config; `None` when no API key is available
    pub fn from_config(config: &SummarizerConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.resolved_api_key() else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create summarizer HTTP client")?;

        Ok(Some(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, repo: &str, commits: &[Commit]) -> Result<String> {
        let prompt = format!(
            "Summarize the following commits of repository {}.\n\
             Keep it short and suitable for a group chat; list the most important changes first.\n{}",
            repo,
            format_commits_for_prompt(commits)
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!("Requesting summary of {} commits for {}", commits.len(), repo);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Summarizer request failed")?
            .error_for_status()
            .context("Summarizer returned an error status")?;

        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to decode summarizer response")?;

        let summary = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("Summarizer returned an empty reply"))?;

        Ok(format!(
            "📊 {} update summary\n{}\n{}\n\n🔗 Details: https://github.com/{}/commits",
            repo,
            "=".repeat(30),
            summary,
            repo
        ))
    }
}

/// Commit listing embedded in the prompt
fn format_commits_for_prompt(commits: &[Commit]) -> String {
    let mut text = String::new();

    for commit in commits {
        let _ = writeln!(text, "{}", "-".repeat(50));
        let _ = writeln!(text, "Commit: {}", commit.short_id);
        let _ = writeln!(text, "Author: {}", commit.author_name);
        let _ = writeln!(text, "Date: {}", commit.authored_at.to_rfc3339());
        let _ = writeln!(text, "Message: {}", commit.message);

        if !commit.changed_files.is_empty() {
            let _ = writeln!(text, "Changed files:");
            for file in commit.changed_files.iter().take(PROMPT_MAX_FILES) {
                let _ = writeln!(text, "  - {} ({})", file.path, file.change_kind.as_str());
            }
            if commit.changed_files.len() > PROMPT_MAX_FILES {
                let _ = writeln!(
                    text,
                    "  ... and {} more files",
                    commit.changed_files.len() - PROMPT_MAX_FILES
                );
            }
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{ChangeKind, ChangedFile};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn commit_with_files(n_files: usize) -> Commit {
        let files = (0..n_files)
            .map(|i| ChangedFile {
                path: format!("src/file{}.rs", i),
                change_kind: ChangeKind::Modified,
                additions: 1,
                deletions: 0,
            })
            .collect();
        Commit::new(
            "abcdef1234567890",
            "Add feature",
            "Ada",
            "ada@example.com",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            "https://github.com/o/r/commit/abcdef1",
        )
        .with_files(files)
    }

    fn summarizer_for(server: &MockServer) -> OpenAiSummarizer {
        let config = SummarizerConfig {
            api_key: Some("sk-test".to_string()),
            base_url: format!("{}/v1/", server.uri()),
            ..Default::default()
        };
        OpenAiSummarizer::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn test_prompt_caps_file_list() {
        let text = format_commits_for_prompt(&[commit_with_files(7)]);

        assert!(text.contains("Commit: abcdef1"));
        assert!(text.contains("src/file4.rs (modified)"));
        assert!(!text.contains("src/file5.rs"));
        assert!(text.contains("... and 2 more files"));
    }

    #[test]
    fn test_disabled_without_api_key() {
        let config = SummarizerConfig {
            api_key: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(OpenAiSummarizer::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summarize_wraps_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  Added a feature.  "}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer_for(&server)
            .summarize("o/r", &[commit_with_files(1)])
            .await
            .unwrap();

        assert!(summary.starts_with("📊 o/r update summary"));
        assert!(summary.contains("\nAdded a feature.\n"));
        assert!(summary.ends_with("https://github.com/o/r/commits"));
    }

    #[tokio::test]
    async fn test_summarize_fails_on_error_status() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = summarizer_for(&server)
            .summarize("o/r", &[commit_with_files(0)])
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_summarize_fails_on_empty_reply() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let result = summarizer_for(&server)
            .summarize("o/r", &[commit_with_files(0)])
            .await;

        assert!(result.is_err());
    }
}
