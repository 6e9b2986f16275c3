//! Delivery channel - posts digests to a group chat through a OneBot HTTP API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DeliveryConfig;

/// Outbound delivery of digest text
///
/// Ordinary failures (network down, rejected message) are reported as `false`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, text: &str) -> bool;
}

pub struct GroupBotNotifier {
    http: reqwest::Client,
    endpoint: String,
    group_id: Value,
    access_token: Option<String>,
}

impl GroupBotNotifier {
    pub fn from_config(config: &DeliveryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create delivery HTTP client")?;

        // OneBot expects numeric group ids
        let group_id = config
            .group_id
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(config.group_id.trim()));

        Ok(Self {
            http,
            endpoint: format!("{}/send_group_msg", config.url.trim_end_matches('/')),
            group_id,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl Notifier for GroupBotNotifier {
    async fn deliver(&self, text: &str) -> bool {
        let mut request = self.http.post(&self.endpoint).json(&json!({
            "group_id": self.group_id,
            "message": text,
        }));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Delivery request failed: {}", e);
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Delivery rejected with HTTP {}", status);
            return false;
        }

        // Bots answer 200 with a retcode; anything non-JSON counts as accepted
        match response.json::<Value>().await {
            Ok(body) => match body.get("retcode").and_then(Value::as_i64) {
                Some(0) | None => {
                    debug!("Delivery accepted");
                    true
                }
                Some(code) => {
                    warn!("Delivery rejected by bot (retcode {}): {}", code, body);
                    false
                }
            },
            Err(_) => true,
        }
    }
}
