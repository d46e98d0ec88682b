use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SlackConfig;

/// Delivers rendered notification text.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Resolves only once the message is confirmed delivered.
    async fn send(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct SlackService {
    client: Client,
    config: SlackConfig,
}

impl SlackService {
    pub fn new(config: SlackConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn post_message_url(&self) -> String {
        format!("{}/chat.postMessage", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Notifier for SlackService {
    async fn send(&self, text: &str) -> Result<()> {
        let payload = PostMessageRequest {
            channel: &self.config.channel_id,
            text,
        };

        let response = self
            .client
            .post(self.post_message_url())
            .bearer_auth(&self.config.bot_token)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Slack post failed ({}): {}", status, error_text));
        }

        // Slack reports most failures as 200 with `ok: false`.
        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(anyhow!(
                "Slack chat.postMessage rejected: {}",
                body.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }

        Ok(())
    }
}
