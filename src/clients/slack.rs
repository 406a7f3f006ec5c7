use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{clients::DeliveryChannel, config::Config, models::notification::Channel};

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub default_channel: Option<String>,
}

impl SlackConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.slack_api_url.clone(),
            bot_token: config.slack_bot_token.clone(),
            default_channel: config.slack_channel.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

/// Posts notifications to a Slack channel through `chat.postMessage`.
pub struct SlackChannel {
    http_client: Client,
    config: SlackConfig,
}

impl SlackChannel {
    pub fn new(config: SlackConfig) -> Self {
        info!(api_url = %config.api_url, "Slack channel initialized");

        Self {
            http_client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl DeliveryChannel for SlackChannel {
    fn kind(&self) -> Channel {
        Channel::Chat
    }

    fn is_configured(&self) -> bool {
        self.config.bot_token.is_some() && self.config.default_channel.is_some()
    }

    async fn attempt_delivery(&self, message: &str, recipient: Option<&str>) -> Result<(), Error> {
        let token = self
            .config
            .bot_token
            .as_deref()
            .ok_or_else(|| anyhow!("Slack bot token is not configured"))?;

        let channel = recipient
            .or(self.config.default_channel.as_deref())
            .ok_or_else(|| anyhow!("no Slack channel given and none configured"))?;

        let url = format!("{}/chat.postMessage", self.config.api_url.trim_end_matches('/'));

        debug!(channel, "Posting Slack message");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&PostMessageRequest {
                channel,
                text: message,
            })
            .send()
            .await
            .map_err(|e| anyhow!("failed to send slack message with following error {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to send slack message with following error HTTP {}",
                response.status()
            ));
        }

        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("unreadable Slack response: {}", e))?;

        if body.ok {
            Ok(())
        } else {
            Err(anyhow!(
                "failed to send slack message with following error {}",
                body.error.unwrap_or_else(|| "unknown_error".to_string())
            ))
        }
    }
}
