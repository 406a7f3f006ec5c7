use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{clients::DeliveryChannel, config::Config, models::notification::Channel};

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub sender: Option<String>,
    pub default_recipient: Option<String>,
}

impl SmsConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.sms_api_url.clone(),
            api_key: config.sms_api_key.clone(),
            api_secret: config.sms_api_secret.clone(),
            sender: config.sms_sender.clone(),
            default_recipient: config.sms_default_recipient.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendSmsResponse {
    #[serde(default)]
    messages: Vec<SmsMessageStatus>,
}

#[derive(Debug, Deserialize)]
struct SmsMessageStatus {
    status: String,
    #[serde(rename = "error-text")]
    error_text: Option<String>,
}

/// Sends text messages through a Vonage-compatible `sms/json` endpoint.
pub struct SmsChannel {
    http_client: Client,
    config: SmsConfig,
}

impl SmsChannel {
    pub fn new(config: SmsConfig) -> Self {
        info!(api_url = %config.api_url, "SMS channel initialized");

        Self {
            http_client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl DeliveryChannel for SmsChannel {
    fn kind(&self) -> Channel {
        Channel::Sms
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
            && self.config.api_secret.is_some()
            && self.config.sender.is_some()
    }

    async fn attempt_delivery(&self, message: &str, recipient: Option<&str>) -> Result<(), Error> {
        let (Some(api_key), Some(api_secret), Some(sender)) = (
            self.config.api_key.as_deref(),
            self.config.api_secret.as_deref(),
            self.config.sender.as_deref(),
        ) else {
            return Err(anyhow!("SMS gateway credentials are not configured"));
        };

        let to = recipient
            .or(self.config.default_recipient.as_deref())
            .ok_or_else(|| anyhow!("no SMS recipient given and none configured"))?;

        let url = format!("{}/sms/json", self.config.api_url.trim_end_matches('/'));

        debug!(to, "Sending SMS");

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("api_key", api_key),
                ("api_secret", api_secret),
                ("from", sender),
                ("to", to),
                ("text", message),
            ])
            .send()
            .await
            .map_err(|e| anyhow!("failed to send sms with following error {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to send sms with following error HTTP {}",
                response.status()
            ));
        }

        let body: SendSmsResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("unreadable SMS gateway response: {}", e))?;

        let status = body
            .messages
            .first()
            .ok_or_else(|| anyhow!("SMS gateway returned no message status"))?;

        if status.status == "0" {
            Ok(())
        } else {
            Err(anyhow!(
                "failed to send sms with following error {} and status {}",
                status.error_text.as_deref().unwrap_or("unknown error"),
                status.status
            ))
        }
    }
}
