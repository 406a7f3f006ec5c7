use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::Mailbox,
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{clients::DeliveryChannel, config::Config, models::notification::Channel};

const EMAIL_SUBJECT: &str = "Email Notification System";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: Option<String>,
}

impl EmailConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            smtp_host: config.smtp_host.clone(),
            smtp_port: config.smtp_port,
            smtp_username: config.smtp_username.clone(),
            smtp_password: config.smtp_password.clone(),
            from_address: config.email_from.clone(),
        }
    }
}

/// Plain-text email over SMTP with STARTTLS.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        info!(
            smtp_host = config.smtp_host.as_deref().unwrap_or("<unset>"),
            "Email channel initialized"
        );
        Self { config }
    }

    fn build_message(&self, body: &str, recipient: &str) -> Result<Message, Error> {
        let from: Mailbox = self
            .config
            .from_address
            .as_deref()
            .ok_or_else(|| anyhow!("email sender address is not configured"))?
            .parse()
            .map_err(|e| anyhow!("invalid sender address: {}", e))?;

        let to: Mailbox = recipient
            .parse()
            .map_err(|e| anyhow!("invalid recipient address '{}': {}", recipient, e))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(EMAIL_SUBJECT)
            .body(body.to_string())
            .map_err(|e| anyhow!("failed to build email: {}", e))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, Error> {
        let host = self
            .config
            .smtp_host
            .as_deref()
            .ok_or_else(|| anyhow!("SMTP host is not configured"))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow!("failed to set up SMTP relay: {}", e))?
            .port(self.config.smtp_port);

        if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn kind(&self) -> Channel {
        Channel::Email
    }

    fn supports_retry(&self) -> bool {
        true
    }

    fn is_configured(&self) -> bool {
        self.config.smtp_host.is_some() && self.config.from_address.is_some()
    }

    async fn attempt_delivery(&self, message: &str, recipient: Option<&str>) -> Result<(), Error> {
        let recipient = recipient.ok_or_else(|| anyhow!("email recipient is missing"))?;

        let email = self.build_message(message, recipient)?;
        let mailer = self.transport()?;

        debug!(recipient, "Sending email");

        mailer
            .send(email)
            .await
            .map_err(|e| anyhow!("failed to send email with following error {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(from: Option<&str>) -> EmailChannel {
        EmailChannel::new(EmailConfig {
            smtp_host: Some("smtp.example.com".to_string()),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: from.map(str::to_string),
        })
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let result = channel(Some("noreply@example.com")).build_message("hi", "not an address");
        assert!(result.unwrap_err().to_string().contains("invalid recipient"));
    }

    #[test]
    fn test_build_message_requires_sender() {
        let result = channel(None).build_message("hi", "ops@example.com");
        assert!(result.unwrap_err().to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn test_missing_recipient_fails_the_attempt() {
        let result = channel(Some("noreply@example.com"))
            .attempt_delivery("hi", None)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_unconfigured_channel_reports_itself() {
        let unconfigured = EmailChannel::new(EmailConfig {
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            from_address: None,
        });
        assert!(!unconfigured.is_configured());
        assert!(unconfigured.supports_retry());
    }
}
