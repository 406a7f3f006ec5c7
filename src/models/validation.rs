use std::collections::HashMap;

use crate::{
    error::GatewayError,
    models::notification::{Channel, Notification},
};

/// Raw `POST /notification` form. Every field is optional here so that a
/// missing field and an empty one are rejected with the same message.
#[derive(Debug, Clone, Default)]
pub struct NotificationForm {
    pub mode: Option<String>,
    pub message: Option<String>,
    pub max_retry_attempts: Option<String>,
    pub recipient: Option<String>,
}

impl NotificationForm {
    /// Builds the form from decoded key/value pairs. A repeated field keeps
    /// its first value and unknown fields are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut form = Self::default();

        for (key, value) in pairs {
            let slot = match key.as_str() {
                "mode" => &mut form.mode,
                "message" => &mut form.message,
                "max_retry_attempts" => &mut form.max_retry_attempts,
                "recipient" => &mut form.recipient,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        form
    }
}

/// Values applied to fields the caller left out.
#[derive(Debug, Clone)]
pub struct AdmissionDefaults {
    pub max_attempts: u32,
    pub recipients: HashMap<Channel, String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Turns a form into a pending notification, or explains why it cannot.
pub fn validate_notification_form(
    form: NotificationForm,
    defaults: &AdmissionDefaults,
) -> Result<Notification, GatewayError> {
    let channel = non_blank(form.mode)
        .and_then(|mode| Channel::from_mode(mode.trim()))
        .ok_or_else(|| {
            GatewayError::Validation(
                "Mode is either blank or not one of the supported modes: 'email', 'sms' or 'slack'"
                    .to_string(),
            )
        })?;

    let message = non_blank(form.message)
        .ok_or_else(|| GatewayError::Validation("Message is blank".to_string()))?;

    let max_attempts = match non_blank(form.max_retry_attempts) {
        None => defaults.max_attempts,
        Some(raw) => {
            let parsed = raw.trim().parse::<i64>().map_err(|_| {
                GatewayError::Validation("'max_retry_attempts' is not an integer".to_string())
            })?;
            u32::try_from(parsed)
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or_else(|| {
                    GatewayError::Validation(
                        "'max_retry_attempts' must be a positive integer".to_string(),
                    )
                })?
        }
    };

    let recipient = non_blank(form.recipient)
        .map(|r| r.trim().to_string())
        .or_else(|| defaults.recipients.get(&channel).cloned());

    if channel == Channel::Email && recipient.is_none() {
        return Err(GatewayError::Validation(
            "Recipient is blank and no default email recipient is configured".to_string(),
        ));
    }

    Ok(Notification::new(channel, message, recipient, max_attempts))
}
