use serde::Serialize;
use uuid::Uuid;

use crate::models::notification::Channel;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,
}

/// Payload returned with a successful delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub notification_id: Uuid,
    pub channel: Channel,
    pub attempts_made: u32,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
        }
    }
}
