use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::notification::Channel;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot served by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Requests currently waiting on a delivery outcome.
    pub in_flight: usize,
    pub broker: ComponentHealth,
    pub channels: HashMap<Channel, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn up(latency_ms: Option<u64>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms,
            detail: None,
        }
    }

    pub fn down(detail: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            detail: Some(detail),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            status: HealthStatus::Degraded,
            latency_ms: None,
            detail: Some("credentials are not configured".to_string()),
        }
    }
}

impl HealthCheckResponse {
    /// The broker decides between healthy and unhealthy; a channel that
    /// cannot deliver only degrades the service.
    pub fn overall(broker: &ComponentHealth, channels: &HashMap<Channel, ComponentHealth>) -> HealthStatus {
        if broker.status == HealthStatus::Unhealthy {
            HealthStatus::Unhealthy
        } else if channels
            .values()
            .any(|health| health.status != HealthStatus::Healthy)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
