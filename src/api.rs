use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Form, Router,
    extract::{State, rejection::FormRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    clients::health::HealthChecker,
    dispatch::{DispatchOutcome, Dispatcher},
    error::GatewayError,
    models::{
        health::HealthStatus,
        response::{ApiResponse, DeliveryReceipt},
        validation::{AdmissionDefaults, NotificationForm, validate_notification_form},
    },
};

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub admission: AdmissionDefaults,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/notification", post(send_notification))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Notification gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Result<Response, GatewayError> {
    // A body that is not a form reads as an empty one, so the field checks
    // below produce the error message.
    let form = match form {
        Ok(Form(pairs)) => NotificationForm::from_pairs(pairs),
        Err(FormRejection::InvalidFormContentType(_)) => NotificationForm::default(),
        Err(rejection) => return Err(GatewayError::Validation(rejection.body_text())),
    };
    let notification = validate_notification_form(form, &state.admission)?;
    let outcome = state.dispatcher.dispatch(notification).await?;

    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Delivered(notification) => {
            let receipt = DeliveryReceipt {
                notification_id: notification.id,
                channel: notification.channel,
                attempts_made: notification.attempts_made,
            };
            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    receipt,
                    "Notification sent successfully!".to_string(),
                )),
            )
                .into_response()
        }
        DispatchOutcome::Failed(notification) => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ApiResponse::<()>::error(
                "delivery_failed".to_string(),
                format!(
                    "Notification sending failed after max number of attempts. Notification service error: {}",
                    notification.failure_reason.unwrap_or_default()
                ),
            )),
        )
            .into_response(),
        DispatchOutcome::TimedOut { after, .. } => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ApiResponse::<()>::error(
                "timeout".to_string(),
                format!("Notification sending timed out ({} seconds)", after.as_secs()),
            )),
        )
            .into_response(),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
