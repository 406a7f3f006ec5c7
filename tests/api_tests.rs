use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use notification_gateway::{
    api::router,
    clients::{DeliveryChannel, broker::InMemoryBroker},
    gateway::{Gateway, GatewayOptions},
    models::notification::Channel,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::common::{FailingBroker, ScriptedChannel, form_request, read_json, test_options};

struct Harness {
    gateway: Gateway,
    email: Arc<ScriptedChannel>,
    chat: Arc<ScriptedChannel>,
}

fn start_with(options: GatewayOptions, email: Arc<ScriptedChannel>, chat: Arc<ScriptedChannel>) -> Harness {
    let gateway = Gateway::start(
        options,
        Arc::new(InMemoryBroker::new()),
        vec![
            email.clone() as Arc<dyn DeliveryChannel>,
            chat.clone() as Arc<dyn DeliveryChannel>,
        ],
        CancellationToken::new(),
    );

    Harness {
        gateway,
        email,
        chat,
    }
}

fn healthy_harness() -> Harness {
    start_with(
        test_options(Duration::from_secs(5)),
        ScriptedChannel::always_failing(Channel::Email, "550 mailbox unavailable"),
        ScriptedChannel::always_ok(Channel::Chat),
    )
}

/// Test: Delivered notifications answer 200 and leave the store empty
#[tokio::test]
async fn test_send_notification_success() -> Result<()> {
    let harness = healthy_harness();
    let app = router(harness.gateway.state());

    let response = app
        .oneshot(form_request("mode=slack&message=deploy+finished"))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Notification sent successfully!");
    assert_eq!(body["data"]["channel"], "slack");

    assert_eq!(harness.chat.calls(), 1);
    assert!(harness.gateway.store().is_empty());

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: Exhausted retries answer 408 with the last failure reason
#[tokio::test]
async fn test_send_notification_exhausted_retries() -> Result<()> {
    let harness = healthy_harness();
    let app = router(harness.gateway.state());

    let response = app
        .oneshot(form_request("mode=email&message=hi&max_retry_attempts=2"))
        .await?;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let body = read_json(response).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "delivery_failed");

    let message = body["message"].as_str().unwrap_or_default();
    assert!(message.starts_with("Notification sending failed after max number of attempts."));
    assert!(message.contains("Too many failed attempts"));
    assert!(message.contains("550 mailbox unavailable"));

    assert_eq!(harness.email.calls(), 2);
    assert!(harness.gateway.store().is_empty());

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: Invalid forms answer 400 without touching a channel
#[tokio::test]
async fn test_send_notification_validation_errors() -> Result<()> {
    let harness = healthy_harness();

    let cases = [
        (
            "message=hi",
            "Mode is either blank or not one of the supported modes: 'email', 'sms' or 'slack'",
        ),
        (
            "mode=fax&message=hi",
            "Mode is either blank or not one of the supported modes: 'email', 'sms' or 'slack'",
        ),
        ("mode=slack&message=", "Message is blank"),
        (
            "mode=slack&message=hi&max_retry_attempts=three",
            "'max_retry_attempts' is not an integer",
        ),
        (
            "mode=slack&message=hi&max_retry_attempts=0",
            "'max_retry_attempts' must be a positive integer",
        ),
    ];

    for (form, expected) in cases {
        let response = router(harness.gateway.state())
            .oneshot(form_request(form))
            .await?;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "form: {}", form);

        let body = read_json(response).await?;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], expected, "form: {}", form);
    }

    assert_eq!(harness.chat.calls(), 0);
    assert_eq!(harness.email.calls(), 0);
    assert!(harness.gateway.store().is_empty());

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: Bodies that are not a form are validated like an empty form
#[tokio::test]
async fn test_non_form_body_is_a_validation_error() -> Result<()> {
    let harness = healthy_harness();

    let requests = [
        Request::builder()
            .method("POST")
            .uri("/notification")
            .body(Body::empty())?,
        Request::builder()
            .method("POST")
            .uri("/notification")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"mode":"slack","message":"hi"}"#))?,
        form_request(""),
    ];

    for request in requests {
        let response = router(harness.gateway.state()).oneshot(request).await?;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = read_json(response).await?;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(
            body["message"],
            "Mode is either blank or not one of the supported modes: 'email', 'sms' or 'slack'"
        );
    }

    assert_eq!(harness.chat.calls(), 0);
    assert!(harness.gateway.store().is_empty());

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: A repeated field is read from its first occurrence
#[tokio::test]
async fn test_repeated_field_uses_first_value() -> Result<()> {
    let harness = healthy_harness();

    let response = router(harness.gateway.state())
        .oneshot(form_request("mode=slack&mode=email&message=hi&message=ignored"))
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await?;
    assert_eq!(body["data"]["channel"], "slack");
    assert_eq!(harness.chat.calls(), 1);
    assert_eq!(harness.email.calls(), 0);

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: A missing outcome answers 408 at the hard deadline
#[tokio::test]
async fn test_send_notification_times_out() -> Result<()> {
    let mut options = test_options(Duration::from_millis(200));
    options.run_workers = false;
    let harness = start_with(
        options,
        ScriptedChannel::always_ok(Channel::Email),
        ScriptedChannel::always_ok(Channel::Chat),
    );

    let response = router(harness.gateway.state())
        .oneshot(form_request("mode=slack&message=anyone+there"))
        .await?;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    let body = read_json(response).await?;
    assert_eq!(body["error"], "timeout");
    assert!(
        body["message"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Notification sending timed out")
    );
    assert!(harness.gateway.store().is_empty());

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: A refused publish answers 500
#[tokio::test]
async fn test_publish_failure_returns_internal_error() -> Result<()> {
    let broker = FailingBroker::refusing(&["slack"]);
    let gateway = Gateway::start(
        test_options(Duration::from_secs(5)),
        broker.clone(),
        vec![ScriptedChannel::always_ok(Channel::Chat) as Arc<dyn DeliveryChannel>],
        CancellationToken::new(),
    );

    let response = router(gateway.state())
        .oneshot(form_request("mode=slack&message=hi"))
        .await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = read_json(response).await?;
    assert_eq!(body["error"], "internal_error");
    assert_eq!(body["message"], "Internal server error");
    assert_eq!(broker.messages("slack"), 0);
    assert!(gateway.store().is_empty());

    gateway.shutdown().await;
    Ok(())
}

/// Test: Health reports every component and the in-flight count
#[tokio::test]
async fn test_health_reports_in_flight_count() -> Result<()> {
    let harness = healthy_harness();

    let response = router(harness.gateway.state())
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["in_flight"], 0);
    assert_eq!(body["broker"]["status"], "healthy");
    assert_eq!(body["channels"]["slack"]["status"], "healthy");
    assert_eq!(body["channels"]["email"]["status"], "healthy");

    harness.gateway.shutdown().await;
    Ok(())
}

/// Test: Health answers 503 when the broker is unreachable
#[tokio::test]
async fn test_health_unavailable_when_broker_down() -> Result<()> {
    let gateway = Gateway::start(
        test_options(Duration::from_secs(5)),
        FailingBroker::refusing(&[]),
        vec![ScriptedChannel::always_ok(Channel::Chat) as Arc<dyn DeliveryChannel>],
        CancellationToken::new(),
    );

    let response = router(gateway.state())
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = read_json(response).await?;
    assert_eq!(body["status"], "unhealthy");
    assert!(
        body["broker"]["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("Broker unreachable")
    );

    gateway.shutdown().await;
    Ok(())
}
