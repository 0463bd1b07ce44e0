//! WebhookProjection Tests
//!
//! Tests for:
//! - Request shape (`{"path": ...}`)
//! - 2xx acceptance
//! - Non-2xx and timeout failures

use std::time::Duration;

use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ted_common::process;
use ted_projection::{ProjectionError, WebhookConfig, WebhookProjection};
use ted_queue::ProjectionCallback;

fn create_webhook(server: &MockServer, timeout: Duration) -> WebhookProjection {
    WebhookProjection::new(WebhookConfig {
        url: format!("{}/projections", server.uri()),
        timeout,
        connect_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

#[tokio::test]
async fn test_posts_task_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projections"))
        .and(body_json(serde_json::json!({ "path": "users/42/posts" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let webhook = create_webhook(&server, Duration::from_secs(5));
    let result = webhook.project(&process("users/42/posts").unwrap()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_any_success_status_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let webhook = create_webhook(&server, Duration::from_secs(5));
    assert!(webhook.send(&process("users").unwrap()).await.is_ok());
}

#[tokio::test]
async fn test_error_status_fails_the_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("store offline"))
        .mount(&server)
        .await;

    let webhook = create_webhook(&server, Duration::from_secs(5));
    let err = webhook.send(&process("users").unwrap()).await.unwrap_err();
    match err {
        ProjectionError::UnexpectedStatus { status, path, .. } => {
            assert_eq!(status, 503);
            assert_eq!(path, "users");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let callback_err = webhook.project(&process("users").unwrap()).await.unwrap_err();
    assert!(callback_err.0.contains("503"));
}

#[tokio::test]
async fn test_timeout_fails_the_task() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let webhook = create_webhook(&server, Duration::from_millis(100));
    let err = webhook.send(&process("users").unwrap()).await.unwrap_err();
    assert!(matches!(err, ProjectionError::Http(_)));
}
