//! HTTP projection callback.
//!
//! Delegates the projection of a task path to an external service:
//! `POST {url}` with `{"path": "<task path>"}`. Any 2xx answer means the projection is
//! persisted; everything else fails the task so the broker redelivers it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use ted_common::DocumentPath;
use ted_queue::{CallbackError, ProjectionCallback};

use crate::{ProjectionError, Result};

/// Webhook callback configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/projections".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProjectionRequest<'a> {
    path: &'a DocumentPath,
}

pub struct WebhookProjection {
    client: Client,
    config: WebhookConfig,
}

impl WebhookProjection {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        info!(
            url = %config.url,
            timeout_ms = config.timeout.as_millis() as u64,
            "Webhook projection initialized"
        );

        Ok(Self { client, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Send one projection request.
    pub async fn send(&self, path: &DocumentPath) -> Result<()> {
        let response = self
            .client
            .post(&self.config.url)
            .header("Accept", "application/json")
            .json(&ProjectionRequest { path })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(path = %path, status = status.as_u16(), "Projection accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            path = %path,
            status = status.as_u16(),
            body = %body,
            "Projection webhook refused task"
        );
        Err(ProjectionError::UnexpectedStatus {
            url: self.config.url.clone(),
            status: status.as_u16(),
            path: path.to_string(),
        })
    }
}

#[async_trait]
impl ProjectionCallback for WebhookProjection {
    async fn project(&self, path: &DocumentPath) -> std::result::Result<(), CallbackError> {
        self.send(path).await.map_err(CallbackError::from)
    }
}
