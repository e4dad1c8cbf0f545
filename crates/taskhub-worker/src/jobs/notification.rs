//! Notification delivery over an outbound webhook.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing;

use crate::registry::{JobContext, JobExecutionError, JobHandler};

/// Job kind handled by [`NotificationDeliveryHandler`].
pub const NOTIFICATION_DELIVERY_KIND: &str = "notification.deliver";

/// POSTs the job payload to the configured webhook
#[derive(Debug, Clone)]
pub struct NotificationDeliveryHandler {
    /// Shared outbound HTTP client
    client: reqwest::Client,
    /// Delivery endpoint; `None` disables delivery
    webhook_url: Option<String>,
}

impl NotificationDeliveryHandler {
    /// Create a new notification delivery handler
    pub fn new(client: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self {
            client,
            webhook_url,
        }
    }

    async fn deliver(&self, url: &str, ctx: &JobContext) -> Result<(), JobExecutionError> {
        let response = self
            .client
            .post(url)
            .header("X-Job-Id", ctx.job.id.to_string())
            .json(&ctx.job.payload)
            .send()
            .await
            .map_err(|e| JobExecutionError::Transient(format!("Webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(job_id = %ctx.job.id, status = %status, "Notification delivered");
            return Ok(());
        }

        let message = format!("Webhook responded with {status}");
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Err(JobExecutionError::Transient(message))
        } else {
            Err(JobExecutionError::Permanent(message))
        }
    }
}

#[async_trait]
impl JobHandler for NotificationDeliveryHandler {
    fn kind(&self) -> &str {
        NOTIFICATION_DELIVERY_KIND
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobExecutionError> {
        let Some(url) = self.webhook_url.as_deref() else {
            return Err(JobExecutionError::Permanent(
                "No notification webhook is configured".to_string(),
            ));
        };

        tokio::select! {
            _ = ctx.cancelled() => Err(JobExecutionError::Cancelled),
            result = self.deliver(url, ctx) => result,
        }
    }
}
