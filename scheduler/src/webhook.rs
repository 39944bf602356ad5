//! Webhook delivery on task state changes.
//!
//! When a task's metadata carries a `webhook_url` (or the daemon has a
//! default configured), its state transitions are POSTed there as a
//! form-encoded body `{task_id, status, custom_params}`. Client-side HTTP
//! failures retry on the Fibonacci schedule; non-2xx responses are logged
//! and dropped.

use shared::models::TaskModel;
use shared::utils::retry_fibo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct WebhookWorker {
    http: reqwest::Client,
    /// Bounds concurrent outbound requests (`webhook_reqs_limit`).
    limit: Arc<Semaphore>,
    /// Applied to tasks that carry no webhook_url of their own.
    default_url: Option<String>,
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

impl WebhookWorker {
    pub fn new(reqs_limit: usize, default_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            limit: Arc::new(Semaphore::new(reqs_limit.max(1))),
            default_url,
        }
    }

    /// Deliver the state-change notification for one task, if it wants one.
    pub async fn send(&self, task: &TaskModel) {
        let url = match task.webhook_url().map(str::to_string).or_else(|| self.default_url.clone())
        {
            Some(url) => url,
            None => return,
        };

        let permit = match self.limit.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let custom_params = serde_json::to_string(&task.webhook_custom_params())
            .unwrap_or_else(|_| "{}".to_string());
        let params = [
            ("task_id", task.task_id.to_string()),
            ("status", (task.status.as_i16()).to_string()),
            ("custom_params", custom_params),
        ];

        info!(task_id = task.task_id, url = %url, "executing webhook");
        let result = retry_fibo(
            || self.http.post(&url).form(&params).send(),
            is_transient,
        )
        .await;
        drop(permit);

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(task_id = task.task_id, "webhook delivered");
            }
            Ok(response) => {
                warn!(
                    task_id = task.task_id,
                    status = %response.status(),
                    "webhook to {} rejected", url
                );
            }
            Err(e) => {
                warn!(task_id = task.task_id, "webhook to {} failed: {}", url, e);
            }
        }
    }
}
