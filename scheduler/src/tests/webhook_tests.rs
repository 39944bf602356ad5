//! Tests for webhook delivery

use crate::webhook::WebhookWorker;
use serde_json::json;
use shared::models::{TaskModel, TaskStatus};
use std::time::Duration;

fn task(metadata: serde_json::Value) -> TaskModel {
    TaskModel {
        task_id: 1,
        label: "t".to_string(),
        status: TaskStatus::Done,
        ip: None,
        metadata,
        cloud: None,
    }
}

#[tokio::test]
async fn test_task_without_url_is_a_noop() {
    let worker = WebhookWorker::new(5, None);
    // No webhook_url anywhere: must return without any network activity.
    tokio::time::timeout(Duration::from_millis(100), worker.send(&task(json!({}))))
        .await
        .expect("send without url returns immediately");
}

#[test]
fn test_payload_fields() {
    let t = task(json!({
        "webhook_url": "http://example.org/cb",
        "webhook_custom_params": {"experiment": "e42"},
    }));
    assert_eq!(t.webhook_url(), Some("http://example.org/cb"));
    assert_eq!(t.status.as_i16(), 2);
    assert_eq!(
        serde_json::to_string(&t.webhook_custom_params()).unwrap(),
        r#"{"experiment":"e42"}"#
    );
}
