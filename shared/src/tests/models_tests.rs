//! Tests for the task/node data model

use crate::models::{is_real_ip, NodeModel, TaskModel, TaskStatus};
use serde_json::json;

#[test]
fn test_task_status_roundtrip() {
    for status in [TaskStatus::ToDo, TaskStatus::Running, TaskStatus::Done] {
        assert_eq!(TaskStatus::from_i16(status.as_i16()), Some(status));
    }
    assert_eq!(TaskStatus::from_i16(3), None);
    assert_eq!(TaskStatus::ToDo.to_string(), "QUEUED");
    assert_eq!(TaskStatus::Done.to_string(), "FINISHED");
}

#[test]
fn test_metadata_accessors() {
    let task = TaskModel {
        task_id: 1,
        label: "t".to_string(),
        status: TaskStatus::ToDo,
        ip: None,
        metadata: json!({
            "engine": "dummy",
            "remote_folder": "/data/tasks/20240101_000000_abcd",
            "webhook_url": "http://localhost:9/cb",
            "webhook_custom_params": {"k": "v"},
        }),
        cloud: None,
    };
    assert_eq!(task.engine_name(), Some("dummy"));
    assert_eq!(task.remote_folder(), Some("/data/tasks/20240101_000000_abcd"));
    assert_eq!(task.local_folder(), None);
    assert_eq!(task.webhook_url(), Some("http://localhost:9/cb"));
    assert_eq!(task.webhook_custom_params(), json!({"k": "v"}));
}

#[test]
fn test_webhook_custom_params_default_to_empty_object() {
    let task = TaskModel {
        task_id: 2,
        label: String::new(),
        status: TaskStatus::Done,
        ip: None,
        metadata: json!({}),
        cloud: None,
    };
    assert_eq!(task.webhook_custom_params(), json!({}));
}

#[test]
fn test_placeholder_ips_are_not_real() {
    assert!(is_real_ip("10.0.0.1"));
    assert!(is_real_ip("192.168.1.100"));
    assert!(!is_real_ip("prov0123456789"));
    assert!(!is_real_ip("provdeadbeef00"));

    let node = NodeModel {
        ip: "prov0123456789".to_string(),
        ncpus: None,
        enabled: false,
        cloud: Some("hetzner".to_string()),
        username: "root".to_string(),
    };
    assert!(!node.has_real_ip());
}
