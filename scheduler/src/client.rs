//! Client surface used by the submission tools.
//!
//! These are the synchronous-looking entry points behind `yasubmit` and
//! `yastatus`: submit a task, query one, list by status. Validation happens
//! here, before any row is written: a submission with an unknown engine or
//! a missing input file fails without touching the database.

use crate::store::Store;
use crate::webhook::WebhookWorker;
use anyhow::{bail, Context, Result};
use shared::config::Config;
use shared::models::{meta_keys, TaskModel, TaskStatus};
use shared::utils::{rnd_lowercase, timestamp_folder_part};

pub struct TaskClient {
    config: Config,
    store: Store,
}

impl TaskClient {
    pub async fn connect(config: Config) -> Result<Self> {
        let store = Store::connect(&config.db)
            .await
            .context("cannot connect to the database")?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Submit a new task. The metadata must contain one entry per input file
    /// of the engine; `remote_folder` is assigned here.
    pub async fn submit_task(
        &self,
        label: &str,
        metadata: serde_json::Value,
        engine_name: &str,
        webhook_onsubmit: bool,
    ) -> Result<TaskModel> {
        let Some(engine) = self.config.engines.get(engine_name) else {
            bail!("Engine {} requested, but not supported", engine_name);
        };
        for input_file in &engine.input_files {
            if metadata.get(input_file).and_then(|v| v.as_str()).is_none() {
                bail!("Input file {} was not provided", input_file);
            }
        }

        let mut metadata = metadata;
        let Some(meta) = metadata.as_object_mut() else {
            bail!("Task metadata must be an object");
        };
        meta.insert(
            meta_keys::ENGINE.to_string(),
            serde_json::Value::String(engine_name.to_string()),
        );
        let remote_folder = format!(
            "{}/{}_{}",
            self.config.remote.tasks_dir.trim_end_matches('/'),
            timestamp_folder_part(),
            rnd_lowercase(4)
        );
        meta.insert(
            meta_keys::REMOTE_FOLDER.to_string(),
            serde_json::Value::String(remote_folder),
        );

        let task = self
            .store
            .add_task(label, &metadata, TaskStatus::ToDo)
            .await?;
        tracing::info!(task_id = task.task_id, label = %label, "submitted");

        if webhook_onsubmit {
            let webhooks = WebhookWorker::new(
                self.config.local.webhook_reqs_limit,
                self.config.local.webhook_url.clone(),
            );
            webhooks.send(&task).await;
        }
        Ok(task)
    }

    pub async fn get_task(&self, task_id: i32) -> Result<Option<TaskModel>> {
        Ok(self.store.get_task(task_id).await?)
    }

    pub async fn get_tasks_by_jobs(&self, ids: &[i32]) -> Result<Vec<TaskModel>> {
        Ok(self.store.get_tasks_by_jobs(ids).await?)
    }

    pub async fn get_tasks_by_status(
        &self,
        statuses: &[TaskStatus],
        limit: Option<i64>,
    ) -> Result<Vec<TaskModel>> {
        Ok(self.store.get_tasks_by_status(statuses, limit).await?)
    }
}
