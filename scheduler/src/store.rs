//! Durable task queue and node registry backed by PostgreSQL.
//!
//! Every state transition of the system commits through this module. Access
//! is serialized behind a single connection guarded by an async mutex; the
//! pipelines never talk to PostgreSQL directly. Transient driver failures are
//! retried on the Fibonacci schedule with reconnection, so a database restart
//! degrades into latency instead of lost transitions.

use shared::config::DbConfig;
use shared::models::{is_real_ip, NodeModel, TaskModel, TaskStatus};
use shared::utils::{generate_placeholder_ip, FibonacciBackoff};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};

/// Errors surfaced by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("task {task_id} has unknown status value {status}")]
    UnknownStatus { task_id: i32, status: i16 },

    #[error("task {0} not found")]
    TaskNotFound(i32),

    #[error("INSERT .. RETURNING produced no row")]
    MissingRow,
}

const SCHEMA: &str = r#"
CREATE TABLE yascheduler_nodes (
    ip VARCHAR(15) UNIQUE,
    ncpus SMALLINT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    cloud VARCHAR(32) NULL,
    username VARCHAR(255) DEFAULT 'root'
);
CREATE TABLE yascheduler_tasks (
    task_id SERIAL PRIMARY KEY,
    label VARCHAR(256),
    metadata JSONB,
    ip VARCHAR(15) NULL,
    status SMALLINT NOT NULL
);
"#;

const TASK_COLUMNS: &str = "task_id, label, ip, status, metadata";
const NODE_COLUMNS: &str = "ip, ncpus, enabled, cloud, username";

pub struct Store {
    config: DbConfig,
    client: Mutex<Client>,
}

async fn open_client(config: &DbConfig) -> Result<Client, tokio_postgres::Error> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .user(&config.user)
        .password(&config.password)
        .dbname(&config.database);
    let (client, connection) = pg.connect(NoTls).await?;
    // The connection object performs the actual I/O; it lives until the
    // client is dropped or the socket breaks.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Database connection closed: {}", e);
        }
    });
    Ok(client)
}

/// Driver-level failures (socket gone, connection refused) are retried;
/// database-level errors (constraint, syntax) are not.
pub(crate) fn is_transient(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    if err.as_db_error().is_some() {
        return false;
    }
    use std::error::Error as _;
    err.source()
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some()
}

impl Store {
    /// Connect and run pending migrations.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let client = open_client(config).await?;
        let store = Self {
            config: config.clone(),
            client: Mutex::new(client),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Run one statement with transient-failure retry and reconnection.
    async fn run(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        let mut backoff = FibonacciBackoff::default_budget();
        loop {
            let mut client = self.client.lock().await;
            match client.query(sql, params).await {
                Ok(rows) => return Ok(rows),
                Err(err) if is_transient(&err) => {
                    let Some(delay) = backoff.next() else {
                        return Err(err.into());
                    };
                    warn!("Transient database error, retrying in {:?}: {}", delay, err);
                    if let Ok(fresh) = open_client(&self.config).await {
                        *client = fresh;
                    }
                    drop(client);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Add the `username` column to the node table if absent. Idempotent,
    /// and a no-op on a database whose schema was never initialized.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let result = self
            .run(
                "ALTER TABLE yascheduler_nodes \
                 ADD COLUMN IF NOT EXISTS username VARCHAR(255) DEFAULT 'root';",
                &[],
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(StoreError::Postgres(e))
                if e.code() == Some(&SqlState::UNDEFINED_TABLE) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create the schema. Returns false (with a diagnostic) when the tables
    /// already exist.
    pub async fn init_schema(&self) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        match client.batch_execute(SCHEMA).await {
            Ok(()) => Ok(true),
            Err(e) if e.code() == Some(&SqlState::DUPLICATE_TABLE) => {
                warn!("Database already initialized");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---- tasks ----

    pub async fn add_task(
        &self,
        label: &str,
        metadata: &serde_json::Value,
        status: TaskStatus,
    ) -> Result<TaskModel, StoreError> {
        let rows = self
            .run(
                &format!(
                    "INSERT INTO yascheduler_tasks (label, metadata, ip, status) \
                     VALUES ($1, $2, NULL, $3) RETURNING {};",
                    TASK_COLUMNS
                ),
                &[&label, metadata, &status.as_i16()],
            )
            .await?;
        let row = rows.first().ok_or(StoreError::MissingRow)?;
        task_from_row(row)
    }

    pub async fn set_task_running(&self, task_id: i32, ip: &str) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_tasks SET status=$1, ip=$2 WHERE task_id=$3;",
            &[&TaskStatus::Running.as_i16(), &ip, &task_id],
        )
        .await?;
        debug!(task_id, ip, "task set running");
        Ok(())
    }

    pub async fn set_task_done(
        &self,
        task_id: i32,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_tasks SET status=$1, metadata=$2 WHERE task_id=$3;",
            &[&TaskStatus::Done.as_i16(), metadata, &task_id],
        )
        .await?;
        debug!(task_id, "task set done");
        Ok(())
    }

    /// Mark done with an `error` entry merged into the metadata.
    pub async fn set_task_error(
        &self,
        task_id: i32,
        metadata: &serde_json::Value,
        error: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut merged = metadata.clone();
        if let Some(obj) = merged.as_object_mut() {
            obj.insert(shared::models::meta_keys::ERROR.to_string(), error.clone());
        }
        self.set_task_done(task_id, &merged).await
    }

    /// Bare status flip, metadata untouched. Used by the operator CLI when a
    /// node is force-removed.
    pub async fn update_task_status(
        &self,
        task_id: i32,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_tasks SET status=$1 WHERE task_id=$2;",
            &[&status.as_i16(), &task_id],
        )
        .await?;
        Ok(())
    }

    pub async fn update_task_meta(
        &self,
        task_id: i32,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_tasks SET metadata=$1 WHERE task_id=$2;",
            &[metadata, &task_id],
        )
        .await?;
        Ok(())
    }

    pub async fn get_task(&self, task_id: i32) -> Result<Option<TaskModel>, StoreError> {
        let rows = self
            .run(
                &format!(
                    "SELECT {} FROM yascheduler_tasks WHERE task_id=$1;",
                    TASK_COLUMNS
                ),
                &[&task_id],
            )
            .await?;
        rows.first().map(task_from_row).transpose()
    }

    pub async fn get_tasks_by_jobs(&self, ids: &[i32]) -> Result<Vec<TaskModel>, StoreError> {
        let rows = self
            .run(
                &format!(
                    "SELECT {} FROM yascheduler_tasks WHERE task_id = ANY($1) \
                     ORDER BY task_id;",
                    TASK_COLUMNS
                ),
                &[&ids],
            )
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn get_tasks_by_status(
        &self,
        statuses: &[TaskStatus],
        limit: Option<i64>,
    ) -> Result<Vec<TaskModel>, StoreError> {
        let statuses: Vec<i16> = statuses.iter().map(|s| s.as_i16()).collect();
        let rows = match limit {
            Some(limit) => {
                self.run(
                    &format!(
                        "SELECT {} FROM yascheduler_tasks WHERE status = ANY($1) \
                         ORDER BY task_id LIMIT $2;",
                        TASK_COLUMNS
                    ),
                    &[&statuses, &limit],
                )
                .await?
            }
            None => {
                self.run(
                    &format!(
                        "SELECT {} FROM yascheduler_tasks WHERE status = ANY($1) \
                         ORDER BY task_id;",
                        TASK_COLUMNS
                    ),
                    &[&statuses],
                )
                .await?
            }
        };
        rows.iter().map(task_from_row).collect()
    }

    /// Tasks by id and status, annotated with the cloud of their node.
    pub async fn get_tasks_with_cloud_by_id_status(
        &self,
        ids: &[i32],
        status: TaskStatus,
    ) -> Result<Vec<TaskModel>, StoreError> {
        let rows = self
            .run(
                "SELECT t.task_id, t.label, t.ip, t.status, t.metadata, n.cloud \
                 FROM yascheduler_tasks AS t \
                 JOIN yascheduler_nodes AS n ON n.ip=t.ip \
                 WHERE t.status=$1 AND t.task_id = ANY($2) ORDER BY t.task_id;",
                &[&status.as_i16(), &ids],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let mut task = task_from_row(row)?;
                task.cloud = row.get(5);
                Ok(task)
            })
            .collect()
    }

    pub async fn get_task_ids_by_ip_and_status(
        &self,
        ip: &str,
        status: TaskStatus,
    ) -> Result<Vec<i32>, StoreError> {
        let rows = self
            .run(
                "SELECT task_id FROM yascheduler_tasks WHERE ip=$1 AND status=$2;",
                &[&ip, &status.as_i16()],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    pub async fn count_tasks_by_status(&self) -> Result<HashMap<TaskStatus, i64>, StoreError> {
        let rows = self
            .run(
                "SELECT status, COUNT(task_id) FROM yascheduler_tasks \
                 GROUP BY status ORDER BY status;",
                &[],
            )
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            if let Some(status) = TaskStatus::from_i16(row.get(0)) {
                counts.insert(status, row.get::<_, i64>(1));
            }
        }
        Ok(counts)
    }

    // ---- nodes ----

    pub async fn has_node(&self, ip: &str) -> Result<bool, StoreError> {
        let rows = self
            .run("SELECT ip FROM yascheduler_nodes WHERE ip=$1;", &[&ip])
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn get_node(&self, ip: &str) -> Result<Option<NodeModel>, StoreError> {
        let rows = self
            .run(
                &format!("SELECT {} FROM yascheduler_nodes WHERE ip=$1;", NODE_COLUMNS),
                &[&ip],
            )
            .await?;
        Ok(rows.first().map(node_from_row))
    }

    pub async fn get_all_nodes(&self) -> Result<Vec<NodeModel>, StoreError> {
        let rows = self
            .run(
                &format!("SELECT {} FROM yascheduler_nodes ORDER BY ip;", NODE_COLUMNS),
                &[],
            )
            .await?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    /// Enabled nodes with real addresses; placeholder rows are excluded.
    pub async fn get_enabled_nodes(&self) -> Result<Vec<NodeModel>, StoreError> {
        let rows = self
            .run(
                &format!(
                    "SELECT {} FROM yascheduler_nodes WHERE enabled=TRUE ORDER BY ip;",
                    NODE_COLUMNS
                ),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(node_from_row)
            .filter(|n| is_real_ip(&n.ip))
            .collect())
    }

    /// Disabled nodes with real addresses; placeholder rows are excluded.
    pub async fn get_disabled_nodes(&self) -> Result<Vec<NodeModel>, StoreError> {
        let rows = self
            .run(
                &format!(
                    "SELECT {} FROM yascheduler_nodes WHERE enabled=FALSE ORDER BY ip;",
                    NODE_COLUMNS
                ),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(node_from_row)
            .filter(|n| is_real_ip(&n.ip))
            .collect())
    }

    pub async fn count_nodes_by_status(&self) -> Result<HashMap<bool, i64>, StoreError> {
        let rows = self
            .run(
                "SELECT enabled, COUNT(ip) FROM yascheduler_nodes \
                 GROUP BY enabled ORDER BY enabled;",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, bool>(0), row.get::<_, i64>(1)))
            .collect())
    }

    pub async fn count_nodes_clouds(&self) -> Result<HashMap<String, i64>, StoreError> {
        let rows = self
            .run(
                "SELECT cloud, COUNT(cloud) FROM yascheduler_nodes \
                 WHERE cloud IS NOT NULL GROUP BY cloud;",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect())
    }

    /// Insert a disabled placeholder row reserving provisioning capacity and
    /// return its generated name.
    pub async fn add_tmp_node(&self, cloud: &str, username: &str) -> Result<String, StoreError> {
        let ip = generate_placeholder_ip();
        self.run(
            "INSERT INTO yascheduler_nodes (ip, enabled, cloud, username) \
             VALUES ($1, FALSE, $2, $3);",
            &[&ip, &cloud, &username],
        )
        .await?;
        Ok(ip)
    }

    pub async fn add_node(
        &self,
        ip: &str,
        username: &str,
        ncpus: Option<i32>,
        cloud: Option<&str>,
        enabled: bool,
    ) -> Result<NodeModel, StoreError> {
        let ncpus_db = ncpus.map(|n| n as i16);
        self.run(
            "INSERT INTO yascheduler_nodes (ip, ncpus, enabled, cloud, username) \
             VALUES ($1, $2, $3, $4, $5);",
            &[&ip, &ncpus_db, &enabled, &cloud, &username],
        )
        .await?;
        Ok(NodeModel {
            ip: ip.to_string(),
            ncpus,
            enabled,
            cloud: cloud.map(str::to_string),
            username: username.to_string(),
        })
    }

    pub async fn enable_node(&self, ip: &str) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_nodes SET enabled=TRUE WHERE ip=$1;",
            &[&ip],
        )
        .await?;
        Ok(())
    }

    pub async fn disable_node(&self, ip: &str) -> Result<(), StoreError> {
        self.run(
            "UPDATE yascheduler_nodes SET enabled=FALSE WHERE ip=$1;",
            &[&ip],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_node(&self, ip: &str) -> Result<(), StoreError> {
        self.run("DELETE FROM yascheduler_nodes WHERE ip=$1;", &[&ip])
            .await?;
        Ok(())
    }
}

fn task_from_row(row: &Row) -> Result<TaskModel, StoreError> {
    let task_id: i32 = row.get(0);
    let status_raw: i16 = row.get(3);
    let status = TaskStatus::from_i16(status_raw).ok_or(StoreError::UnknownStatus {
        task_id,
        status: status_raw,
    })?;
    Ok(TaskModel {
        task_id,
        label: row.get::<_, Option<String>>(1).unwrap_or_default(),
        ip: row.get(2),
        status,
        metadata: row
            .get::<_, Option<serde_json::Value>>(4)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new())),
        cloud: None,
    })
}

fn node_from_row(row: &Row) -> NodeModel {
    NodeModel {
        ip: row.get(0),
        ncpus: row.get::<_, Option<i16>>(1).map(i32::from),
        enabled: row.get(2),
        cloud: row.get(3),
        username: row
            .get::<_, Option<String>>(4)
            .unwrap_or_else(|| "root".to_string()),
    }
}
