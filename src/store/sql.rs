//! Relational task store over the generic `sqlx::Any` driver.
//!
//! One statement per call, no transactions. Timestamps are written as
//! fixed-width RFC 3339 text (nanosecond precision, `Z` suffix) so they
//! round-trip losslessly and sort lexically on every engine.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::KeyValue;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::debug;

use super::{Dialect, TaskStore};
use crate::error::{Error, Result};
use crate::model::{RecordFilter, Status, TaskRecord};
use crate::telemetry::metrics;

const SELECT_COLUMNS: &str = "SELECT id, task_type, queue, payload_json, status, error_msg, result_json, created_at, enqueued_at, started_at, finished_at FROM tasktrail_tasks";

/// Connection settings for [`SqlStore::connect`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound on any single statement. `None` waits indefinitely.
    pub statement_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            statement_timeout: None,
        }
    }
}

/// Task store backed by a relational database.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    statement_timeout: Option<Duration>,
}

impl SqlStore {
    /// Connect and resolve the placeholder dialect from the URL.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let dialect = Dialect::from_url(&config.url)?;
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self {
            pool,
            dialect,
            statement_timeout: config.statement_timeout,
        })
    }

    /// Wrap an existing pool whose engine is already known.
    pub fn with_dialect(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            statement_timeout: None,
        }
    }

    pub fn statement_timeout(mut self, limit: Duration) -> Self {
        self.statement_timeout = Some(limit);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Apply the embedded migrations (creates `tasktrail_tasks`).
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Run `SELECT 1` against the pool.
    pub async fn health_check(&self) -> Result<()> {
        self.bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, sqlx::Error>>,
    ) -> Result<T> {
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(limit))?
                .map_err(Error::from),
            None => fut.await.map_err(Error::from),
        }
    }

    /// Run an unconditional update keyed by id. `binds` precede the id in
    /// placeholder order. Matching no row is logged, not an error.
    async fn update(&self, id: &str, to: Status, sql: String, binds: Vec<Option<String>>) -> Result<()> {
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = self
            .bounded(query.bind(id.to_string()).execute(&self.pool))
            .await?
            .rows_affected();

        if rows == 0 {
            debug!(task_id = id, status = %to, rows_affected = rows, "update matched no task record");
        } else {
            metrics::lifecycle_transitions().add(1, &[KeyValue::new("to", to.as_str())]);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SqlStore {
    async fn insert_created(&self, record: &TaskRecord) -> Result<()> {
        let sql = self.dialect.render(&format!(
            "INSERT INTO tasktrail_tasks (id, task_type, queue, payload_json, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, {})",
            self.dialect.now_expr()
        ));
        self.bounded(
            sqlx::query(&sql)
                .bind(record.id.clone())
                .bind(record.task_type.clone())
                .bind(record.queue.clone())
                .bind(record.payload.clone())
                .bind(Status::Created.as_str())
                .bind(encode_time(record.created_at))
                .execute(&self.pool),
        )
        .await?;
        metrics::lifecycle_transitions().add(1, &[KeyValue::new("to", Status::Created.as_str())]);
        Ok(())
    }

    async fn mark_enqueued(&self, id: &str, queue: &str, at: DateTime<Utc>) -> Result<()> {
        let sql = self.dialect.render(&format!(
            "UPDATE tasktrail_tasks SET status = ?, queue = ?, enqueued_at = ?, updated_at = {} WHERE id = ?",
            self.dialect.now_expr()
        ));
        self.update(
            id,
            Status::Created,
            sql,
            vec![
                Some(Status::Created.to_string()),
                Some(queue.to_string()),
                Some(encode_time(at)),
            ],
        )
        .await
    }

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let sql = self.dialect.render(&format!(
            "UPDATE tasktrail_tasks SET status = ?, started_at = ?, updated_at = {} WHERE id = ?",
            self.dialect.now_expr()
        ));
        self.update(
            id,
            Status::InProgress,
            sql,
            vec![
                Some(Status::InProgress.to_string()),
                Some(encode_time(at)),
            ],
        )
        .await
    }

    async fn mark_completed(
        &self,
        id: &str,
        result: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let sql = self.dialect.render(&format!(
            "UPDATE tasktrail_tasks SET status = ?, result_json = ?, finished_at = ?, updated_at = {} WHERE id = ?",
            self.dialect.now_expr()
        ));
        self.update(
            id,
            Status::Completed,
            sql,
            vec![
                Some(Status::Completed.to_string()),
                result.map(str::to_string),
                Some(encode_time(at)),
            ],
        )
        .await
    }

    async fn mark_failed(&self, id: &str, message: &str, at: DateTime<Utc>) -> Result<()> {
        let sql = self.dialect.render(&format!(
            "UPDATE tasktrail_tasks SET status = ?, error_msg = ?, finished_at = ?, updated_at = {} WHERE id = ?",
            self.dialect.now_expr()
        ));
        self.update(
            id,
            Status::Failed,
            sql,
            vec![
                Some(Status::Failed.to_string()),
                Some(message.to_string()),
                Some(encode_time(at)),
            ],
        )
        .await
    }

    async fn get_by_id(&self, id: &str) -> Result<TaskRecord> {
        let sql = self
            .dialect
            .render(&format!("{SELECT_COLUMNS} WHERE id = ?"));
        let row: Option<TaskRow> = self
            .bounded(
                sqlx::query_as(&sql)
                    .bind(id.to_string())
                    .fetch_optional(&self.pool),
            )
            .await?;

        row.ok_or_else(|| Error::NotFound(id.to_string()))?
            .try_into_record()
    }

    async fn list_recent(&self, filter: &RecordFilter, limit: i64) -> Result<Vec<TaskRecord>> {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            binds.push(status.to_string());
        }
        if let Some(ref task_type) = filter.task_type {
            conditions.push("task_type = ?");
            binds.push(task_type.clone());
        }

        let mut template = SELECT_COLUMNS.to_string();
        if !conditions.is_empty() {
            template.push_str(" WHERE ");
            template.push_str(&conditions.join(" AND "));
        }
        template.push_str(" ORDER BY created_at DESC LIMIT ?");
        let sql = self.dialect.render(&template);

        let mut query = sqlx::query_as::<_, TaskRow>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = self
            .bounded(query.bind(limit).fetch_all(&self.pool))
            .await?;

        rows.into_iter().map(TaskRow::try_into_record).collect()
    }
}

/// Encode a timestamp as fixed-width RFC 3339 text.
fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad {column} timestamp {raw:?}: {e}")))
}

fn decode_optional_time(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_time(column, &s)).transpose()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    task_type: String,
    queue: String,
    payload_json: String,
    status: String,
    error_msg: Option<String>,
    result_json: Option<String>,
    created_at: String,
    enqueued_at: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl TaskRow {
    fn try_into_record(self) -> Result<TaskRecord> {
        Ok(TaskRecord {
            status: self.status.parse()?,
            created_at: decode_time("created_at", &self.created_at)?,
            enqueued_at: decode_optional_time("enqueued_at", self.enqueued_at)?
                .unwrap_or(DateTime::UNIX_EPOCH),
            started_at: decode_optional_time("started_at", self.started_at)?,
            finished_at: decode_optional_time("finished_at", self.finished_at)?,
            id: self.id,
            task_type: self.task_type,
            queue: self.queue,
            payload: self.payload_json,
            error_message: self.error_msg,
            result_payload: self.result_json,
        })
    }
}
