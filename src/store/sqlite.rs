//! SQLite store.
//!
//! Connections come from an r2d2 pool; each connection gets the same
//! pragmas on checkout. Timestamps are stored as RFC 3339 text.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::schema::{SCHEMA, TERMINAL_STATUSES_SQL};
use super::{Store, StoreResult};
use crate::component::ComponentDefinition;
use crate::error::StoreError;
use crate::model::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatus, Flow, FlowDefinition, Job,
    JobDefinition, LastRunStatus, LogLevel, SchedulingStatus, TriggerType,
};

pub type DbPool = Pool<SqliteConnectionManager>;

/// Per-connection SQLite pragmas.
#[derive(Debug)]
struct SqlitePragmaCustomizer;

impl CustomizeConnection<rusqlite::Connection, rusqlite::Error> for SqlitePragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(())
    }
}

/// A [`Store`] backed by a SQLite database file.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and its connection pool.
    ///
    /// Does not create tables; see [`Store::create_schema`].
    pub fn open(path: impl AsRef<Path>, pool_max_size: u32) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database {}", path.display());

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_max_size)
            .connection_customizer(Box::new(SqlitePragmaCustomizer))
            .build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        Ok(Self { pool })
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339()
}

fn parse_time(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("bad timestamp '{}': {}", text, e)))
}

/// Raw flow row; text columns are decoded after the query.
struct FlowRow {
    id: i64,
    name: String,
    cron: Option<String>,
    last_run_status: Option<String>,
    scheduling_status: String,
    pause_continuous_failure: i64,
    email_continuous_failure: Option<String>,
    callback_email: Option<String>,
    create_user: Option<String>,
    created_at: String,
    updated_at: String,
}

fn read_flow_row(row: &Row) -> rusqlite::Result<FlowRow> {
    Ok(FlowRow {
        id: row.get("id")?,
        name: row.get("name")?,
        cron: row.get("cron")?,
        last_run_status: row.get("last_run_status")?,
        scheduling_status: row.get("scheduling_status")?,
        pause_continuous_failure: row.get("pause_continuous_failure")?,
        email_continuous_failure: row.get("email_continuous_failure")?,
        callback_email: row.get("callback_email")?,
        create_user: row.get("create_user")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl TryFrom<FlowRow> for Flow {
    type Error = StoreError;

    fn try_from(row: FlowRow) -> Result<Self, Self::Error> {
        Ok(Flow {
            id: row.id,
            name: row.name,
            cron: row.cron,
            last_run_status: row
                .last_run_status
                .as_deref()
                .map(str::parse::<LastRunStatus>)
                .transpose()?,
            scheduling_status: row.scheduling_status.parse()?,
            pause_continuous_failure: u32::try_from(row.pause_continuous_failure).map_err(
                |_| StoreError::Invalid(format!("bad pause threshold {}", row.pause_continuous_failure)),
            )?,
            email_continuous_failure: row.email_continuous_failure,
            callback_email: row.callback_email,
            create_user: row.create_user,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
        })
    }
}

struct ExecutionRow {
    id: i64,
    flow_id: i64,
    status: String,
    trigger_type: String,
    retry_number: i64,
    created_at: String,
    updated_at: String,
    heartbeat_at: Option<String>,
}

fn read_execution_row(row: &Row) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get("id")?,
        flow_id: row.get("flow_id")?,
        status: row.get("status")?,
        trigger_type: row.get("trigger_type")?,
        retry_number: row.get("retry_number")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        heartbeat_at: row.get("heartbeat_at")?,
    })
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(ExecutionRecord {
            id: row.id,
            flow_id: row.flow_id,
            status: row.status.parse()?,
            trigger_type: row.trigger_type.parse()?,
            retry_number: row.retry_number.max(0) as u32,
            created_at: parse_time(&row.created_at)?,
            updated_at: parse_time(&row.updated_at)?,
            heartbeat_at: row.heartbeat_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

impl Store for SqliteStore {
    fn create_schema(&self) -> StoreResult<()> {
        debug!("Creating database schema");
        let conn = self.pool.get()?;
        conn.execute_batch(SCHEMA)?;
        info!("Database schema ready");
        Ok(())
    }

    fn load_seed_data(&self, components: &[ComponentDefinition]) -> StoreResult<()> {
        let now = now_text();
        let conn = self.pool.get()?;
        for component in components {
            let definition = serde_json::to_string(component)?;
            conn.execute(
                "INSERT OR IGNORE INTO component_definition (name, definition, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![component.name, definition, now],
            )?;
        }
        debug!("Seeded {} component definitions", components.len());
        Ok(())
    }

    fn purge_executions_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let cutoff = cutoff.to_rfc3339();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM flow_execution_log WHERE execution_id IN
                (SELECT id FROM flow_execution WHERE created_at < ?1)",
            params![cutoff],
        )?;
        let purged = tx.execute(
            "DELETE FROM flow_execution WHERE created_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(purged)
    }

    fn add_flow(
        &self,
        definition: &FlowDefinition,
        jobs: &[JobDefinition],
        scheduling_status: SchedulingStatus,
    ) -> StoreResult<i64> {
        let now = now_text();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO flow
             (name, cron, scheduling_status, pause_continuous_failure,
              email_continuous_failure, callback_email, create_user, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                definition.name,
                definition.cron_expression(),
                scheduling_status.as_str(),
                definition.pause_continuous_failure as i64,
                definition.email_continuous_failure,
                definition.callback_email,
                definition.create_user,
                now,
            ],
        )?;
        let flow_id = tx.last_insert_rowid();

        for job in jobs {
            tx.execute(
                "INSERT INTO flow_job (flow_id, name, component, previous, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    flow_id,
                    job.name,
                    job.component,
                    serde_json::to_string(&job.previous)?,
                    serde_json::to_string(&job.properties)?,
                ],
            )?;
        }

        tx.commit()?;
        Ok(flow_id)
    }

    fn delete_flow(&self, flow_id: i64) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM flow WHERE id = ?1", params![flow_id])?;
        Ok(())
    }

    fn get_flow(&self, flow_id: i64) -> StoreResult<Option<Flow>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT * FROM flow WHERE id = ?1",
            params![flow_id],
            read_flow_row,
        )
        .optional()?
        .map(Flow::try_from)
        .transpose()
    }

    fn get_jobs(&self, flow_id: i64) -> StoreResult<Vec<Job>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, flow_id, name, component, previous, properties
             FROM flow_job WHERE flow_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![flow_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, flow_id, name, component, previous, properties) = row?;
            jobs.push(Job {
                id,
                flow_id,
                name,
                component,
                previous: serde_json::from_str(&previous)?,
                properties: serde_json::from_str(&properties)?,
            });
        }
        Ok(jobs)
    }

    fn update_last_run_status(&self, flow_id: i64, status: LastRunStatus) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE flow SET last_run_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_text(), flow_id],
        )?;
        Ok(())
    }

    fn update_scheduling_status(
        &self,
        flow_id: i64,
        status: SchedulingStatus,
    ) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE flow SET scheduling_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_text(), flow_id],
        )?;
        Ok(())
    }

    fn add_execution(
        &self,
        flow_id: i64,
        trigger_type: TriggerType,
        retry_number: u32,
    ) -> StoreResult<ExecutionRecord> {
        let now = now_text();
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO flow_execution
             (flow_id, status, trigger_type, retry_number, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                flow_id,
                ExecutionStatus::Waiting.as_str(),
                trigger_type.as_str(),
                retry_number as i64,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_execution(id)?
            .ok_or_else(|| StoreError::Invalid(format!("execution {} vanished after insert", id)))
    }

    fn get_execution(&self, execution_id: i64) -> StoreResult<Option<ExecutionRecord>> {
        let conn = self.pool.get()?;
        conn.query_row(
            "SELECT * FROM flow_execution WHERE id = ?1",
            params![execution_id],
            read_execution_row,
        )
        .optional()?
        .map(ExecutionRecord::try_from)
        .transpose()
    }

    fn update_execution_status(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
    ) -> StoreResult<bool> {
        let conn = self.pool.get()?;
        let sql = format!(
            "UPDATE flow_execution SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status NOT IN {}",
            TERMINAL_STATUSES_SQL
        );
        let changed = conn.execute(&sql, params![status.as_str(), now_text(), execution_id])?;
        Ok(changed > 0)
    }

    fn recent_executions(&self, flow_id: i64, count: usize) -> StoreResult<Vec<ExecutionRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM flow_execution WHERE flow_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![flow_id, count as i64], read_execution_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(ExecutionRecord::try_from(row?)?);
        }
        Ok(records)
    }

    fn append_execution_log(
        &self,
        execution_id: i64,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO flow_execution_log (execution_id, level, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, level.as_str(), message, now_text()],
        )?;
        Ok(())
    }

    fn execution_logs(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLogEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT level, message, created_at FROM flow_execution_log
             WHERE execution_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (level, message, created_at) = row?;
            entries.push(ExecutionLogEntry {
                execution_id,
                level: level.parse()?,
                message,
                timestamp: parse_time(&created_at)?,
            });
        }
        Ok(entries)
    }

    fn record_heartbeat(&self, execution_ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        if execution_ids.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; execution_ids.len()].join(", ");
        let sql = format!(
            "UPDATE flow_execution SET heartbeat_at = ? WHERE id IN ({})",
            placeholders
        );

        let at = at.to_rfc3339();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(execution_ids.len() + 1);
        values.push(&at);
        for id in execution_ids {
            values.push(id);
        }

        let conn = self.pool.get()?;
        conn.execute(&sql, params_from_iter(values))?;
        Ok(())
    }
}
