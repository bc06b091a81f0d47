//! Persistence
//!
//! The [`Store`] trait is the engine's data-access contract. Two
//! implementations are provided:
//!
//! - [`sqlite`]: pooled SQLite database, the production backend
//! - [`memory`]: process-local maps for embedding and tests

pub mod memory;
pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::component::ComponentDefinition;
use crate::error::StoreError;
use crate::model::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatus, Flow, FlowDefinition, Job,
    JobDefinition, LastRunStatus, LogLevel, SchedulingStatus, TriggerType,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Data access for flows, jobs, executions and execution logs.
///
/// Implementations must be safe to call from the dispatcher, every worker
/// thread and the heartbeat at once.
pub trait Store: Send + Sync {
    /// Creates all tables if they do not exist.
    fn create_schema(&self) -> StoreResult<()>;

    /// Loads seed rows (the known component definitions).
    fn load_seed_data(&self, components: &[ComponentDefinition]) -> StoreResult<()>;

    /// Deletes executions created before `cutoff`, with their logs.
    fn purge_executions_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    fn add_flow(
        &self,
        definition: &FlowDefinition,
        jobs: &[JobDefinition],
        scheduling_status: SchedulingStatus,
    ) -> StoreResult<i64>;

    /// Removes a flow and its jobs. Missing flows are ignored.
    fn delete_flow(&self, flow_id: i64) -> StoreResult<()>;

    fn get_flow(&self, flow_id: i64) -> StoreResult<Option<Flow>>;

    fn get_jobs(&self, flow_id: i64) -> StoreResult<Vec<Job>>;

    fn update_last_run_status(&self, flow_id: i64, status: LastRunStatus) -> StoreResult<()>;

    fn update_scheduling_status(&self, flow_id: i64, status: SchedulingStatus)
        -> StoreResult<()>;

    /// Inserts a WAITING execution.
    fn add_execution(
        &self,
        flow_id: i64,
        trigger_type: TriggerType,
        retry_number: u32,
    ) -> StoreResult<ExecutionRecord>;

    fn get_execution(&self, execution_id: i64) -> StoreResult<Option<ExecutionRecord>>;

    /// Sets an execution's status unless it already holds a terminal one.
    ///
    /// Returns `false` when the write was refused (terminal status present
    /// or execution missing).
    fn update_execution_status(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
    ) -> StoreResult<bool>;

    /// Up to `count` executions of a flow, most recent first.
    fn recent_executions(&self, flow_id: i64, count: usize) -> StoreResult<Vec<ExecutionRecord>>;

    fn append_execution_log(
        &self,
        execution_id: i64,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()>;

    fn execution_logs(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLogEntry>>;

    /// Stamps a liveness time on the given executions.
    fn record_heartbeat(&self, execution_ids: &[i64], at: DateTime<Utc>) -> StoreResult<()>;
}
