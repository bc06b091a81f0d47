//! In-memory store.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Store, StoreResult};
use crate::component::ComponentDefinition;
use crate::model::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatus, Flow, FlowDefinition, Job,
    JobDefinition, LastRunStatus, LogLevel, SchedulingStatus, TriggerType,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    flows: BTreeMap<i64, Flow>,
    jobs: BTreeMap<i64, Vec<Job>>,
    executions: BTreeMap<i64, ExecutionRecord>,
    logs: HashMap<i64, Vec<ExecutionLogEntry>>,
    components: BTreeMap<String, ComponentDefinition>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A [`Store`] backed by process memory.
///
/// All tables sit behind one lock, so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded component definitions, by name.
    pub fn component_definitions(&self) -> Vec<ComponentDefinition> {
        self.tables.lock().components.values().cloned().collect()
    }

    /// Overwrites an execution's status, bypassing the terminal-status guard.
    #[cfg(test)]
    pub(crate) fn force_execution_status(&self, execution_id: i64, status: ExecutionStatus) {
        if let Some(record) = self.tables.lock().executions.get_mut(&execution_id) {
            record.status = status;
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_execution(&self, execution_id: i64, created_at: DateTime<Utc>) {
        if let Some(record) = self.tables.lock().executions.get_mut(&execution_id) {
            record.created_at = created_at;
        }
    }
}

impl Store for MemoryStore {
    fn create_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    fn load_seed_data(&self, components: &[ComponentDefinition]) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        for component in components {
            tables
                .components
                .entry(component.name.clone())
                .or_insert_with(|| component.clone());
        }
        Ok(())
    }

    fn purge_executions_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut tables = self.tables.lock();
        let expired: Vec<i64> = tables
            .executions
            .values()
            .filter(|e| e.created_at < cutoff)
            .map(|e| e.id)
            .collect();
        for id in &expired {
            tables.executions.remove(id);
            tables.logs.remove(id);
        }
        Ok(expired.len())
    }

    fn add_flow(
        &self,
        definition: &FlowDefinition,
        jobs: &[JobDefinition],
        scheduling_status: SchedulingStatus,
    ) -> StoreResult<i64> {
        let mut tables = self.tables.lock();
        let flow_id = tables.next_id();
        let flow = Flow::from_definition(flow_id, definition, scheduling_status);

        let mut stored_jobs = Vec::with_capacity(jobs.len());
        for job in jobs {
            let job_id = tables.next_id();
            stored_jobs.push(Job::from_definition(job_id, flow_id, job));
        }

        tables.flows.insert(flow_id, flow);
        tables.jobs.insert(flow_id, stored_jobs);
        Ok(flow_id)
    }

    fn delete_flow(&self, flow_id: i64) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        tables.flows.remove(&flow_id);
        tables.jobs.remove(&flow_id);
        Ok(())
    }

    fn get_flow(&self, flow_id: i64) -> StoreResult<Option<Flow>> {
        Ok(self.tables.lock().flows.get(&flow_id).cloned())
    }

    fn get_jobs(&self, flow_id: i64) -> StoreResult<Vec<Job>> {
        Ok(self
            .tables
            .lock()
            .jobs
            .get(&flow_id)
            .cloned()
            .unwrap_or_default())
    }

    fn update_last_run_status(&self, flow_id: i64, status: LastRunStatus) -> StoreResult<()> {
        if let Some(flow) = self.tables.lock().flows.get_mut(&flow_id) {
            flow.last_run_status = Some(status);
            flow.updated_at = Utc::now();
        }
        Ok(())
    }

    fn update_scheduling_status(
        &self,
        flow_id: i64,
        status: SchedulingStatus,
    ) -> StoreResult<()> {
        if let Some(flow) = self.tables.lock().flows.get_mut(&flow_id) {
            flow.scheduling_status = status;
            flow.updated_at = Utc::now();
        }
        Ok(())
    }

    fn add_execution(
        &self,
        flow_id: i64,
        trigger_type: TriggerType,
        retry_number: u32,
    ) -> StoreResult<ExecutionRecord> {
        let mut tables = self.tables.lock();
        let id = tables.next_id();
        let now = Utc::now();
        let record = ExecutionRecord {
            id,
            flow_id,
            status: ExecutionStatus::Waiting,
            trigger_type,
            retry_number,
            created_at: now,
            updated_at: now,
            heartbeat_at: None,
        };
        tables.executions.insert(id, record.clone());
        Ok(record)
    }

    fn get_execution(&self, execution_id: i64) -> StoreResult<Option<ExecutionRecord>> {
        Ok(self.tables.lock().executions.get(&execution_id).cloned())
    }

    fn update_execution_status(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.executions.get_mut(&execution_id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = status;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn recent_executions(&self, flow_id: i64, count: usize) -> StoreResult<Vec<ExecutionRecord>> {
        Ok(self
            .tables
            .lock()
            .executions
            .values()
            .rev()
            .filter(|e| e.flow_id == flow_id)
            .take(count)
            .cloned()
            .collect())
    }

    fn append_execution_log(
        &self,
        execution_id: i64,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()> {
        self.tables
            .lock()
            .logs
            .entry(execution_id)
            .or_default()
            .push(ExecutionLogEntry {
                execution_id,
                level,
                message: message.to_string(),
                timestamp: Utc::now(),
            });
        Ok(())
    }

    fn execution_logs(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLogEntry>> {
        Ok(self
            .tables
            .lock()
            .logs
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }

    fn record_heartbeat(&self, execution_ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        for id in execution_ids {
            if let Some(record) = tables.executions.get_mut(id) {
                record.heartbeat_at = Some(at);
            }
        }
        Ok(())
    }
}
