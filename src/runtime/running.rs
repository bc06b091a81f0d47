//! Running Set
//!
//! Descriptors of executions currently occupying a worker. Workers insert
//! through [`RunningSet::enter`] and the returned guard removes the entry
//! when it drops, including while unwinding.

use dashmap::DashMap;

use crate::model::ExecutionDescriptor;

#[derive(Default)]
pub struct RunningSet {
    entries: DashMap<i64, ExecutionDescriptor>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, descriptor: ExecutionDescriptor) -> RunningGuard<'_> {
        let execution_id = descriptor.execution_id;
        self.entries.insert(execution_id, descriptor);
        RunningGuard {
            set: self,
            execution_id,
        }
    }

    pub fn contains(&self, execution_id: i64) -> bool {
        self.entries.contains_key(&execution_id)
    }

    /// Copy of the current entries, ordered by execution id.
    pub fn snapshot(&self) -> Vec<ExecutionDescriptor> {
        let mut running: Vec<ExecutionDescriptor> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        running.sort_by_key(|d| d.execution_id);
        running
    }

    pub fn execution_ids(&self) -> Vec<i64> {
        self.snapshot().iter().map(|d| d.execution_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct RunningGuard<'a> {
    set: &'a RunningSet,
    execution_id: i64,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.set.entries.remove(&self.execution_id);
    }
}
