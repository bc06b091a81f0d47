//! Flow-Level Collaborators
//!
//! [`FlowHooks`] hears when a flow starts and stops running.
//! [`ScheduleHook`] is the external cron collaborator that fires scheduled
//! runs through `Engine::trigger_scheduled`.

use std::error::Error;
use std::sync::Arc;

use crate::model::LastRunStatus;
use crate::store::Store;

pub type HookResult = Result<(), Box<dyn Error + Send + Sync>>;

pub trait FlowHooks: Send + Sync {
    fn on_flow_start(&self, flow_id: i64) -> HookResult;

    fn on_flow_end(&self, flow_id: i64, status: LastRunStatus) -> HookResult;
}

/// Writes the flow's last-run status to the store.
pub struct StoreFlowHooks {
    store: Arc<dyn Store>,
}

impl StoreFlowHooks {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl FlowHooks for StoreFlowHooks {
    fn on_flow_start(&self, flow_id: i64) -> HookResult {
        self.store
            .update_last_run_status(flow_id, LastRunStatus::Running)?;
        Ok(())
    }

    fn on_flow_end(&self, flow_id: i64, status: LastRunStatus) -> HookResult {
        self.store.update_last_run_status(flow_id, status)?;
        Ok(())
    }
}

/// Registers and removes cron schedules.
pub trait ScheduleHook: Send + Sync {
    fn schedule(&self, flow_id: i64, cron: &str) -> HookResult;

    fn unschedule(&self, flow_id: i64) -> HookResult;
}
