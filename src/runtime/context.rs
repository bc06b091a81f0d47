//! Shared Engine Context
//!
//! Everything the dispatcher, the workers, the executor and the state
//! machines share, bundled once at bootstrap and passed around as
//! `Arc<EngineContext>`.

use std::sync::Arc;

use log::{error, info};

use super::hooks::{FlowHooks, ScheduleHook};
use super::pool::{ThreadPool, ThreadPoolRegistry};
use super::queue::WaitingQueue;
use super::running::RunningSet;
use super::service::ExecutionArena;
use crate::component::ComponentRegistry;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::SchedulingStatus;
use crate::notify::Notifier;
use crate::store::Store;

pub struct EngineContext {
    pub engine_id: String,
    pub config: EngineConfig,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
    pub components: ComponentRegistry,
    pub hooks: Arc<dyn FlowHooks>,
    pub schedule_hook: Option<Arc<dyn ScheduleHook>>,
    /// Runs whole flow executions
    pub flow_pool: ThreadPool,
    /// Per-execution job pools
    pub job_pools: ThreadPoolRegistry,
    pub queue: WaitingQueue,
    pub running: RunningSet,
    /// Live execution state machines
    pub executions: ExecutionArena,
}

impl EngineContext {
    fn job_pool_name(execution_id: i64) -> String {
        format!("flow-execution-{}-jobs", execution_id)
    }

    /// The job pool dedicated to one execution, created on first use.
    pub fn job_pool(&self, execution_id: i64) -> Result<Arc<ThreadPool>> {
        self.job_pools
            .get_or_create(&Self::job_pool_name(execution_id), self.config.job_pool_size)
    }

    pub fn release_job_pool(&self, execution_id: i64) {
        self.job_pools.remove(&Self::job_pool_name(execution_id));
    }

    /// Marks a flow's schedule paused and asks the cron collaborator to drop it.
    pub fn pause_flow(&self, flow_id: i64) -> Result<()> {
        if self.store.get_flow(flow_id)?.is_none() {
            return Err(EngineError::FlowNotFound(flow_id));
        }
        self.store
            .update_scheduling_status(flow_id, SchedulingStatus::Paused)?;

        if let Some(hook) = &self.schedule_hook {
            if let Err(e) = hook.unschedule(flow_id) {
                error!("Failed to unschedule flow {}: {}", flow_id, e);
            }
        }

        info!("Flow {} paused", flow_id);
        Ok(())
    }
}
