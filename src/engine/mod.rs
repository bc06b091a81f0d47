//! Engine
//!
//! The composition root. [`EngineBuilder::build`] validates the
//! configuration, opens and bootstraps storage, wires the shared
//! [`EngineContext`], then starts the dispatch loop and the heartbeat.
//! The resulting [`Engine`] is the flow-management API.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use flowrunner::{Engine, EngineConfig, FlowDefinition, JobDefinition};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::from_file("engine.yaml")?)?;
//!
//!     let flow_id = engine
//!         .add_flow(
//!             &FlowDefinition::new("nightly").with_pause_threshold(3),
//!             &[JobDefinition::new("hello", "shell").with_property("command", "echo hello")],
//!         )
//!         .ok_or("flow was not added")?;
//!
//!     let execution_id = engine.start_process(flow_id)?;
//!     engine.wait_idle(Duration::from_secs(60));
//!     println!("{:?}", engine.get_execution(execution_id)?.status);
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod registry;

use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::component::ComponentRegistry;
use crate::config::{DataSourceConfig, EngineConfig};
use crate::error::{EngineError, Result};
use crate::executor::{DagExecutor, FlowExecutor};
use crate::model::{
    ExecutionDescriptor, ExecutionLogEntry, ExecutionRecord, ExecutionStatus, Flow,
    FlowDefinition, JobDefinition, SchedulingStatus, TriggerType,
};
use crate::monitoring::{Heartbeat, HeartbeatReport};
use crate::notify::{MailService, Notifier};
use crate::runtime::{
    Dispatcher, EngineContext, ExecutionArena, FlowHooks, RunningSet, ScheduleHook,
    StoreFlowHooks, ThreadPool, ThreadPoolRegistry, WaitingQueue,
};
use crate::store::{MemoryStore, SqliteStore, Store};

pub use registry::EngineRegistry;

/// Assembles an [`Engine`], with optional replacements for any collaborator.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    notifier: Option<Arc<dyn Notifier>>,
    executor: Option<Arc<dyn FlowExecutor>>,
    hooks: Option<Arc<dyn FlowHooks>>,
    schedule_hook: Option<Arc<dyn ScheduleHook>>,
    components: Option<ComponentRegistry>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            notifier: None,
            executor: None,
            hooks: None,
            schedule_hook: None,
            components: None,
        }
    }

    /// Uses this store instead of opening the configured data source.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn FlowExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_flow_hooks(mut self, hooks: Arc<dyn FlowHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_schedule_hook(mut self, hook: Arc<dyn ScheduleHook>) -> Self {
        self.schedule_hook = Some(hook);
        self
    }

    pub fn with_components(mut self, components: ComponentRegistry) -> Self {
        self.components = Some(components);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let engine_id = Uuid::new_v4().to_string();
        info!("Starting engine {}", engine_id);

        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config.data_source)?,
        };
        let components = self.components.unwrap_or_else(ComponentRegistry::with_builtins);

        bootstrap::bootstrap(&self.config, store.as_ref(), &components)?;
        bootstrap::purge_expired(&self.config, store.as_ref());

        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(MailService::new(self.config.mail.clone())));
        let hooks = self
            .hooks
            .unwrap_or_else(|| Arc::new(StoreFlowHooks::new(Arc::clone(&store))));
        let executor = self.executor.unwrap_or_else(|| Arc::new(DagExecutor::new()));

        let flow_pool = ThreadPool::new(
            format!("flowrunner-flow-execution-{}", &engine_id[..8]),
            self.config.flow_execution_pool_size,
        )?;

        let heartbeat_interval = self.config.heartbeat_interval();
        let context = Arc::new(EngineContext {
            engine_id,
            config: self.config,
            store,
            notifier,
            components,
            hooks,
            schedule_hook: self.schedule_hook,
            flow_pool,
            job_pools: ThreadPoolRegistry::new(),
            queue: WaitingQueue::new(),
            running: RunningSet::new(),
            executions: ExecutionArena::new(),
        });

        let dispatcher = Dispatcher::new(Arc::clone(&context), executor).spawn()?;
        let heartbeat = match Heartbeat::start(Arc::clone(&context), heartbeat_interval) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                context.queue.close();
                let _ = dispatcher.join();
                return Err(e);
            }
        };

        info!(
            "Engine {} ready (flow pool: {}, job pool: {})",
            context.engine_id,
            context.config.flow_execution_pool_size,
            context.config.job_pool_size
        );

        Ok(Engine {
            context,
            dispatcher: Mutex::new(Some(dispatcher)),
            heartbeat,
        })
    }
}

fn open_store(data_source: &DataSourceConfig) -> Result<Arc<dyn Store>> {
    match data_source {
        DataSourceConfig::Sqlite {
            path,
            pool_max_size,
        } => {
            let store = SqliteStore::open(path, *pool_max_size).map_err(|e| {
                EngineError::Infrastructure(format!(
                    "Cannot open database {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Arc::new(store))
        }
        DataSourceConfig::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// A running engine instance.
pub struct Engine {
    context: Arc<EngineContext>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    heartbeat: Heartbeat,
}

impl Engine {
    /// Builds an engine with default collaborators.
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn id(&self) -> &str {
        &self.context.engine_id
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Persists a new flow and returns its id.
    ///
    /// Failures, an invalid cron expression included, are logged and
    /// reported as `None`.
    pub fn add_flow(&self, definition: &FlowDefinition, jobs: &[JobDefinition]) -> Option<i64> {
        match self.try_add_flow(definition, jobs) {
            Ok(flow_id) => Some(flow_id),
            Err(e) => {
                error!("Failed to add flow '{}': {}", definition.name, e);
                None
            }
        }
    }

    fn try_add_flow(&self, definition: &FlowDefinition, jobs: &[JobDefinition]) -> Result<i64> {
        if definition.name.trim().is_empty() {
            return Err(EngineError::Config("flow name is empty".to_string()));
        }

        let cron = definition.cron_expression();
        if let Some(expression) = cron {
            cron::Schedule::from_str(expression).map_err(|e| {
                EngineError::Config(format!("invalid cron expression '{}': {}", expression, e))
            })?;
        }

        let scheduling_status = if cron.is_some() {
            SchedulingStatus::Scheduling
        } else {
            SchedulingStatus::NotSet
        };
        let flow_id = self
            .context
            .store
            .add_flow(definition, jobs, scheduling_status)?;

        if let (Some(expression), Some(hook)) = (cron, &self.context.schedule_hook) {
            if let Err(e) = hook.schedule(flow_id, expression) {
                error!("Failed to schedule flow {}: {}", flow_id, e);
            }
        }

        info!("Flow '{}' added with id {}", definition.name, flow_id);
        Ok(flow_id)
    }

    pub fn delete_flow(&self, flow_id: i64) -> Result<()> {
        if let Some(hook) = &self.context.schedule_hook {
            if let Err(e) = hook.unschedule(flow_id) {
                warn!("Failed to unschedule flow {}: {}", flow_id, e);
            }
        }
        self.context.store.delete_flow(flow_id)?;
        info!("Flow {} deleted", flow_id);
        Ok(())
    }

    /// Queues a manual run and returns the new execution id.
    ///
    /// Fails with [`EngineError::DuplicateExecution`] while another run of
    /// the flow is still waiting to be dispatched.
    pub fn start_process(&self, flow_id: i64) -> Result<i64> {
        self.get_flow(flow_id)?;
        if self.context.queue.contains_flow(flow_id) {
            return Err(EngineError::DuplicateExecution(flow_id));
        }

        let record = self
            .context
            .store
            .add_execution(flow_id, TriggerType::Manual, 0)?;

        match self.context.queue.push_unique(record.descriptor()) {
            Ok(true) => {
                info!("Flow {} triggered manually, execution {}", flow_id, record.id);
                Ok(record.id)
            }
            Ok(false) => {
                self.abandon(record.id, ExecutionStatus::RejectedDuplicate);
                Err(EngineError::DuplicateExecution(flow_id))
            }
            Err(e) => {
                self.abandon(record.id, ExecutionStatus::Killed);
                Err(e)
            }
        }
    }

    /// Queues a retry run of a flow.
    pub fn retry_flow(&self, flow_id: i64, retry_number: u32) -> Result<i64> {
        self.enqueue(flow_id, TriggerType::Retry, retry_number)
    }

    /// Queues a run fired by the cron collaborator.
    pub fn trigger_scheduled(&self, flow_id: i64) -> Result<i64> {
        self.enqueue(flow_id, TriggerType::Schedule, 0)
    }

    fn enqueue(&self, flow_id: i64, trigger_type: TriggerType, retry_number: u32) -> Result<i64> {
        self.get_flow(flow_id)?;
        let record = self
            .context
            .store
            .add_execution(flow_id, trigger_type, retry_number)?;

        if let Err(e) = self.context.queue.push(record.descriptor()) {
            self.abandon(record.id, ExecutionStatus::Killed);
            return Err(e);
        }

        info!(
            "Flow {} queued by {} trigger, execution {}",
            flow_id, trigger_type, record.id
        );
        Ok(record.id)
    }

    /// Gives a never-queued execution record its terminal status.
    fn abandon(&self, execution_id: i64, status: ExecutionStatus) {
        if let Err(e) = self
            .context
            .store
            .update_execution_status(execution_id, status)
        {
            error!("Failed to close execution {}: {}", execution_id, e);
        }
    }

    pub fn get_flow(&self, flow_id: i64) -> Result<Flow> {
        self.context
            .store
            .get_flow(flow_id)?
            .ok_or(EngineError::FlowNotFound(flow_id))
    }

    pub fn get_execution(&self, execution_id: i64) -> Result<ExecutionRecord> {
        self.context
            .store
            .get_execution(execution_id)?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    pub fn execution_logs(&self, execution_id: i64) -> Result<Vec<ExecutionLogEntry>> {
        self.get_execution(execution_id)?;
        Ok(self.context.store.execution_logs(execution_id)?)
    }

    /// Pauses a flow's schedule.
    pub fn pause_flow(&self, flow_id: i64) -> Result<()> {
        self.context.pause_flow(flow_id)
    }

    /// Resumes a flow's schedule. The flow must have a cron expression.
    pub fn schedule_flow(&self, flow_id: i64) -> Result<()> {
        let flow = self.get_flow(flow_id)?;
        let cron = flow.cron.as_deref().ok_or(EngineError::NotSchedulable(flow_id))?;

        self.context
            .store
            .update_scheduling_status(flow_id, SchedulingStatus::Scheduling)?;
        if let Some(hook) = &self.context.schedule_hook {
            if let Err(e) = hook.schedule(flow_id, cron) {
                error!("Failed to schedule flow {}: {}", flow_id, e);
            }
        }

        info!("Flow {} scheduled", flow_id);
        Ok(())
    }

    /// Marks a running execution killed.
    ///
    /// Advisory: jobs already running are not interrupted, but no new jobs
    /// start and the execution ends as KILLED.
    pub fn kill_flow_execution(&self, execution_id: i64) -> Result<()> {
        let service = self
            .context
            .executions
            .get(execution_id)
            .ok_or(EngineError::NotRunning(execution_id))?;

        service.record_killed();
        service.add_info("flow execution killed");
        info!("Flow execution {} killed", execution_id);
        Ok(())
    }

    pub fn running_executions(&self) -> Vec<ExecutionDescriptor> {
        self.context.running.snapshot()
    }

    pub fn waiting_executions(&self) -> Vec<ExecutionDescriptor> {
        self.context.queue.snapshot()
    }

    /// The latest liveness report.
    pub fn heartbeat(&self) -> Option<HeartbeatReport> {
        self.heartbeat.latest()
    }

    /// Blocks until nothing is queued or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.context.queue.wait_idle(timeout)
    }

    /// Stops the dispatcher and heartbeat and joins every engine thread.
    ///
    /// Running executions finish first. Queued ones stay WAITING.
    pub fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        let Some(dispatcher) = dispatcher else {
            return;
        };

        info!("Shutting down engine {}", self.context.engine_id);
        self.context.queue.close();
        if dispatcher.join().is_err() {
            error!("Dispatcher thread panicked");
        }

        self.context.flow_pool.shutdown();
        self.context.job_pools.shutdown_all();
        self.heartbeat.stop();
        self.context.executions.clear();
        info!("Engine {} stopped", self.context.engine_id);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitLevel;
    use crate::model::LastRunStatus;
    use crate::testing::{RecordingNotifier, Script, ScriptedExecutor};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    fn memory_engine() -> Engine {
        Engine::new(EngineConfig::in_memory().with_pool_sizes(2, 2)).unwrap()
    }

    fn shell_job(name: &str, command: &str) -> JobDefinition {
        JobDefinition::new(name, "shell").with_property("command", command)
    }

    #[test]
    fn test_add_flow_scheduling_status() {
        let engine = memory_engine();

        let cron_flow = engine
            .add_flow(&FlowDefinition::new("cron").with_cron("0 0 * * * *"), &[])
            .unwrap();
        let manual_flow = engine.add_flow(&FlowDefinition::new("manual"), &[]).unwrap();

        assert_eq!(
            engine.get_flow(cron_flow).unwrap().scheduling_status,
            SchedulingStatus::Scheduling
        );
        assert_eq!(
            engine.get_flow(manual_flow).unwrap().scheduling_status,
            SchedulingStatus::NotSet
        );
    }

    #[test]
    fn test_add_flow_swallows_errors_while_start_process_returns_them() {
        let engine = memory_engine();

        assert_eq!(
            engine.add_flow(&FlowDefinition::new("bad").with_cron("not a cron"), &[]),
            None
        );
        assert_eq!(engine.add_flow(&FlowDefinition::new("  "), &[]), None);

        assert!(matches!(
            engine.start_process(404),
            Err(EngineError::FlowNotFound(404))
        ));
        assert!(matches!(engine.get_flow(404), Err(EngineError::FlowNotFound(404))));
    }

    #[test]
    fn test_start_process_runs_flow() {
        let engine = memory_engine();
        let flow_id = engine
            .add_flow(&FlowDefinition::new("hello"), &[shell_job("greet", "echo hello")])
            .unwrap();

        let execution_id = engine.start_process(flow_id).unwrap();
        assert!(engine.wait_idle(WAIT));

        let record = engine.get_execution(execution_id).unwrap();
        assert_eq!(record.status, ExecutionStatus::Success);
        assert_eq!(record.trigger_type, TriggerType::Manual);
        assert_eq!(
            engine.get_flow(flow_id).unwrap().last_run_status,
            Some(LastRunStatus::Success)
        );

        let logs = engine.execution_logs(execution_id).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("hello")));
        assert!(engine.running_executions().is_empty());
    }

    #[test]
    fn test_duplicate_manual_trigger_rejected_while_queued() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let mut config = EngineConfig::in_memory();
        config.dispatch_delay_ms = 300;
        let engine = Engine::builder(config)
            .with_executor(Arc::new(executor.clone()))
            .build()
            .unwrap();
        let flow_id = engine.add_flow(&FlowDefinition::new("busy"), &[]).unwrap();

        // The dispatcher holds one descriptor during its delay, so one of the
        // later triggers always finds another still queued.
        let outcomes: Vec<_> = (0..3).map(|_| engine.start_process(flow_id)).collect();
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(EngineError::DuplicateExecution(id)) if *id == flow_id)));
        assert!(engine.wait_idle(WAIT));

        assert!(executor.calls() >= 1);
    }

    #[test]
    fn test_retry_and_scheduled_triggers_record_type() {
        let executor = ScriptedExecutor::new(Script::Succeed);
        let engine = Engine::builder(EngineConfig::in_memory())
            .with_executor(Arc::new(executor.clone()))
            .build()
            .unwrap();
        let flow_id = engine.add_flow(&FlowDefinition::new("f"), &[]).unwrap();

        let retry = engine.retry_flow(flow_id, 2).unwrap();
        assert!(engine.wait_idle(WAIT));
        let scheduled = engine.trigger_scheduled(flow_id).unwrap();
        assert!(engine.wait_idle(WAIT));

        let retry = engine.get_execution(retry).unwrap();
        assert_eq!(retry.trigger_type, TriggerType::Retry);
        assert_eq!(retry.retry_number, 2);
        assert_eq!(
            engine.get_execution(scheduled).unwrap().trigger_type,
            TriggerType::Schedule
        );
        assert_eq!(executor.calls(), 2);
    }

    #[test]
    fn test_kill_running_execution() {
        let executor = ScriptedExecutor::new(Script::UntilKilled);
        let engine = Engine::builder(EngineConfig::in_memory())
            .with_executor(Arc::new(executor.clone()))
            .build()
            .unwrap();
        let flow_id = engine.add_flow(&FlowDefinition::new("long"), &[]).unwrap();
        let execution_id = engine.start_process(flow_id).unwrap();

        assert!(executor.wait_started(WAIT));
        engine.kill_flow_execution(execution_id).unwrap();
        assert!(engine.wait_idle(WAIT));

        assert_eq!(
            engine.get_execution(execution_id).unwrap().status,
            ExecutionStatus::Killed
        );
        assert!(matches!(
            engine.kill_flow_execution(execution_id),
            Err(EngineError::NotRunning(_))
        ));
    }

    #[test]
    fn test_pause_and_schedule_flow() {
        let engine = memory_engine();
        let cron_flow = engine
            .add_flow(&FlowDefinition::new("cron").with_cron("0 30 1 * * *"), &[])
            .unwrap();
        let manual_flow = engine.add_flow(&FlowDefinition::new("manual"), &[]).unwrap();

        engine.pause_flow(cron_flow).unwrap();
        assert_eq!(
            engine.get_flow(cron_flow).unwrap().scheduling_status,
            SchedulingStatus::Paused
        );

        engine.schedule_flow(cron_flow).unwrap();
        assert_eq!(
            engine.get_flow(cron_flow).unwrap().scheduling_status,
            SchedulingStatus::Scheduling
        );

        assert!(matches!(
            engine.schedule_flow(manual_flow),
            Err(EngineError::NotSchedulable(_))
        ));
        assert!(matches!(engine.pause_flow(404), Err(EngineError::FlowNotFound(404))));
    }

    #[test]
    fn test_continuous_failures_pause_flow_through_engine() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Engine::builder(EngineConfig::in_memory().with_pool_sizes(1, 1))
            .with_notifier(notifier.clone())
            .build()
            .unwrap();
        let flow_id = engine
            .add_flow(
                &FlowDefinition::new("flaky")
                    .with_cron("0 0 * * * *")
                    .with_pause_threshold(2)
                    .with_failure_email("oncall@example.com"),
                &[shell_job("fail", "exit 1")],
            )
            .unwrap();

        engine.trigger_scheduled(flow_id).unwrap();
        assert!(engine.wait_idle(WAIT));
        assert_eq!(
            engine.get_flow(flow_id).unwrap().scheduling_status,
            SchedulingStatus::Scheduling
        );

        engine.trigger_scheduled(flow_id).unwrap();
        assert!(engine.wait_idle(WAIT));
        assert_eq!(
            engine.get_flow(flow_id).unwrap().scheduling_status,
            SchedulingStatus::Paused
        );

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["oncall@example.com"]);
        assert!(sent[0].body.contains("flaky"));
    }

    #[test]
    fn test_delete_flow() {
        let engine = memory_engine();
        let flow_id = engine.add_flow(&FlowDefinition::new("gone"), &[]).unwrap();

        engine.delete_flow(flow_id).unwrap();
        assert!(matches!(engine.get_flow(flow_id), Err(EngineError::FlowNotFound(_))));
    }

    #[test]
    fn test_missing_execution() {
        let engine = memory_engine();
        assert!(matches!(
            engine.get_execution(77),
            Err(EngineError::ExecutionNotFound(77))
        ));
        assert!(engine.execution_logs(77).is_err());
    }

    #[test]
    fn test_sqlite_engine_bootstraps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(DataSourceConfig::Sqlite {
            path: dir.path().join("flows.db"),
            pool_max_size: 4,
        })
        .with_init_level(InitLevel::CreateAndSeed)
        .with_pool_sizes(1, 2);

        let engine = Engine::new(config).unwrap();
        let flow_id = engine
            .add_flow(&FlowDefinition::new("persisted"), &[shell_job("a", "true")])
            .unwrap();
        let execution_id = engine.start_process(flow_id).unwrap();
        assert!(engine.wait_idle(WAIT));

        assert_eq!(
            engine.get_execution(execution_id).unwrap().status,
            ExecutionStatus::Success
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::in_memory().with_pool_sizes(0, 1);
        assert!(matches!(Engine::new(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let engine = memory_engine();
        let flow_id = engine.add_flow(&FlowDefinition::new("f"), &[]).unwrap();

        engine.shutdown();
        engine.shutdown();

        assert!(matches!(
            engine.start_process(flow_id),
            Err(EngineError::ShuttingDown)
        ));
    }
}
