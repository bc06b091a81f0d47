//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::component::{ComponentDefinition, ComponentRegistry};
use crate::config::EngineConfig;
use crate::error::{EngineError, NotifyError, StoreError};
use crate::executor::{DagExecutor, ExecutorResult, FlowExecutor};
use crate::model::{
    ExecutionDescriptor, ExecutionLogEntry, ExecutionRecord, ExecutionStatus, Flow,
    FlowDefinition, Job, JobDefinition, LastRunStatus, LogLevel, SchedulingStatus, TriggerType,
};
use crate::notify::Notifier;
use crate::runtime::{
    Dispatcher, EngineContext, ExecutionArena, ExecutionService, RunningSet, StoreFlowHooks,
    ThreadPool, ThreadPoolRegistry, WaitingQueue,
};
use crate::store::{MemoryStore, Store, StoreResult};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Notifier that keeps everything it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMail>>,
    serious: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }

    pub fn serious_errors(&self) -> Vec<String> {
        self.serious.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        self.sent.lock().push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn send_serious_error(&self, trace: &str) -> Result<(), NotifyError> {
        self.serious.lock().push(trace.to_string());
        Ok(())
    }
}

/// What a [`ScriptedExecutor`] does with every execution it gets.
#[derive(Debug, Clone)]
pub enum Script {
    /// Begin, then end successfully.
    Succeed,
    /// Begin, then return an error without ending.
    Fail(String),
    /// Return an error without touching the execution.
    FailEarly(String),
    /// Begin, then panic.
    Panic,
    /// Begin, sleep, then end.
    BlockFor(Duration),
    /// Begin, then end once the execution is killed.
    UntilKilled,
}

/// Executor with fixed behavior that counts its calls.
#[derive(Clone)]
pub struct ScriptedExecutor {
    script: Script,
    calls: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Waits until some execution has begun.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.started.load(Ordering::SeqCst) == 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl FlowExecutor for ScriptedExecutor {
    fn run(
        &self,
        descriptor: &ExecutionDescriptor,
        context: &Arc<EngineContext>,
    ) -> ExecutorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Script::FailEarly(message) = &self.script {
            return Err(message.clone().into());
        }
        let flow = context
            .store
            .get_flow(descriptor.flow_id)?
            .ok_or(EngineError::FlowNotFound(descriptor.flow_id))?;
        let service = ExecutionService::get_or_create(descriptor.execution_id, &flow, context);
        service.begin();
        self.started.fetch_add(1, Ordering::SeqCst);

        match &self.script {
            Script::Succeed | Script::FailEarly(_) => {}
            Script::Fail(message) => return Err(message.clone().into()),
            Script::Panic => panic!("scripted panic"),
            Script::BlockFor(duration) => thread::sleep(*duration),
            Script::UntilKilled => {
                while !service.is_killed() {
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }

        service.end();
        Ok(())
    }
}

/// Store over a [`MemoryStore`] whose reads and status writes can be made
/// to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    /// (flow reads still allowed, flow reads that fail after them)
    flow_reads: Mutex<Option<(usize, usize)>>,
    fail_status_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Lets `allowed` flow reads through, then fails the next `failing` ones.
    pub fn fail_flow_reads(&self, allowed: usize, failing: usize) {
        *self.flow_reads.lock() = Some((allowed, failing));
    }

    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    fn outage(what: &str) -> StoreError {
        StoreError::Invalid(format!("{} unavailable", what))
    }
}

impl Store for FlakyStore {
    fn create_schema(&self) -> StoreResult<()> {
        self.inner.create_schema()
    }

    fn load_seed_data(&self, components: &[ComponentDefinition]) -> StoreResult<()> {
        self.inner.load_seed_data(components)
    }

    fn purge_executions_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.inner.purge_executions_before(cutoff)
    }

    fn add_flow(
        &self,
        definition: &FlowDefinition,
        jobs: &[JobDefinition],
        scheduling_status: SchedulingStatus,
    ) -> StoreResult<i64> {
        self.inner.add_flow(definition, jobs, scheduling_status)
    }

    fn delete_flow(&self, flow_id: i64) -> StoreResult<()> {
        self.inner.delete_flow(flow_id)
    }

    fn get_flow(&self, flow_id: i64) -> StoreResult<Option<Flow>> {
        let mut reads = self.flow_reads.lock();
        if let Some((allowed, failing)) = reads.as_mut() {
            if *allowed > 0 {
                *allowed -= 1;
            } else if *failing > 0 {
                *failing -= 1;
                return Err(Self::outage("flow"));
            }
        }
        drop(reads);
        self.inner.get_flow(flow_id)
    }

    fn get_jobs(&self, flow_id: i64) -> StoreResult<Vec<Job>> {
        self.inner.get_jobs(flow_id)
    }

    fn update_last_run_status(&self, flow_id: i64, status: LastRunStatus) -> StoreResult<()> {
        self.inner.update_last_run_status(flow_id, status)
    }

    fn update_scheduling_status(
        &self,
        flow_id: i64,
        status: SchedulingStatus,
    ) -> StoreResult<()> {
        self.inner.update_scheduling_status(flow_id, status)
    }

    fn add_execution(
        &self,
        flow_id: i64,
        trigger_type: TriggerType,
        retry_number: u32,
    ) -> StoreResult<ExecutionRecord> {
        self.inner.add_execution(flow_id, trigger_type, retry_number)
    }

    fn get_execution(&self, execution_id: i64) -> StoreResult<Option<ExecutionRecord>> {
        self.inner.get_execution(execution_id)
    }

    fn update_execution_status(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
    ) -> StoreResult<bool> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(Self::outage("execution status"));
        }
        self.inner.update_execution_status(execution_id, status)
    }

    fn recent_executions(&self, flow_id: i64, count: usize) -> StoreResult<Vec<ExecutionRecord>> {
        self.inner.recent_executions(flow_id, count)
    }

    fn append_execution_log(
        &self,
        execution_id: i64,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()> {
        self.inner.append_execution_log(execution_id, level, message)
    }

    fn execution_logs(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLogEntry>> {
        self.inner.execution_logs(execution_id)
    }

    fn record_heartbeat(&self, execution_ids: &[i64], at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.record_heartbeat(execution_ids, at)
    }
}

/// An engine context over a [`MemoryStore`], optionally with a live dispatcher.
pub struct TestHarness {
    pub context: Arc<EngineContext>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let shared: Arc<dyn Store> = store.clone();
        Self::over(store, shared)
    }

    /// A harness whose context reaches the store through a [`FlakyStore`].
    pub fn with_flaky_store(executor: ScriptedExecutor) -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(Arc::clone(&store)));
        let mut harness = Self::over(store, flaky.clone());
        harness.start_dispatcher(Arc::new(executor));
        (harness, flaky)
    }

    fn over(store: Arc<MemoryStore>, shared_store: Arc<dyn Store>) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());

        let context = Arc::new(EngineContext {
            engine_id: "test-engine".to_string(),
            config: EngineConfig::in_memory().with_pool_sizes(2, 2),
            store: Arc::clone(&shared_store),
            notifier: notifier.clone(),
            components: ComponentRegistry::with_builtins(),
            hooks: Arc::new(StoreFlowHooks::new(shared_store)),
            schedule_hook: None,
            flow_pool: ThreadPool::new("test-flow-execution", 2)
                .expect("failed to create flow pool"),
            job_pools: ThreadPoolRegistry::new(),
            queue: WaitingQueue::new(),
            running: RunningSet::new(),
            executions: ExecutionArena::new(),
        });

        Self {
            context,
            store,
            notifier,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(executor: ScriptedExecutor) -> Self {
        Self::dispatching(Arc::new(executor))
    }

    pub fn with_default_executor() -> Self {
        Self::dispatching(Arc::new(DagExecutor::new()))
    }

    fn dispatching(executor: Arc<dyn FlowExecutor>) -> Self {
        let mut harness = Self::new();
        harness.start_dispatcher(executor);
        harness
    }

    fn start_dispatcher(&mut self, executor: Arc<dyn FlowExecutor>) {
        let handle = Dispatcher::new(Arc::clone(&self.context), executor)
            .spawn()
            .expect("failed to start dispatcher");
        self.dispatcher = Some(handle);
    }

    fn add_flow(&self, definition: &FlowDefinition, jobs: &[JobDefinition]) -> i64 {
        let status = if definition.cron_expression().is_some() {
            SchedulingStatus::Scheduling
        } else {
            SchedulingStatus::NotSet
        };
        self.store.add_flow(definition, jobs, status).unwrap()
    }

    /// A stored flow with one WAITING execution.
    pub fn flow_with_execution(&self, definition: FlowDefinition) -> (Flow, i64) {
        let flow_id = self.add_flow(&definition, &[]);
        let execution = self.add_execution(flow_id);
        let flow = self.store.get_flow(flow_id).unwrap().unwrap();
        (flow, execution.execution_id)
    }

    pub fn service(&self, execution_id: i64, flow: &Flow) -> Arc<ExecutionService> {
        ExecutionService::get_or_create(execution_id, flow, &self.context)
    }

    /// Stores a flow and one execution without queueing it.
    pub fn prepared_execution(&self, definition: FlowDefinition) -> (i64, ExecutionDescriptor) {
        let flow_id = self.add_flow(&definition, &[]);
        (flow_id, self.add_execution(flow_id))
    }

    /// Stores a flow with jobs and queues one execution of it.
    pub fn queued_flow(
        &self,
        definition: FlowDefinition,
        jobs: &[JobDefinition],
    ) -> (i64, ExecutionDescriptor) {
        let flow_id = self.add_flow(&definition, jobs);
        let descriptor = self.add_execution(flow_id);
        self.context.queue.push(descriptor.clone()).unwrap();
        (flow_id, descriptor)
    }

    pub fn add_execution(&self, flow_id: i64) -> ExecutionDescriptor {
        self.store
            .add_execution(flow_id, TriggerType::Manual, 0)
            .unwrap()
            .descriptor()
    }

    pub fn execution_status(&self, execution_id: i64) -> ExecutionStatus {
        self.store
            .get_execution(execution_id)
            .unwrap()
            .expect("execution exists")
            .status
    }

    pub fn last_run_status(&self, flow_id: i64) -> Option<LastRunStatus> {
        self.store
            .get_flow(flow_id)
            .unwrap()
            .and_then(|flow| flow.last_run_status)
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.context.queue.close();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        self.context.flow_pool.shutdown();
        self.context.job_pools.shutdown_all();
        self.context.executions.clear();
    }
}
