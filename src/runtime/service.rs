//! Execution State Machine
//!
//! One [`ExecutionService`] exists per in-flight execution, held in the
//! context's [`ExecutionArena`]. The executor, the kill path and component
//! log writers all reach the same instance through
//! [`ExecutionService::get_or_create`].
//!
//! Lifecycle: `begin()`, any number of `record_error()` / `record_killed()`
//! calls (the last one wins), then exactly one effective `end()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use log::{error, info, warn};
use parking_lot::Mutex;

use super::context::EngineContext;
use crate::error::Result;
use crate::model::{EndStatus, ExecutionStatus, Flow, LogLevel};
use crate::notify::{continuous_failure_notice, failure_notice};

const KILLED_MESSAGE: &str = "manual kill";

struct Pending {
    status: EndStatus,
    message: String,
}

impl Default for Pending {
    fn default() -> Self {
        Self {
            status: EndStatus::Success,
            message: String::new(),
        }
    }
}

pub struct ExecutionService {
    execution_id: i64,
    flow: Flow,
    context: Arc<EngineContext>,
    pending: Mutex<Pending>,
    ended: AtomicBool,
}

impl ExecutionService {
    /// Returns the live instance for an execution, creating it on first call.
    pub fn get_or_create(
        execution_id: i64,
        flow: &Flow,
        context: &Arc<EngineContext>,
    ) -> Arc<ExecutionService> {
        context.executions.get_or_create(execution_id, || ExecutionService {
            execution_id,
            flow: flow.clone(),
            context: Arc::clone(context),
            pending: Mutex::new(Pending::default()),
            ended: AtomicBool::new(false),
        })
    }

    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Marks the execution running and tells the flow collaborator.
    ///
    /// Failures are logged and swallowed.
    pub fn begin(&self) {
        info!("Begin to execute flow: {}", self.execution_id);

        match self
            .context
            .store
            .update_execution_status(self.execution_id, ExecutionStatus::Running)
        {
            Ok(true) => {}
            Ok(false) => warn!(
                "Flow execution {} was already finished when it began",
                self.execution_id
            ),
            Err(e) => error!(
                "Failed to mark flow execution {} running: {}",
                self.execution_id, e
            ),
        }

        if let Err(e) = self.context.hooks.on_flow_start(self.flow.id) {
            error!("Flow start hook failed for flow {}: {}", self.flow.id, e);
        }

        self.add_info(format!("begin to execute flow: {}", self.execution_id));
    }

    /// Sets the pending outcome to ERROR with a message.
    pub fn record_error(&self, message: impl Into<String>) {
        let mut pending = self.pending.lock();
        pending.status = EndStatus::Error;
        pending.message = message.into();
    }

    /// Sets the pending outcome to KILLED, replacing any recorded error.
    pub fn record_killed(&self) {
        let mut pending = self.pending.lock();
        pending.status = EndStatus::Killed;
        pending.message = KILLED_MESSAGE.to_string();
    }

    pub fn is_killed(&self) -> bool {
        self.pending.lock().status == EndStatus::Killed
    }

    pub fn pending_status(&self) -> EndStatus {
        self.pending.lock().status
    }

    pub fn error_message(&self) -> String {
        self.pending.lock().message.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn add_info(&self, message: impl AsRef<str>) {
        self.append_log(LogLevel::Info, message.as_ref());
    }

    pub fn add_error(&self, message: impl AsRef<str>) {
        self.append_log(LogLevel::Error, message.as_ref());
    }

    fn append_log(&self, level: LogLevel, message: &str) {
        if let Err(e) = self
            .context
            .store
            .append_execution_log(self.execution_id, level, message)
        {
            error!(
                "Failed to write log for flow execution {}: {}",
                self.execution_id, e
            );
        }
    }

    /// Finalizes the execution.
    ///
    /// Only the first call has any effect; it returns `true`. The instance is
    /// removed from the arena whatever happens along the way.
    pub fn end(&self) -> bool {
        if self.ended.swap(true, Ordering::SeqCst) {
            warn!("Flow execution {} already ended", self.execution_id);
            return false;
        }

        let (status, message) = {
            let pending = self.pending.lock();
            (pending.status, pending.message.clone())
        };

        match status {
            EndStatus::Success => {
                info!("Flow execution {} finished successfully", self.execution_id);
                self.add_info("flow execution finished successfully");
            }
            EndStatus::Error | EndStatus::Killed => {
                error!(
                    "Flow execution {} ended with {}: {}",
                    self.execution_id,
                    status.execution_status(),
                    message
                );
                self.add_error(&message);
                self.send_failure_notice(&message);
                if let Err(e) = self.check_continuous_failure(&message) {
                    error!(
                        "Continuous failure check failed for flow {}: {}",
                        self.flow.id, e
                    );
                }
            }
        }

        match self
            .context
            .store
            .update_execution_status(self.execution_id, status.execution_status())
        {
            Ok(true) => {}
            Ok(false) => warn!(
                "Flow execution {} already had a terminal status",
                self.execution_id
            ),
            Err(e) => error!(
                "Failed to persist status of flow execution {}: {}",
                self.execution_id, e
            ),
        }

        if let Err(e) = self
            .context
            .hooks
            .on_flow_end(self.flow.id, status.last_run_status())
        {
            error!("Flow end hook failed for flow {}: {}", self.flow.id, e);
        }

        self.context.executions.remove(self.execution_id, self);
        true
    }

    fn send_failure_notice(&self, message: &str) {
        let recipients = self.flow.callback_recipients();
        if recipients.is_empty() {
            return;
        }
        let (subject, body) = failure_notice(&self.flow.name, self.execution_id, message);
        if let Err(e) = self.context.notifier.send(&recipients, &subject, &body) {
            error!(
                "Failed to send failure notice for flow {}: {}",
                self.flow.id, e
            );
        }
    }

    /// Pauses the flow when at least `T - 1` of its latest `T` executions
    /// (this one included, still unfinished) ended in ERROR.
    fn check_continuous_failure(&self, message: &str) -> Result<()> {
        let threshold = self.flow.pause_continuous_failure;
        if threshold == 0 {
            return Ok(());
        }

        let latest = self
            .context
            .store
            .recent_executions(self.flow.id, threshold as usize)?;
        let errors = latest
            .iter()
            .filter(|e| e.status == ExecutionStatus::Error)
            .count();

        if errors < threshold.saturating_sub(1) as usize {
            return Ok(());
        }

        warn!(
            "Flow {} failed {} of its last {} executions, pausing",
            self.flow.id, errors, threshold
        );
        self.context.pause_flow(self.flow.id)?;

        let recipients = self.flow.failure_recipients();
        if !recipients.is_empty() {
            let (subject, body) = continuous_failure_notice(&self.flow.name, threshold, message);
            self.context.notifier.send(&recipients, &subject, &body)?;
        }
        Ok(())
    }
}

/// Live state machines keyed by execution id.
#[derive(Default)]
pub struct ExecutionArena {
    services: DashMap<i64, Arc<ExecutionService>>,
}

impl ExecutionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically returns the existing instance or inserts a new one.
    pub fn get_or_create<F>(&self, execution_id: i64, create: F) -> Arc<ExecutionService>
    where
        F: FnOnce() -> ExecutionService,
    {
        Arc::clone(
            self.services
                .entry(execution_id)
                .or_insert_with(|| Arc::new(create()))
                .value(),
        )
    }

    pub fn get(&self, execution_id: i64) -> Option<Arc<ExecutionService>> {
        self.services
            .get(&execution_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the entry for an execution if it is `service`.
    fn remove(&self, execution_id: i64, service: &ExecutionService) {
        self.services
            .remove_if(&execution_id, |_, live| std::ptr::eq(live.as_ref(), service));
    }

    pub fn contains(&self, execution_id: i64) -> bool {
        self.services.contains_key(&execution_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Drops every live instance.
    pub fn clear(&self) {
        self.services.clear();
    }
}
