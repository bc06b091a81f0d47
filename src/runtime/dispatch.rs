//! Dispatch Loop
//!
//! A single dedicated thread drains the waiting queue. For each descriptor:
//!
//! 1. Load the flow. A missing flow marks the execution KILLED and counts
//!    as a loop-level failure.
//! 2. If the flow's last run is still RUNNING, persist REJECTED_DUPLICATE
//!    and drop the descriptor. The executor never sees it.
//! 3. Otherwise claim the flow (last run RUNNING) and hand the execution
//!    to the flow-execution pool.
//!
//! Loop-level failures, panics included, are logged and mailed to the
//! operators; the loop then moves on. Only closing the queue ends it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use super::context::EngineContext;
use super::pool::panic_message;
use super::service::ExecutionService;
use crate::error::{EngineError, Result};
use crate::executor::FlowExecutor;
use crate::model::{EndStatus, ExecutionDescriptor, ExecutionStatus, LastRunStatus, LogLevel};

/// What happened to a dequeued descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Accepted,
    Rejected,
}

pub struct Dispatcher {
    context: Arc<EngineContext>,
    executor: Arc<dyn FlowExecutor>,
}

impl Dispatcher {
    pub fn new(context: Arc<EngineContext>, executor: Arc<dyn FlowExecutor>) -> Self {
        Self { context, executor }
    }

    /// Starts the loop on its own named thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let name = format!("flowrunner-dispatcher-{}", self.context.engine_id);
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| {
                EngineError::Infrastructure(format!("Failed to start dispatcher thread: {}", e))
            })
    }

    /// Runs until the waiting queue is closed.
    pub fn run(&self) {
        info!("Dispatcher started for engine {}", self.context.engine_id);

        while let Some(descriptor) = self.context.queue.take() {
            if let Some(delay) = self.context.config.dispatch_delay() {
                thread::sleep(delay);
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&descriptor)));
            let failure = match outcome {
                Ok(Ok(Dispatch::Accepted)) => continue,
                Ok(Ok(Dispatch::Rejected)) => {
                    self.context.queue.finish();
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("dispatcher panicked: {}", panic_message(&*payload)),
            };

            self.context.queue.finish();
            error!(
                "Failed to dispatch flow execution {} of flow {}: {}",
                descriptor.execution_id, descriptor.flow_id, failure
            );
            let trace = format!(
                "Engine {} failed to dispatch flow execution {} (flow {}):\n{}",
                self.context.engine_id, descriptor.execution_id, descriptor.flow_id, failure
            );
            if let Err(e) = self.context.notifier.send_serious_error(&trace) {
                error!("Failed to send serious error notice: {}", e);
            }
        }

        info!("Dispatcher stopped for engine {}", self.context.engine_id);
    }

    fn dispatch(&self, descriptor: &ExecutionDescriptor) -> Result<Dispatch> {
        let store = &self.context.store;

        let flow = match store.get_flow(descriptor.flow_id)? {
            Some(flow) => flow,
            None => {
                store.update_execution_status(descriptor.execution_id, ExecutionStatus::Killed)?;
                return Err(EngineError::FlowNotFound(descriptor.flow_id));
            }
        };

        if flow.is_running() {
            warn!(
                "Flow {} is already running, rejecting flow execution {}",
                flow.id, descriptor.execution_id
            );
            store.update_execution_status(
                descriptor.execution_id,
                ExecutionStatus::RejectedDuplicate,
            )?;
            return Ok(Dispatch::Rejected);
        }

        store.update_last_run_status(flow.id, LastRunStatus::Running)?;

        let context = Arc::clone(&self.context);
        let executor = Arc::clone(&self.executor);
        let task_descriptor = descriptor.clone();
        let submitted = self.context.flow_pool.execute(move || {
            run_execution(&context, executor.as_ref(), task_descriptor);
        });

        if let Err(e) = submitted {
            close_outside_state_machine(&self.context, descriptor, ExecutionStatus::Killed, None);
            return Err(e);
        }

        debug!(
            "Flow execution {} of flow {} dispatched",
            descriptor.execution_id, flow.id
        );
        Ok(Dispatch::Accepted)
    }
}

/// Body of one flow-execution task.
fn run_execution(
    context: &Arc<EngineContext>,
    executor: &dyn FlowExecutor,
    descriptor: ExecutionDescriptor,
) {
    let execution_id = descriptor.execution_id;
    let _finished = context.queue.finish_on_drop();
    let _running = context.running.enter(descriptor.clone());

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.run(&descriptor, context)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(format!("executor panicked: {}", panic_message(&*payload))),
    };

    if let Some(message) = &failure {
        error!("Flow execution {} failed: {}", execution_id, message);
    }

    finalize_orphan(context, &descriptor, failure);
    context.release_job_pool(execution_id);
}

/// Ends an execution the executor left unfinished.
fn finalize_orphan(
    context: &Arc<EngineContext>,
    descriptor: &ExecutionDescriptor,
    failure: Option<String>,
) {
    let execution_id = descriptor.execution_id;
    let message = failure
        .unwrap_or_else(|| "Flow execution finished without recording an outcome".to_string());

    match context.store.get_execution(execution_id) {
        Ok(Some(record)) if record.status.is_terminal() => return,
        Ok(Some(_)) => {}
        Ok(None) => {
            release_flow(context, descriptor.flow_id, LastRunStatus::Error);
            return;
        }
        Err(e) => {
            error!("Failed to load flow execution {}: {}", execution_id, e);
            close_outside_state_machine(
                context,
                descriptor,
                ExecutionStatus::Error,
                Some(&message),
            );
            return;
        }
    }

    let service = match context.executions.get(execution_id) {
        Some(service) => service,
        None => match context.store.get_flow(descriptor.flow_id) {
            Ok(Some(flow)) => ExecutionService::get_or_create(execution_id, &flow, context),
            Ok(None) => {
                warn!(
                    "Flow {} vanished during execution {}",
                    descriptor.flow_id, execution_id
                );
                close_outside_state_machine(
                    context,
                    descriptor,
                    ExecutionStatus::Error,
                    Some(&message),
                );
                return;
            }
            Err(e) => {
                error!(
                    "Failed to load flow {} for execution {}: {}",
                    descriptor.flow_id, execution_id, e
                );
                close_outside_state_machine(
                    context,
                    descriptor,
                    ExecutionStatus::Error,
                    Some(&message),
                );
                return;
            }
        },
    };

    if service.pending_status() == EndStatus::Success {
        service.record_error(message);
    }
    service.end();
}

/// Writes a terminal status for an execution that has no state machine and
/// releases the flow's RUNNING claim. Every step is attempted.
fn close_outside_state_machine(
    context: &EngineContext,
    descriptor: &ExecutionDescriptor,
    status: ExecutionStatus,
    message: Option<&str>,
) {
    let execution_id = descriptor.execution_id;

    if let Some(message) = message {
        if let Err(e) = context
            .store
            .append_execution_log(execution_id, LogLevel::Error, message)
        {
            error!("Failed to write log for flow execution {}: {}", execution_id, e);
        }
    }

    if let Err(e) = context.store.update_execution_status(execution_id, status) {
        error!(
            "Failed to persist status of flow execution {}: {}",
            execution_id, e
        );
    }

    let last_run = if status == ExecutionStatus::Killed {
        LastRunStatus::Killed
    } else {
        LastRunStatus::Error
    };
    release_flow(context, descriptor.flow_id, last_run);
}

fn release_flow(context: &EngineContext, flow_id: i64, status: LastRunStatus) {
    if let Err(e) = context.hooks.on_flow_end(flow_id, status) {
        error!("Failed to release flow {}: {}", flow_id, e);
    }
}
