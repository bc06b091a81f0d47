//! DAG Executor
//!
//! Runs a flow's jobs on the execution's job pool. Each job starts once
//! every job it depends on has completed; completions come back over an
//! mpsc channel. The first job failure is recorded as the execution error
//! and no further jobs are started. A kill stops scheduling too; jobs
//! already running are allowed to finish.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::channel;
use std::sync::Arc;

use log::{debug, error, info};

use super::plan::JobPlan;
use super::{ExecutorResult, FlowExecutor};
use crate::error::EngineError;
use crate::model::ExecutionDescriptor;
use crate::runtime::pool::panic_message;
use crate::runtime::{EngineContext, ExecutionService};

#[derive(Debug, Default, Clone, Copy)]
pub struct DagExecutor;

impl DagExecutor {
    pub fn new() -> Self {
        Self
    }

    fn run_jobs(&self, service: &Arc<ExecutionService>, context: &Arc<EngineContext>) -> ExecutorResult {
        let flow_id = service.flow().id;
        let execution_id = service.execution_id();

        let jobs = context.store.get_jobs(flow_id)?;
        let mut plan = JobPlan::build(jobs, &context.components)?;
        if plan.is_empty() {
            service.add_info("flow has no jobs");
            return Ok(());
        }

        let pool = context.job_pool(execution_id)?;
        let (tx, rx) = channel::<(String, Result<(), String>)>();
        let mut running = 0usize;
        let mut failure: Option<String> = None;

        info!(
            "Flow execution {} running {} jobs (job pool size: {})",
            execution_id,
            plan.len(),
            pool.size()
        );

        loop {
            if failure.is_none() && !service.is_killed() {
                for job in plan.ready() {
                    let component = context.components.get(&job.component).ok_or_else(|| {
                        format!("Job '{}' uses unknown component '{}'", job.name, job.component)
                    })?;

                    plan.mark_started(&job.name);
                    service.add_info(format!("job '{}' started", job.name));
                    debug!("Starting job '{}' of execution {}", job.name, execution_id);

                    let tx = tx.clone();
                    let service = Arc::clone(service);
                    pool.execute(move || {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            component.run(&job, &service)
                        }))
                        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
                        .map_err(|e| e.to_string());

                        if let Err(e) = tx.send((job.name.clone(), result)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    })?;
                    running += 1;
                }
            }

            if running == 0 {
                break;
            }

            let (name, result) = rx
                .recv()
                .map_err(|e| format!("Failed to receive job completion: {}", e))?;
            running -= 1;

            match result {
                Ok(()) => {
                    plan.mark_completed(&name);
                    service.add_info(format!("job '{}' finished", name));
                }
                Err(e) => {
                    error!("Job '{}' of execution {} failed: {}", name, execution_id, e);
                    service.add_error(format!("job '{}' failed: {}", name, e));
                    if failure.is_none() {
                        failure = Some(format!("Job '{}' failed: {}", name, e));
                    }
                }
            }
        }

        if let Some(message) = failure {
            return Err(message.into());
        }
        if !service.is_killed() && !plan.is_complete() {
            return Err("Flow execution stopped before all jobs ran".into());
        }
        Ok(())
    }
}

impl FlowExecutor for DagExecutor {
    fn run(
        &self,
        descriptor: &ExecutionDescriptor,
        context: &Arc<EngineContext>,
    ) -> ExecutorResult {
        let flow = context
            .store
            .get_flow(descriptor.flow_id)?
            .ok_or(EngineError::FlowNotFound(descriptor.flow_id))?;

        let service = ExecutionService::get_or_create(descriptor.execution_id, &flow, context);
        service.begin();

        if let Err(e) = self.run_jobs(&service, context) {
            if !service.is_killed() {
                service.record_error(e.to_string());
            }
        }

        context.release_job_pool(descriptor.execution_id);
        service.end();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionStatus, FlowDefinition, JobDefinition, LogLevel};
    use crate::store::Store;
    use crate::testing::TestHarness;

    fn shell(name: &str, command: &str) -> JobDefinition {
        JobDefinition::new(name, "shell").with_property("command", command)
    }

    #[test]
    fn test_runs_jobs_in_order() {
        let harness = TestHarness::new();
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.txt");
        let trace = trace.display();

        let (flow_id, descriptor) = harness.queued_flow(
            FlowDefinition::new("ordered"),
            &[
                shell("second", &format!("echo second >> {}", trace)).depends_on("first"),
                shell("first", &format!("echo first >> {}", trace)),
            ],
        );

        DagExecutor::new().run(&descriptor, &harness.context).unwrap();

        assert_eq!(harness.execution_status(descriptor.execution_id), ExecutionStatus::Success);
        let written = std::fs::read_to_string(dir.path().join("trace.txt")).unwrap();
        assert_eq!(written, "first\nsecond\n");
        assert!(!harness.context.executions.contains(descriptor.execution_id));
        assert!(harness.context.job_pools.is_empty());
        assert!(harness.store.get_flow(flow_id).unwrap().is_some());
    }

    #[test]
    fn test_job_failure_stops_downstream() {
        let harness = TestHarness::new();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("downstream.txt");

        let (_, descriptor) = harness.queued_flow(
            FlowDefinition::new("failing"),
            &[
                shell("broken", "exit 4"),
                shell("after", &format!("touch {}", marker.display())).depends_on("broken"),
            ],
        );

        DagExecutor::new().run(&descriptor, &harness.context).unwrap();

        assert_eq!(harness.execution_status(descriptor.execution_id), ExecutionStatus::Error);
        assert!(!marker.exists());
        let logs = harness.store.execution_logs(descriptor.execution_id).unwrap();
        assert!(logs
            .iter()
            .any(|l| l.level == LogLevel::Error && l.message.contains("broken")));
    }

    #[test]
    fn test_invalid_plan_recorded_as_error() {
        let harness = TestHarness::new();
        let (_, descriptor) = harness.queued_flow(
            FlowDefinition::new("cyclic"),
            &[
                shell("a", "true").depends_on("b"),
                shell("b", "true").depends_on("a"),
            ],
        );

        DagExecutor::new().run(&descriptor, &harness.context).unwrap();

        assert_eq!(harness.execution_status(descriptor.execution_id), ExecutionStatus::Error);
        let logs = harness.store.execution_logs(descriptor.execution_id).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("Cyclic")));
    }

    #[test]
    fn test_kill_before_start_runs_nothing() {
        let harness = TestHarness::new();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran.txt");

        let (flow_id, descriptor) = harness.queued_flow(
            FlowDefinition::new("killed"),
            &[shell("a", &format!("touch {}", marker.display()))],
        );
        let flow = harness.store.get_flow(flow_id).unwrap().unwrap();
        ExecutionService::get_or_create(descriptor.execution_id, &flow, &harness.context)
            .record_killed();

        DagExecutor::new().run(&descriptor, &harness.context).unwrap();

        assert_eq!(harness.execution_status(descriptor.execution_id), ExecutionStatus::Killed);
        assert!(!marker.exists());
    }

    #[test]
    fn test_missing_flow_is_an_error() {
        let harness = TestHarness::new();
        let descriptor = ExecutionDescriptor::new(404, 1, ExecutionStatus::Waiting);

        assert!(DagExecutor::new().run(&descriptor, &harness.context).is_err());
    }
}
