//! Shell Component
//!
//! Runs a job's `command` property through `bash -c`.
//!
//! Placeholders substituted before execution:
//! - `{flow_id}` - Owning flow id
//! - `{execution_id}` - Current execution id
//! - `{job}` - Job name

use std::path::PathBuf;
use std::process::Command;

use log::{debug, error};

use super::{Component, ComponentDefinition, ComponentResult};
use crate::model::Job;
use crate::runtime::service::ExecutionService;

/// Captured output is cut to this many bytes before logging.
const MAX_LOGGED_OUTPUT: usize = 4096;

#[derive(Debug, Default)]
pub struct ShellComponent {
    shell: String,
}

impl ShellComponent {
    pub fn new() -> Self {
        Self {
            shell: "bash".to_string(),
        }
    }

    /// Uses a different shell binary (must accept `-c`).
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Component for ShellComponent {
    fn definition(&self) -> ComponentDefinition {
        ComponentDefinition::new("shell", "Runs a shell command")
            .with_property("command", true, "Command line passed to the shell")
            .with_property("working_dir", false, "Directory the command runs in")
    }

    fn run(&self, job: &Job, execution: &ExecutionService) -> ComponentResult {
        let command = job
            .property("command")
            .ok_or_else(|| format!("Job '{}' has no command", job.name))?;
        let command_text = resolve_placeholders(command, job, execution.execution_id());

        let mut process = Command::new(&self.shell);
        process.arg("-c").arg(&command_text);
        if let Some(dir) = job.property("working_dir") {
            process.current_dir(PathBuf::from(dir));
        }

        debug!("Job '{}' running: {}", job.name, command_text);

        let output = process
            .output()
            .map_err(|e| format!("Job '{}' could not start '{}': {}", job.name, self.shell, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            execution.add_info(format!("[{}] {}", job.name, truncate(stdout.trim())));
        }

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            "Job '{}' failed with exit code: {:?}",
            job.name,
            output.status.code()
        );

        let mut message = format!(
            "Job '{}' exited with code {:?}",
            job.name,
            output.status.code()
        );
        if !stderr.trim().is_empty() {
            message.push_str(": ");
            message.push_str(truncate(stderr.trim()));
        }
        Err(message.into())
    }
}

fn resolve_placeholders(command: &str, job: &Job, execution_id: i64) -> String {
    command
        .replace("{flow_id}", &job.flow_id.to_string())
        .replace("{execution_id}", &execution_id.to_string())
        .replace("{job}", &job.name)
}

fn truncate(text: &str) -> &str {
    if text.len() <= MAX_LOGGED_OUTPUT {
        return text;
    }
    let mut end = MAX_LOGGED_OUTPUT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowDefinition, JobDefinition, LogLevel};
    use crate::store::Store;
    use crate::testing::TestHarness;

    fn shell_job(command: &str) -> Job {
        Job::from_definition(
            1,
            42,
            &JobDefinition::new("step", "shell").with_property("command", command),
        )
    }

    #[test]
    fn test_placeholders_resolved() {
        let job = shell_job("echo {flow_id} {execution_id} {job}");
        assert_eq!(
            resolve_placeholders(job.property("command").unwrap(), &job, 7),
            "echo 42 7 step"
        );
    }

    #[test]
    fn test_successful_command_logs_output() {
        let harness = TestHarness::new();
        let (flow, execution_id) = harness.flow_with_execution(FlowDefinition::new("shell-test"));
        let service = harness.service(execution_id, &flow);

        ShellComponent::new()
            .run(&shell_job("echo hello"), &service)
            .unwrap();

        let logs = harness.store.execution_logs(execution_id).unwrap();
        assert!(logs
            .iter()
            .any(|l| l.level == LogLevel::Info && l.message.contains("hello")));
    }

    #[test]
    fn test_failing_command_reports_stderr() {
        let harness = TestHarness::new();
        let (flow, execution_id) = harness.flow_with_execution(FlowDefinition::new("shell-test"));
        let service = harness.service(execution_id, &flow);

        let err = ShellComponent::new()
            .run(&shell_job("echo broken >&2; exit 3"), &service)
            .unwrap_err();

        assert!(err.to_string().contains("broken"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_missing_command_property() {
        let harness = TestHarness::new();
        let (flow, execution_id) = harness.flow_with_execution(FlowDefinition::new("shell-test"));
        let service = harness.service(execution_id, &flow);
        let job = Job::from_definition(1, flow.id, &JobDefinition::new("empty", "shell"));

        assert!(ShellComponent::new().run(&job, &service).is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "é".repeat(MAX_LOGGED_OUTPUT);
        let cut = truncate(&text);
        assert!(cut.len() <= MAX_LOGGED_OUTPUT);
        assert!(text.starts_with(cut));
    }
}
