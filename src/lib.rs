//! FlowRunner - Workflow Execution Engine
//!
//! Queues flow runs, guards each flow against concurrent duplicate runs and
//! dispatches accepted runs onto bounded worker pools. Every run is tracked
//! through a small state machine that persists its outcome, mails failure
//! notices and pauses a flow's schedule once enough of its most recent runs
//! have ended in error.
//!
//! # Architecture
//!
//! - [`config`]: Engine configuration loaded from YAML
//! - [`model`]: Flows, jobs, executions and their statuses
//! - [`store`]: Persistence contract with SQLite and in-memory backends
//! - [`runtime`]: Waiting queue, dispatch loop, worker pools, state machine
//! - [`executor`]: Flow executors, including the default DAG executor
//! - [`component`]: Job component registry and the built-in shell component
//! - [`notify`]: Operator notices
//! - [`monitoring`]: Heartbeat and process resource sampling
//! - [`engine`]: The engine instance and its flow-management API
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use flowrunner::{Engine, EngineConfig, FlowDefinition, JobDefinition};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(EngineConfig::in_memory())?;
//!     let flow_id = engine
//!         .add_flow(
//!             &FlowDefinition::new("hello"),
//!             &[JobDefinition::new("greet", "shell").with_property("command", "echo hi")],
//!         )
//!         .ok_or("flow was not added")?;
//!
//!     engine.start_process(flow_id)?;
//!     engine.wait_idle(Duration::from_secs(30));
//!     Ok(())
//! }
//! ```

pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod monitoring;
pub mod notify;
pub mod runtime;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{DataSourceConfig, EngineConfig, InitLevel, MailConfig};
pub use engine::{Engine, EngineBuilder, EngineRegistry};
pub use error::{EngineError, NotifyError, Result, StoreError};
pub use model::{
    ExecutionDescriptor, ExecutionRecord, ExecutionStatus, Flow, FlowDefinition, JobDefinition,
    LastRunStatus, SchedulingStatus, TriggerType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";
