//! Flow Executors
//!
//! A [`FlowExecutor`] runs one flow execution to completion. The dispatcher
//! calls it on a worker thread and treats any error it returns as a failed
//! run; it never retries.
//!
//! - [`dag`]: Default executor, runs jobs in dependency order
//! - [`plan`]: Job validation and ordering

pub mod dag;
pub mod plan;

use std::error::Error;
use std::sync::Arc;

use crate::model::ExecutionDescriptor;
use crate::runtime::EngineContext;

pub use dag::DagExecutor;
pub use plan::{JobPlan, PlanError};

pub type ExecutorResult = Result<(), Box<dyn Error + Send + Sync>>;

pub trait FlowExecutor: Send + Sync {
    /// Runs the execution.
    ///
    /// Implementations drive the execution's state machine from `begin()` to
    /// `end()`. Work left unfinished is finalized by the caller.
    fn run(&self, descriptor: &ExecutionDescriptor, context: &Arc<EngineContext>)
        -> ExecutorResult;
}
