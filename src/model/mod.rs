//! Flow and Execution Model
//!
//! Plain data shared by the store, the dispatcher and the executor.
//!
//! - [`flow`]: Flow and job definitions and their persisted forms
//! - [`execution`]: Execution descriptors, records and statuses

pub mod flow;
pub mod execution;

pub use execution::{
    EndStatus, ExecutionDescriptor, ExecutionLogEntry, ExecutionRecord, ExecutionStatus,
    LogLevel, TriggerType,
};
pub use flow::{
    split_recipients, Flow, FlowDefinition, Job, JobDefinition, LastRunStatus, SchedulingStatus,
};
