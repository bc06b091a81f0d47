//! Engine Runtime
//!
//! The concurrency core of an engine instance:
//!
//! - [`context`]: Shared resources handed to every component
//! - [`queue`]: Waiting queue (many producers, one consumer)
//! - [`dispatch`]: The dispatch loop and worker task
//! - [`service`]: Per-execution state machine and its arena
//! - [`running`]: Set of executions occupying a worker
//! - [`pool`]: Named thread pools
//! - [`hooks`]: Flow-level and scheduling collaborators

pub mod context;
pub mod dispatch;
pub mod hooks;
pub mod pool;
pub mod queue;
pub mod running;
pub mod service;

pub use context::EngineContext;
pub use dispatch::Dispatcher;
pub use hooks::{FlowHooks, HookResult, ScheduleHook, StoreFlowHooks};
pub use pool::{ThreadPool, ThreadPoolRegistry};
pub use queue::WaitingQueue;
pub use running::RunningSet;
pub use service::{ExecutionArena, ExecutionService};
