//! Monitoring Module
//!
//! - [`Heartbeat`]: Liveness monitor over the waiting queue and running set
//! - [`ResourceMonitor`]: CPU and memory usage of the engine process

pub mod heartbeat;
pub mod resource;

pub use heartbeat::{Heartbeat, HeartbeatReport};
pub use resource::{ResourceMonitor, ResourceSample};
