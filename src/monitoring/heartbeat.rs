//! Liveness Monitor
//!
//! A background thread that, once per interval, copies the waiting queue
//! and the running set, samples process resources and stamps a heartbeat
//! on every running execution. Both collections are read through short
//! snapshot calls and never modified.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::resource::ResourceMonitor;
use crate::error::{EngineError, Result};
use crate::model::ExecutionDescriptor;
use crate::runtime::EngineContext;

/// What one heartbeat saw.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatReport {
    pub engine_id: String,
    pub at: DateTime<Utc>,
    pub waiting: Vec<ExecutionDescriptor>,
    pub running: Vec<ExecutionDescriptor>,
    pub cpu_usage: Option<f32>,
    pub memory_mb: Option<u64>,
}

pub struct Heartbeat {
    latest: Arc<RwLock<Option<HeartbeatReport>>>,
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    /// Starts the monitor thread.
    pub fn start(context: Arc<EngineContext>, interval: Duration) -> Result<Self> {
        let latest = Arc::new(RwLock::new(None));
        let (stop_tx, stop_rx) = channel::<()>();

        let report_slot = Arc::clone(&latest);
        let handle = thread::Builder::new()
            .name(format!("flowrunner-heartbeat-{}", context.engine_id))
            .spawn(move || {
                let mut resources = ResourceMonitor::new();
                loop {
                    let report = beat(&context, resources.as_mut());
                    *report_slot.write() = Some(report);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Heartbeat stopped for engine {}", context.engine_id);
            })
            .map_err(|e| {
                EngineError::Infrastructure(format!("Failed to start heartbeat thread: {}", e))
            })?;

        Ok(Self {
            latest,
            stop: Mutex::new(Some(stop_tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The most recent report, if a beat has happened.
    pub fn latest(&self) -> Option<HeartbeatReport> {
        self.latest.read().clone()
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(&self) {
        self.stop.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Takes one heartbeat.
pub fn beat(context: &EngineContext, resources: Option<&mut ResourceMonitor>) -> HeartbeatReport {
    let at = Utc::now();
    let waiting = context.queue.snapshot();
    let running = context.running.snapshot();

    let sample = resources.and_then(|monitor| {
        monitor.sample();
        monitor.latest().cloned()
    });

    let running_ids: Vec<i64> = running.iter().map(|d| d.execution_id).collect();
    if !running_ids.is_empty() {
        if let Err(e) = context.store.record_heartbeat(&running_ids, at) {
            error!("Failed to record heartbeat: {}", e);
        }
    }

    debug!(
        "Heartbeat: {} waiting, {} running",
        waiting.len(),
        running.len()
    );

    HeartbeatReport {
        engine_id: context.engine_id.clone(),
        at,
        waiting,
        running,
        cpu_usage: sample.as_ref().map(|s| s.cpu_usage),
        memory_mb: sample.as_ref().map(|s| s.memory_mb),
    }
}
