//! Resource Usage Monitoring
//!
//! Samples CPU and memory of the engine process for the heartbeat.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// Samples kept for averages; older ones are dropped.
const SAMPLE_WINDOW: usize = 360;

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    /// Memory usage in megabytes
    pub memory_mb: u64,
}

/// Monitors resource usage of the current process.
pub struct ResourceMonitor {
    system: System,
    process_id: Pid,
    samples: VecDeque<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    /// Creates a monitor for the current process.
    ///
    /// Returns `None` on platforms where the process id is unavailable.
    pub fn new() -> Option<Self> {
        let process_id = get_current_pid().ok()?;
        Some(Self {
            system: System::new(),
            process_id,
            samples: VecDeque::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        })
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a sample and returns it.
    ///
    /// The first call only warms up CPU accounting and returns `None`, as do
    /// calls closer together than `min_interval`.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return None;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return None;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        let process = self.system.process(self.process_id)?;
        let sample = ResourceSample {
            timestamp: now,
            cpu_usage: process.cpu_usage(),
            memory_mb: process.memory() / (1024 * 1024),
        };

        if self.samples.len() == SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample.clone());
        Some(sample)
    }

    pub fn latest(&self) -> Option<&ResourceSample> {
        self.samples.back()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Peak memory in MB over the kept samples.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    /// Average CPU usage over the kept samples.
    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    /// Returns a human-readable summary of resource usage.
    pub fn summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }
        format!(
            "Average CPU: {:.1}%, Peak Memory: {} MB, Samples: {}",
            self.average_cpu(),
            self.peak_memory_mb(),
            self.samples.len()
        )
    }
}
