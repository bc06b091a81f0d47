//! Waiting Queue
//!
//! Unbounded blocking FIFO of execution descriptors. Any thread may push;
//! only the dispatcher takes. A descriptor taken from the queue stays
//! counted as in flight until [`WaitingQueue::finish`] is called for it, so
//! callers can wait for the engine to go idle.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{EngineError, Result};
use crate::model::ExecutionDescriptor;

#[derive(Default)]
struct QueueState {
    items: VecDeque<ExecutionDescriptor>,
    in_flight: usize,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

#[derive(Default)]
pub struct WaitingQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a descriptor.
    pub fn push(&self, descriptor: ExecutionDescriptor) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::ShuttingDown);
        }
        state.items.push_back(descriptor);
        self.available.notify_one();
        Ok(())
    }

    /// Appends a descriptor unless one for the same flow is already waiting.
    ///
    /// Returns `false` when an entry for the flow was found.
    pub fn push_unique(&self, descriptor: ExecutionDescriptor) -> Result<bool> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::ShuttingDown);
        }
        if state.items.iter().any(|d| d.flow_id == descriptor.flow_id) {
            return Ok(false);
        }
        state.items.push_back(descriptor);
        self.available.notify_one();
        Ok(true)
    }

    /// Blocks until a descriptor is available.
    ///
    /// Returns `None` once the queue is closed.
    pub fn take(&self) -> Option<ExecutionDescriptor> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(descriptor) = state.items.pop_front() {
                state.in_flight += 1;
                return Some(descriptor);
            }
            self.available.wait(&mut state);
        }
    }

    /// Marks one taken descriptor as fully handled.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.is_idle() {
            self.idle.notify_all();
        }
    }

    /// Calls [`finish`](Self::finish) when the returned guard drops.
    pub fn finish_on_drop(&self) -> FinishGuard<'_> {
        FinishGuard { queue: self }
    }

    /// Wakes the dispatcher and refuses further pushes.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
        self.idle.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Waits until nothing is queued or in flight. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_idle() {
            if state.closed {
                return false;
            }
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    pub fn contains_flow(&self, flow_id: i64) -> bool {
        self.state.lock().items.iter().any(|d| d.flow_id == flow_id)
    }

    /// Copy of the waiting descriptors, in dispatch order.
    pub fn snapshot(&self) -> Vec<ExecutionDescriptor> {
        self.state.lock().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

pub struct FinishGuard<'a> {
    queue: &'a WaitingQueue,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish();
    }
}
