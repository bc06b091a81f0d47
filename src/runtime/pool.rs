//! Named Thread Pools
//!
//! Fixed-size pools of named worker threads fed over an mpsc channel.
//! A panicking task is caught and logged; the worker keeps serving.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error};
use parking_lot::Mutex;

use crate::error::{EngineError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns `size` workers named `{name}-{n}`.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| {
                    EngineError::Infrastructure(format!(
                        "Failed to spawn thread for pool '{}': {}",
                        name, e
                    ))
                })?;
            workers.push(handle);
        }

        debug!("Thread pool '{}' started with {} workers", name, size);

        Ok(Self {
            name,
            size,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues a task. Fails after [`shutdown`](Self::shutdown).
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(task))
                .map_err(|_| EngineError::ShuttingDown),
            None => Err(EngineError::ShuttingDown),
        }
    }

    /// Stops accepting tasks, lets queued ones finish and joins the workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker of pool '{}' panicked", self.name);
            }
        }
        debug!("Thread pool '{}' stopped", self.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Arc<Mutex<Receiver<Task>>>) {
    loop {
        let task = receiver.lock().recv();
        match task {
            Ok(task) => {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                    let name = thread::current().name().unwrap_or("worker").to_string();
                    error!("Task on '{}' panicked: {}", name, panic_message(&*panic));
                }
            }
            Err(_) => break,
        }
    }
}

/// Text carried by a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pools keyed by name. Creating an existing name returns the live pool.
#[derive(Default)]
pub struct ThreadPoolRegistry {
    pools: DashMap<String, Arc<ThreadPool>>,
}

impl ThreadPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str, size: usize) -> Result<Arc<ThreadPool>> {
        match self.pools.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let pool = Arc::new(ThreadPool::new(name, size)?);
                entry.insert(Arc::clone(&pool));
                Ok(pool)
            }
        }
    }

    /// Detaches a pool and shuts it down.
    pub fn remove(&self, name: &str) {
        if let Some((_, pool)) = self.pools.remove(name) {
            pool.shutdown();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn shutdown_all(&self) {
        let names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.remove(&name);
        }
    }
}
