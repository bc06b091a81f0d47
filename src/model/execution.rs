//! Flow Execution Data Model

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::flow::{impl_status_text, LastRunStatus};
use crate::error::StoreError;

/// Persisted status of a single flow execution.
///
/// Terminal values are never revised once written.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Queued, not yet dispatched
    Waiting,
    Running,
    Success,
    Error,
    Killed,
    /// Dropped because the flow was already running when dequeued
    RejectedDuplicate,
}

impl_status_text!(ExecutionStatus {
    Waiting => "WAITING",
    Running => "RUNNING",
    Success => "SUCCESS",
    Error => "ERROR",
    Killed => "KILLED",
    RejectedDuplicate => "REJECTED_DUPLICATE",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Killed | Self::RejectedDuplicate
        )
    }
}

/// How an execution came to be queued.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    Retry,
    Schedule,
}

impl_status_text!(TriggerType {
    Manual => "MANUAL",
    Retry => "RETRY",
    Schedule => "SCHEDULE",
});

/// Terminal outcome pending on a live execution, applied by `end()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndStatus {
    Success,
    Error,
    Killed,
}

impl EndStatus {
    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Success => ExecutionStatus::Success,
            Self::Error => ExecutionStatus::Error,
            Self::Killed => ExecutionStatus::Killed,
        }
    }

    pub fn last_run_status(&self) -> LastRunStatus {
        match self {
            Self::Success => LastRunStatus::Success,
            Self::Error => LastRunStatus::Error,
            Self::Killed => LastRunStatus::Killed,
        }
    }
}

/// Lightweight reference to one queued or running execution.
///
/// Two descriptors are equal when they name the same execution, whatever
/// status snapshot they carry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionDescriptor {
    pub flow_id: i64,
    pub execution_id: i64,
    pub status: ExecutionStatus,
}

impl ExecutionDescriptor {
    pub fn new(flow_id: i64, execution_id: i64, status: ExecutionStatus) -> Self {
        Self {
            flow_id,
            execution_id,
            status,
        }
    }
}

impl PartialEq for ExecutionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.execution_id == other.execution_id
    }
}

impl Eq for ExecutionDescriptor {}

impl Hash for ExecutionDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.execution_id.hash(state);
    }
}

/// A persisted execution row.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub flow_id: i64,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub retry_number: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn descriptor(&self) -> ExecutionDescriptor {
        ExecutionDescriptor::new(self.flow_id, self.id, self.status)
    }
}

/// Severity of an execution log line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Error,
}

impl_status_text!(LogLevel {
    Info => "INFO",
    Error => "ERROR",
});

/// One line of an execution's own log, kept beside the execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionLogEntry {
    pub execution_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
