//! Flow Data Model
//!
//! A flow is a DAG of jobs plus its scheduling metadata.
//!
//! # Example YAML Format
//!
//! ```yaml
//! flow:
//!   name: nightly-report
//!   cron: "0 0 2 * * *"
//!   pause_continuous_failure: 3
//!   email_continuous_failure: owner@example.com,ops@example.com
//!   callback_email: owner@example.com
//! jobs:
//!   - name: extract
//!     component: shell
//!     properties:
//!       command: ./extract.sh
//!   - name: publish
//!     component: shell
//!     previous: [extract]
//!     properties:
//!       command: ./publish.sh
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Status of the most recent run of a flow, cached on the flow itself.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LastRunStatus {
    Running,
    Success,
    Error,
    Killed,
}

/// Whether a flow's cron schedule is active.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulingStatus {
    Scheduling,
    Paused,
    /// Flow has no cron expression and only runs when triggered
    NotSet,
}

macro_rules! impl_status_text {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StoreError::Invalid(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use impl_status_text;

impl_status_text!(LastRunStatus {
    Running => "RUNNING",
    Success => "SUCCESS",
    Error => "ERROR",
    Killed => "KILLED",
});

impl_status_text!(SchedulingStatus {
    Scheduling => "SCHEDULING",
    Paused => "PAUSED",
    NotSet => "NOT_SET",
});

/// Request to create a flow.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FlowDefinition {
    pub name: String,

    /// Cron expression (seconds field first); blank means manual-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Pause the schedule after this many recent failures (0 disables)
    #[serde(default)]
    pub pause_continuous_failure: u32,

    /// Comma-separated recipients of the continuous-failure notice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_continuous_failure: Option<String>,

    /// Comma-separated recipients of per-run failure notices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_user: Option<String>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            ..Default::default()
        }
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }

    pub fn with_pause_threshold(mut self, threshold: u32) -> Self {
        self.pause_continuous_failure = threshold;
        self
    }

    pub fn with_failure_email(mut self, recipients: impl Into<String>) -> Self {
        self.email_continuous_failure = Some(recipients.into());
        self
    }

    pub fn with_callback_email(mut self, recipients: impl Into<String>) -> Self {
        self.callback_email = Some(recipients.into());
        self
    }

    /// The cron expression, if one is set and not blank.
    pub fn cron_expression(&self) -> Option<&str> {
        self.cron.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// Request to create one job of a flow.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct JobDefinition {
    pub name: String,

    /// Component that executes the job (e.g. "shell")
    pub component: String,

    /// Names of jobs that must succeed first
    #[serde(default)]
    pub previous: Vec<String>,

    /// Component-specific settings
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            component: component.into().trim().to_string(),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, job: impl Into<String>) -> Self {
        self.previous.push(job.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A persisted flow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Flow {
    pub id: i64,
    pub name: String,
    pub cron: Option<String>,
    /// None until the flow has run at least once
    pub last_run_status: Option<LastRunStatus>,
    pub scheduling_status: SchedulingStatus,
    pub pause_continuous_failure: u32,
    pub email_continuous_failure: Option<String>,
    pub callback_email: Option<String>,
    pub create_user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Builds the persisted form of a definition.
    pub fn from_definition(
        id: i64,
        definition: &FlowDefinition,
        scheduling_status: SchedulingStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: definition.name.clone(),
            cron: definition.cron_expression().map(str::to_string),
            last_run_status: None,
            scheduling_status,
            pause_continuous_failure: definition.pause_continuous_failure,
            email_continuous_failure: definition.email_continuous_failure.clone(),
            callback_email: definition.callback_email.clone(),
            create_user: definition.create_user.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.last_run_status == Some(LastRunStatus::Running)
    }

    /// Recipients for per-run failure notices.
    pub fn callback_recipients(&self) -> Vec<String> {
        split_recipients(self.callback_email.as_deref())
    }

    /// Recipients for the continuous-failure notice.
    pub fn failure_recipients(&self) -> Vec<String> {
        split_recipients(self.email_continuous_failure.as_deref())
    }
}

/// A persisted job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub flow_id: i64,
    pub name: String,
    pub component: String,
    pub previous: Vec<String>,
    pub properties: Map<String, Value>,
}

impl Job {
    pub fn from_definition(id: i64, flow_id: i64, definition: &JobDefinition) -> Self {
        Self {
            id,
            flow_id,
            name: definition.name.clone(),
            component: definition.component.clone(),
            previous: definition.previous.clone(),
            properties: definition.properties.clone(),
        }
    }

    /// Reads a string property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Splits a comma-separated address list, dropping blanks.
pub fn split_recipients(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_roundtrip() {
        for status in [
            LastRunStatus::Running,
            LastRunStatus::Success,
            LastRunStatus::Error,
            LastRunStatus::Killed,
        ] {
            assert_eq!(status.as_str().parse::<LastRunStatus>().unwrap(), status);
        }
        assert_eq!(
            "NOT_SET".parse::<SchedulingStatus>().unwrap(),
            SchedulingStatus::NotSet
        );
    }

    #[test]
    fn test_unknown_status_is_invalid() {
        let err = "SLEEPING".parse::<LastRunStatus>().unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn test_blank_cron_is_none() {
        assert_eq!(FlowDefinition::new("a").with_cron("   ").cron_expression(), None);
        assert_eq!(
            FlowDefinition::new("a").with_cron(" 0 * * * * * ").cron_expression(),
            Some("0 * * * * *")
        );
    }

    #[test]
    fn test_split_recipients() {
        assert_eq!(
            split_recipients(Some(" a@x.com, ,b@x.com ")),
            vec!["a@x.com", "b@x.com"]
        );
        assert!(split_recipients(None).is_empty());
        assert!(split_recipients(Some("  ")).is_empty());
    }

    #[test]
    fn test_flow_from_definition() {
        let definition = FlowDefinition::new("report")
            .with_cron("0 0 2 * * *")
            .with_pause_threshold(3)
            .with_failure_email("owner@example.com");
        let flow = Flow::from_definition(5, &definition, SchedulingStatus::Scheduling);

        assert_eq!(flow.id, 5);
        assert_eq!(flow.pause_continuous_failure, 3);
        assert!(flow.last_run_status.is_none());
        assert!(!flow.is_running());
        assert_eq!(flow.failure_recipients(), vec!["owner@example.com"]);
        assert!(flow.callback_recipients().is_empty());
    }

    #[test]
    fn test_flow_file_yaml() {
        let yaml = r#"
name: build
component: shell
previous: [fetch]
properties:
  command: make
"#;
        let job: JobDefinition = serde_yaml::from_str(yaml).unwrap();
        let job = Job::from_definition(1, 2, &job);

        assert_eq!(job.previous, vec!["fetch"]);
        assert_eq!(job.property("command"), Some("make"));
        assert_eq!(job.property("missing"), None);
    }
}
