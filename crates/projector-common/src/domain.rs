//! Domain objects carried as activity payloads.
//!
//! These mirror what the upstream activity log emits (camelCase JSON). The
//! projector only ever reads them; fields it does not project are kept so a
//! payload round-trips without loss.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub uuid: String,
    pub organization_uuid: String,
    pub name: String,
    pub public: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub uuid: String,
    pub project_uuid: String,
    pub name: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Environment {
    pub uuid: String,
    pub project_uuid: String,
    pub name: String,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Job {
    pub uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub task_uuid: String,
    pub environment_uuid: String,
    pub project_uuid: String,
    pub archived_at: Option<DateTime<Utc>>,
}

/// A single run of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Operation {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub job_uuid: Option<String>,
    pub exit_status: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub timed_out_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub fatal_error: Option<String>,
}

impl Operation {
    pub fn successful(&self) -> bool {
        self.exit_status == 0
    }

    /// Status derived from the operation's timestamps. Cancellation wins over
    /// timeouts, which win over fatal errors, which win over plain failures.
    pub fn status(&self) -> OperationStatus {
        if self.canceled_at.is_some() {
            return OperationStatus::Canceled;
        }
        if self.timed_out_at.is_some() {
            return OperationStatus::Timeout;
        }
        if self.fatal_error.is_some() {
            return OperationStatus::Fatal;
        }
        if self.failed_at.is_some() {
            return OperationStatus::Failure;
        }
        if self.finished_at.is_none() {
            return OperationStatus::Active;
        }
        if self.successful() {
            OperationStatus::Success
        } else {
            OperationStatus::Failure
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationCanceledByUser {
    pub uuid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Active,
    Success,
    Failure,
    Fatal,
    Canceled,
    Timeout,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Fatal => "fatal",
            Self::Canceled => "canceled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "fatal" => Ok(Self::Fatal),
            "canceled" => Ok(Self::Canceled),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid operation status: {}", s)),
        }
    }
}
