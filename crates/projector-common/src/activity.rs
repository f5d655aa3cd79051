//! Activities and their typed payloads.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{Environment, Job, Operation, OperationCanceledByUser, Project, Task};

/// An immutable, timestamped domain event.
///
/// `name` follows `${object}.${event}` (e.g. `job.added`) and decides both
/// routing and the shape of `payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    pub occurred_on: DateTime<Utc>,
    pub context_user_uuid: Option<String>,
    pub payload: Payload,
    pub extra: Map<String, Value>,
}

impl Activity {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        occurred_on: DateTime<Utc>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            occurred_on,
            context_user_uuid: None,
            payload,
            extra: Map::new(),
        }
    }
}

/// Payload already resolved to its domain type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Project(Project),
    Task(Task),
    Environment(Environment),
    Job(Job),
    Operation(Operation),
    OperationCanceledByUser(OperationCanceledByUser),
    /// Names without a registered payload kind.
    Raw(Value),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Project(_) => PayloadKind::Project,
            Self::Task(_) => PayloadKind::Task,
            Self::Environment(_) => PayloadKind::Environment,
            Self::Job(_) => PayloadKind::Job,
            Self::Operation(_) => PayloadKind::Operation,
            Self::OperationCanceledByUser(_) => PayloadKind::OperationCanceledByUser,
            Self::Raw(_) => PayloadKind::Raw,
        }
    }

    pub fn as_project(&self) -> Option<&Project> {
        match self {
            Self::Project(project) => Some(project),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    pub fn as_environment(&self) -> Option<&Environment> {
        match self {
            Self::Environment(environment) => Some(environment),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&Job> {
        match self {
            Self::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn as_operation(&self) -> Option<&Operation> {
        match self {
            Self::Operation(operation) => Some(operation),
            _ => None,
        }
    }

    pub fn as_operation_canceled_by_user(&self) -> Option<&OperationCanceledByUser> {
        match self {
            Self::OperationCanceledByUser(canceled) => Some(canceled),
            _ => None,
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Self::Project(p) => serde_json::to_value(p),
            Self::Task(t) => serde_json::to_value(t),
            Self::Environment(e) => serde_json::to_value(e),
            Self::Job(j) => serde_json::to_value(j),
            Self::Operation(o) => serde_json::to_value(o),
            Self::OperationCanceledByUser(c) => serde_json::to_value(c),
            Self::Raw(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Project,
    Task,
    Environment,
    Job,
    Operation,
    OperationCanceledByUser,
    Raw,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::Task => "Task",
            Self::Environment => "Environment",
            Self::Job => "Job",
            Self::Operation => "Operation",
            Self::OperationCanceledByUser => "OperationCanceledByUser",
            Self::Raw => "Raw",
        }
    }

    fn decode(self, value: Value) -> serde_json::Result<Payload> {
        Ok(match self {
            Self::Project => Payload::Project(serde_json::from_value(value)?),
            Self::Task => Payload::Task(serde_json::from_value(value)?),
            Self::Environment => Payload::Environment(serde_json::from_value(value)?),
            Self::Job => Payload::Job(serde_json::from_value(value)?),
            Self::Operation => Payload::Operation(serde_json::from_value(value)?),
            Self::OperationCanceledByUser => {
                Payload::OperationCanceledByUser(serde_json::from_value(value)?)
            }
            Self::Raw => Payload::Raw(value),
        })
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("activity {id} ({name}): payload is not a valid {kind}: {source}")]
    Payload {
        id: i64,
        name: String,
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("activity {id}: extra must be a JSON object")]
    Extra { id: i64 },
}

/// Wire form of an activity: the payload is still untyped JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: i64,
    pub name: String,
    pub occurred_on: DateTime<Utc>,
    #[serde(default)]
    pub context_user_uuid: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl ActivityRecord {
    pub fn from_activity(activity: &Activity) -> serde_json::Result<Self> {
        Ok(Self {
            id: activity.id,
            name: activity.name.clone(),
            occurred_on: activity.occurred_on,
            context_user_uuid: activity.context_user_uuid.clone(),
            payload: activity.payload.to_value()?,
            extra: activity.extra.clone(),
        })
    }
}

/// Maps activity names to the payload kind they carry.
///
/// Built explicitly and passed to whoever decodes activities; there is no
/// process-wide registration.
#[derive(Debug, Clone, Default)]
pub struct PayloadRegistry {
    kinds: HashMap<String, PayloadKind>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry covering every activity the projector consumes.
    pub fn standard() -> Self {
        Self::new()
            .register("project.created", PayloadKind::Project)
            .register("project.deleted", PayloadKind::Project)
            .register("task.added", PayloadKind::Task)
            .register("task.edited", PayloadKind::Task)
            .register("environment.added", PayloadKind::Environment)
            .register("environment.edited", PayloadKind::Environment)
            .register("job.added", PayloadKind::Job)
            .register("job.edited", PayloadKind::Job)
            .register("operation.started", PayloadKind::Operation)
            .register("operation.failed", PayloadKind::Operation)
            .register("operation.failed-fatally", PayloadKind::Operation)
            .register("operation.succeeded", PayloadKind::Operation)
            .register(
                "operation.canceled-by-user",
                PayloadKind::OperationCanceledByUser,
            )
    }

    pub fn register(mut self, name: impl Into<String>, kind: PayloadKind) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    pub fn kind_of(&self, name: &str) -> PayloadKind {
        self.kinds.get(name).copied().unwrap_or(PayloadKind::Raw)
    }

    pub fn decode(&self, record: ActivityRecord) -> Result<Activity, DecodeError> {
        let kind = self.kind_of(&record.name);
        let payload = kind
            .decode(record.payload)
            .map_err(|source| DecodeError::Payload {
                id: record.id,
                name: record.name.clone(),
                kind: kind.as_str(),
                source,
            })?;

        Ok(Activity {
            id: record.id,
            name: record.name,
            occurred_on: record.occurred_on,
            context_user_uuid: record.context_user_uuid,
            payload,
            extra: record.extra,
        })
    }
}
