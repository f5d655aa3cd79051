//! Activity projector: replays the activity log into denormalized read models
//! (projects, tasks, environments, jobs, operations and per-organization
//! project cards) and serves them over HTTP.

pub mod config;
pub mod errors;
pub mod index;
pub mod logging;
pub mod projections;
pub mod projector;
pub mod server;
pub mod sources;

pub use errors::{HandlerError, IndexError, ProjectorError};
pub use crate::projector::{Projector, UpdateSummary, Version};
pub use projector_common::{
    Activity, ActivityRecord, ActivityStore, InMemoryActivityStore, OperationStatus, Payload,
    PayloadKind, PayloadRegistry,
};
