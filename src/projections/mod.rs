//! Projection handlers, one per read model.
//!
//! ## Module Map
//!
//! ```text
//!  Projector::update()
//!        │  every activity, in occurred_on order
//!        v
//!  broadcast.rs  (BroadcastHandler: counters, failure isolation)
//!        │  same transaction, registration order
//!        ├─> projects.rs       project.created                 → Project
//!        ├─> tasks.rs          task.added / task.edited        → Task
//!        ├─> environments.rs   environment.added / .edited     → Environment
//!        ├─> jobs.rs           job.added / job.edited          → Job (denormalized names)
//!        ├─> operations.rs     operation.started               → Operation (join cache)
//!        └─> project_cards.rs  project.* / operation.*         → Organization + ProjectCard
//! ```
//!
//! Handlers keep no state between calls; everything they know lives in the
//! index. Later handlers may read what earlier handlers wrote for the same
//! activity (ProjectCards relies on Operations having cached the operation).

pub mod broadcast;
pub mod environments;
pub mod jobs;
pub mod operations;
pub mod project_cards;
pub mod projects;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

use projector_common::Activity;

use crate::errors::HandlerError;
use crate::index::IndexTransaction;

pub use broadcast::{BroadcastHandler, BroadcastStats, InvariantPolicy};
pub use environments::{Environment, Environments};
pub use jobs::{Job, Jobs};
pub use operations::{Operation, Operations};
pub use project_cards::{Organization, ProjectCard, ProjectCards, project_card_key};
pub use projects::{Project, Projects};
pub use tasks::{Task, Tasks};

/// A read model fed by a fixed set of activity names.
pub trait ActivityHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn subscribed_to(&self) -> &'static [&'static str];

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError>;
}

/// The standard handler set in dispatch order.
pub fn standard_handlers() -> BroadcastHandler {
    BroadcastHandler::new()
        .add(Projects)
        .add(Tasks)
        .add(Environments)
        .add(Jobs)
        .add(Operations)
        .add(ProjectCards)
}
