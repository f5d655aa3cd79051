//! Shared domain types for the activity projector.
//!
//! - [`domain`]: payload objects as emitted by the activity log
//! - [`activity`]: [`Activity`], typed [`Payload`]s and the [`PayloadRegistry`]
//! - [`store`]: the [`ActivityStore`] read contract and an in-memory log

pub mod activity;
pub mod domain;
pub mod store;

pub use activity::{Activity, ActivityRecord, DecodeError, Payload, PayloadKind, PayloadRegistry};
pub use domain::OperationStatus;
pub use store::{ActivityStore, InMemoryActivityStore, Visit};
