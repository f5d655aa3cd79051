//! CLI command implementations.
//!
//! | Module    | Commands handled                 |
//! |-----------|----------------------------------|
//! | `serve`   | `Serve`                          |
//! | `update`  | `Update`                         |
//! | `show`    | `Show organization`, `Show card` |
//! | `ingest`  | `Ingest`                         |
//! | `config`  | `Config`                         |

pub mod config;
pub mod ingest;
pub mod serve;
pub mod show;
pub mod update;

use std::sync::Arc;

use anyhow::Result;
use projector::config::ProjectorConfig;
use projector::index::open_index;
use projector::projections::standard_handlers;
use projector::sources::open_activity_store;
use projector::{ActivityStore, Projector};

pub use config::cmd_config;
pub use ingest::cmd_ingest;
pub use serve::cmd_serve;
pub use show::cmd_show;
pub use update::cmd_update;

/// Projector over the configured index, with the configured handler policy.
fn open_projector(config: &ProjectorConfig) -> Result<Arc<Projector>> {
    let index = open_index(&config.storage.url)?;
    let handler = standard_handlers()
        .with_status_interval(config.projector.status_interval)
        .with_invariant_policy(config.projector.on_invariant_violation);
    Ok(Arc::new(Projector::with_handler(index, handler)))
}

fn open_activities(config: &ProjectorConfig) -> Result<Arc<dyn ActivityStore>> {
    open_activity_store(&config.activities.database)
}
