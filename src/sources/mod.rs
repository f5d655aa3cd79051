//! Adapters that provide the activity log to the projector.

pub mod sqlite;

use std::sync::Arc;

use anyhow::{Context, Result};
use projector_common::{ActivityStore, InMemoryActivityStore, PayloadRegistry};

pub use sqlite::SqliteActivityStore;

/// Open the activity log named by `database`: `memory://` for an empty
/// in-process log, otherwise a SQLite file (an optional `sqlite://` prefix is
/// accepted).
pub fn open_activity_store(database: &str) -> Result<Arc<dyn ActivityStore>> {
    let database = database.trim();
    if database == "memory://" {
        tracing::info!(activities = "memory", "using in-memory activity log");
        return Ok(Arc::new(InMemoryActivityStore::new()));
    }
    Ok(Arc::new(open_sqlite_store(database)?))
}

/// Open (creating if needed) the SQLite activity log at `database`.
pub fn open_sqlite_store(database: &str) -> Result<SqliteActivityStore> {
    let path = std::path::Path::new(database.strip_prefix("sqlite://").unwrap_or(database));
    if path.as_os_str().is_empty() {
        anyhow::bail!("activity database path is empty");
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let store = SqliteActivityStore::open(path, PayloadRegistry::standard())
        .with_context(|| format!("Failed to open activity log at {}", path.display()))?;
    tracing::info!(activities = %path.display(), "opened sqlite activity log");
    Ok(store)
}
