//! `projector ingest`: append JSON-lines activities to the activity log.

use std::path::Path;

use anyhow::{Context, Result, bail};
use projector::config::ProjectorConfig;
use projector::sources::open_sqlite_store;
use projector::{ActivityRecord, PayloadRegistry};
use tracing::info;

pub fn cmd_ingest(config: &ProjectorConfig, file: &Path) -> Result<()> {
    if config.activities.database.trim() == "memory://" {
        bail!("Cannot ingest into an in-memory activity log; set activities.database to a file");
    }
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let registry = PayloadRegistry::standard();
    let mut records = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: ActivityRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not a valid activity", file.display(), number + 1))?;
        // Reject payloads the projector could not decode later.
        registry
            .decode(record.clone())
            .with_context(|| format!("{}:{}", file.display(), number + 1))?;
        records.push(record);
    }

    let store = open_sqlite_store(&config.activities.database)?;
    store
        .append_records(&records)
        .with_context(|| format!("Nothing ingested from {}", file.display()))?;

    info!(count = records.len(), file = %file.display(), "ingested activities");
    println!(
        "Ingested {} activities into {}",
        records.len(),
        config.activities.database
    );
    Ok(())
}
