//! `projector update`: one catch-up pass.

use anyhow::{Context, Result};
use projector::Version;
use projector::config::ProjectorConfig;

use super::{open_activities, open_projector};

pub fn cmd_update(config: &ProjectorConfig) -> Result<()> {
    let projector = open_projector(config)?;
    let activities = open_activities(config)?;

    let summary = projector
        .update(activities.as_ref())
        .context("Catch-up pass failed")?;

    if summary.version == Version::default().0 {
        println!("Applied {} activities; nothing projected yet", summary.applied);
    } else {
        println!(
            "Applied {} activities; version is now {}",
            summary.applied,
            summary.version.to_rfc3339()
        );
    }
    Ok(())
}
