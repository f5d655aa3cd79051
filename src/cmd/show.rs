//! `projector show`: refresh, then print a projection as JSON.

use anyhow::{Result, bail};
use projector::config::ProjectorConfig;
use projector::server::api::{OrganizationView, ProjectCardView};
use tracing::warn;

use super::super::ShowCommands;
use super::{open_activities, open_projector};

pub fn cmd_show(config: &ProjectorConfig, command: &ShowCommands) -> Result<()> {
    let projector = open_projector(config)?;
    let activities = open_activities(config)?;

    // Same contract as the HTTP surface: a failed refresh still serves the read.
    if let Err(err) = projector.update(activities.as_ref()) {
        warn!(error = %err, "catch-up before read failed");
    }

    let json = match command {
        ShowCommands::Organization { uuid } => match projector.organization(uuid) {
            Ok(organization) => {
                serde_json::to_string_pretty(&OrganizationView::from(organization))?
            }
            Err(err) if err.is_not_found() => bail!("Organization {} not found", uuid),
            Err(err) => return Err(anyhow::Error::new(err).context("Failed to read organization")),
        },
        ShowCommands::Card { project_uuid } => match projector.project_card(project_uuid) {
            Ok(card) => serde_json::to_string_pretty(&ProjectCardView::from(card))?,
            Err(err) if err.is_not_found() => {
                bail!("No project card for project {}", project_uuid)
            }
            Err(err) => return Err(anyhow::Error::new(err).context("Failed to read project card")),
        },
    };
    println!("{}", json);
    Ok(())
}
