//! `projector serve`

use anyhow::Result;
use projector::config::ProjectorConfig;
use projector::server::{ServerConfig, start_server};

use super::{open_activities, open_projector};

pub async fn cmd_serve(config: &ProjectorConfig) -> Result<()> {
    let projector = open_projector(config)?;
    let activities = open_activities(config)?;
    let server = ServerConfig {
        listen: config.server.listen.clone(),
        permissive_cors: config.server.cors,
    };
    start_server(server, projector, activities).await
}
