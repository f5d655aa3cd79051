//! HTTP query surface over the projections.

pub mod api;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::Router;
use projector_common::ActivityStore;
use tokio::sync::mpsc::{self, UnboundedSender};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::projector::Projector;
use api::{AppState, SharedState, escalate_panic};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8888";

/// Configuration for the query server.
pub struct ServerConfig {
    pub listen: String,
    /// Allow cross-origin reads (dashboards served from another host).
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            permissive_cors: false,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start a catch-up pass in the background so the first read finds a warm
/// index. A panic in the pass is reported on `fatal`.
pub fn spawn_initial_update(
    projector: Arc<Projector>,
    activities: Arc<dyn ActivityStore>,
    fatal: Option<UnboundedSender<String>>,
) {
    tokio::spawn(async move {
        let outcome =
            tokio::task::spawn_blocking(move || projector.update(activities.as_ref())).await;
        match outcome {
            Ok(Ok(summary)) => info!(
                applied = summary.applied,
                version = %summary.version,
                "initial catch-up finished"
            ),
            Ok(Err(err)) => error!(error = %err, "initial catch-up failed"),
            Err(err) if err.is_panic() => escalate_panic(err, fatal.as_ref()),
            Err(err) => error!(error = %err, "initial catch-up cancelled"),
        }
    });
}

/// Serve the query surface until Ctrl+C. A panicking catch-up pass stops the
/// server with an error so a supervisor can restart the process.
pub async fn start_server(
    config: ServerConfig,
    projector: Arc<Projector>,
    activities: Arc<dyn ActivityStore>,
) -> Result<()> {
    info!(subscribed_to = ?projector.subscribed_to(), "projector ready");
    let (fatal, mut crashed) = mpsc::unbounded_channel();
    spawn_initial_update(projector.clone(), activities.clone(), Some(fatal.clone()));

    let mut app = build_router(AppState::with_fatal(projector, activities, fatal));
    if config.permissive_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen))?;
    let local_addr: SocketAddr = listener.local_addr()?;
    info!(listen = %local_addr, "query server listening");

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::select! {
        result = server => result.context("Server error")?,
        Some(panic) = crashed.recv() => bail!("catch-up pass panicked: {panic}"),
    }

    info!("query server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use projector_common::InMemoryActivityStore;
    use tower::ServiceExt;

    use crate::index::InMemoryIndex;

    fn test_router() -> Router {
        let projector = Arc::new(Projector::new(Arc::new(InMemoryIndex::new())));
        build_router(AppState::new(
            projector,
            Arc::new(InMemoryActivityStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let req = Request::builder()
            .uri("/projects")
            .body(Body::empty())
            .unwrap();
        let resp = test_router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_initial_update_runs_in_background() {
        let projector = Arc::new(Projector::new(Arc::new(InMemoryIndex::new())));
        let store = Arc::new(InMemoryActivityStore::with_activities([
            crate::projections::test_support::project_created(1, 1, "P1", "Org1", "Acme"),
        ]));
        spawn_initial_update(projector.clone(), store, None);

        for _ in 0..100 {
            if projector.stats().seen == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("initial catch-up did not run");
    }

    struct Exploding;

    impl crate::projections::ActivityHandler for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }
        fn subscribed_to(&self) -> &'static [&'static str] {
            &["project.created"]
        }
        fn handle_activity(
            &self,
            _tx: &mut dyn crate::index::IndexTransaction,
            _activity: &projector_common::Activity,
        ) -> Result<(), crate::errors::HandlerError> {
            panic!("initial pass exploded");
        }
    }

    #[tokio::test]
    async fn test_initial_update_panic_is_reported() {
        let projector = Arc::new(Projector::with_handler(
            Arc::new(InMemoryIndex::new()),
            crate::projections::BroadcastHandler::new().add(Exploding),
        ));
        let store = Arc::new(InMemoryActivityStore::with_activities([
            crate::projections::test_support::project_created(1, 1, "P1", "Org1", "Acme"),
        ]));
        let (fatal, mut crashed) = mpsc::unbounded_channel();
        spawn_initial_update(projector, store, Some(fatal));

        let panic = tokio::time::timeout(std::time::Duration::from_secs(5), crashed.recv())
            .await
            .unwrap();
        assert_eq!(panic.as_deref(), Some("initial pass exploded"));
    }
}
