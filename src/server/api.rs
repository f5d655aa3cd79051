use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use projector_common::{ActivityStore, OperationStatus};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinError;
use tracing::{error, warn};

use crate::errors::ProjectorError;
use crate::projections::{BroadcastStats, Organization, ProjectCard};
use crate::projector::Projector;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub projector: Arc<Projector>,
    pub activities: Arc<dyn ActivityStore>,
    /// Told about a panicking catch-up pass so the server can stop.
    fatal: Option<UnboundedSender<String>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(projector: Arc<Projector>, activities: Arc<dyn ActivityStore>) -> SharedState {
        Arc::new(Self {
            projector,
            activities,
            fatal: None,
        })
    }

    /// Like [`AppState::new`], reporting catch-up panics on `fatal`.
    pub fn with_fatal(
        projector: Arc<Projector>,
        activities: Arc<dyn ActivityStore>,
        fatal: UnboundedSender<String>,
    ) -> SharedState {
        Arc::new(Self {
            projector,
            activities,
            fatal: Some(fatal),
        })
    }

    /// Catch up before a read. A failed pass is logged and the read is served
    /// from whatever was committed before it. A panicking pass is not a
    /// failure: it is re-raised.
    async fn refresh(&self) {
        let projector = self.projector.clone();
        let activities = self.activities.clone();
        match tokio::task::spawn_blocking(move || projector.update(activities.as_ref())).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(error = %err, "catch-up before read failed"),
            Err(err) if err.is_panic() => escalate_panic(err, self.fatal.as_ref()),
            Err(err) => warn!(error = %err, "catch-up task cancelled"),
        }
    }

    /// Run a blocking index read on the blocking pool.
    async fn read<R, F>(&self, read: F) -> Result<R, ApiError>
    where
        F: FnOnce(&Projector) -> Result<R, ProjectorError> + Send + 'static,
        R: Send + 'static,
    {
        let projector = self.projector.clone();
        tokio::task::spawn_blocking(move || read(&projector))
            .await
            .map_err(|err| ApiError(format!("read task failed: {err}")))?
            .map_err(|err| ApiError(err.to_string()))
    }
}

/// Report a panicked catch-up task on `fatal`, then resume the panic on the
/// current task.
pub(crate) fn escalate_panic(err: JoinError, fatal: Option<&UnboundedSender<String>>) -> ! {
    let payload = err.into_panic();
    let message = panic_message(payload.as_ref());
    error!(panic = %message, "catch-up pass panicked");
    if let Some(fatal) = fatal {
        // A closed receiver means the server is already stopping.
        let _ = fatal.send(message);
    }
    std::panic::resume_unwind(payload)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Response envelope ─────────────────────────────────────────────────

/// `{error, subject?, collection?}`; a non-empty `error` is sent with 400.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<Vec<T>>,
}

impl<T: Serialize> Envelope<T> {
    pub fn subject(subject: T) -> Self {
        Self {
            error: String::new(),
            subject: Some(subject),
            collection: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = if self.error.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(self)).into_response()
    }
}

pub struct ApiError(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        Envelope::<()> {
            error: self.0,
            subject: None,
            collection: None,
        }
        .into_response()
    }
}

// ── Client views ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCardView {
    pub organization_uuid: String,
    pub project_uuid: String,
    pub project_name: String,
    pub last_task_uuid: String,
    pub last_task_name: String,
    pub last_task_run_at: Option<DateTime<Utc>>,
    pub last_task_status: Option<OperationStatus>,
}

impl From<ProjectCard> for ProjectCardView {
    fn from(card: ProjectCard) -> Self {
        Self {
            organization_uuid: card.organization_uuid,
            project_uuid: card.project_uuid,
            project_name: card.project_name,
            last_task_uuid: card.last_task_uuid,
            last_task_name: card.last_task_name,
            last_task_run_at: card.last_task_run_at,
            last_task_status: card.last_task_status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationView {
    pub uuid: String,
    pub project_cards: BTreeMap<String, ProjectCardView>,
}

impl From<Organization> for OrganizationView {
    fn from(organization: Organization) -> Self {
        Self {
            uuid: organization.uuid,
            project_cards: organization
                .project_cards
                .into_iter()
                .map(|(uuid, card)| (uuid, card.into()))
                .collect(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/organizations/{uuid}", get(get_organization))
        .route("/project-cards/{project_uuid}", get(get_project_card))
        .route("/_/stats", get(get_stats))
        .route("/health", get(health_check))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn get_organization(
    State(state): State<SharedState>,
    Path(uuid): Path<String>,
) -> Result<Envelope<OrganizationView>, ApiError> {
    state.refresh().await;
    let organization = state
        .read(move |projector| projector.organization(&uuid))
        .await?;
    Ok(Envelope::subject(organization.into()))
}

async fn get_project_card(
    State(state): State<SharedState>,
    Path(project_uuid): Path<String>,
) -> Result<Envelope<ProjectCardView>, ApiError> {
    state.refresh().await;
    let card = state
        .read(move |projector| projector.project_card(&project_uuid))
        .await?;
    Ok(Envelope::subject(card.into()))
}

async fn get_stats(State(state): State<SharedState>) -> Result<Envelope<BroadcastStats>, ApiError> {
    let stats = state.read(|projector| Ok(projector.stats())).await?;
    Ok(Envelope::subject(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use projector_common::InMemoryActivityStore;
    use tower::ServiceExt;

    use crate::errors::HandlerError;
    use crate::index::{InMemoryIndex, IndexTransaction};
    use crate::projections::test_support::*;
    use crate::projections::{ActivityHandler, BroadcastHandler};
    use projector_common::Activity;
    use tokio::sync::mpsc;

    struct Exploding;

    impl ActivityHandler for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }
        fn subscribed_to(&self) -> &'static [&'static str] {
            &["project.created"]
        }
        fn handle_activity(
            &self,
            _tx: &mut dyn IndexTransaction,
            _activity: &Activity,
        ) -> Result<(), HandlerError> {
            panic!("projection exploded");
        }
    }

    fn exploding_projector() -> Arc<Projector> {
        Arc::new(Projector::with_handler(
            Arc::new(InMemoryIndex::new()),
            BroadcastHandler::new().add(Exploding),
        ))
    }

    fn test_app(store: Arc<InMemoryActivityStore>) -> Router {
        let projector = Arc::new(Projector::new(Arc::new(InMemoryIndex::new())));
        api_router().with_state(AppState::new(projector, store))
    }

    fn seeded_store() -> Arc<InMemoryActivityStore> {
        let mut activities = vec![project_created(1, 0, "P1", "Org1", "Acme")];
        activities.extend(job_fixture(1));
        activities.push(operation(2, "operation.started", 10, "O1", Some("J1")));
        Arc::new(InMemoryActivityStore::with_activities(activities))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = get(test_app(seeded_store()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_project_card_refreshes_before_read() {
        let (status, body) = get(test_app(seeded_store()), "/project-cards/P1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "");
        assert!(body.get("collection").is_none());

        let card = &body["subject"];
        assert_eq!(card["projectUuid"], "P1");
        assert_eq!(card["projectName"], "Acme");
        assert_eq!(card["lastTaskUuid"], "O1");
        assert_eq!(card["lastTaskName"], "production - deploy");
        assert_eq!(card["lastTaskStatus"], "active");
        assert!(card.get("lastActivity").is_none());
    }

    #[tokio::test]
    async fn test_organization_lists_cards() {
        let (status, body) = get(test_app(seeded_store()), "/organizations/Org1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["uuid"], "Org1");
        assert_eq!(body["subject"]["projectCards"]["P1"]["projectName"], "Acme");
        assert!(body["subject"]["projectCards"]["P1"].get("lastActivity").is_none());
    }

    #[tokio::test]
    async fn test_unknown_organization_is_bad_request() {
        let (status, body) = get(test_app(seeded_store()), "/organizations/nope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("nope"));
        assert!(body.get("subject").is_none());
    }

    #[tokio::test]
    async fn test_new_activities_visible_on_next_read() {
        let store = seeded_store();
        let app = test_app(store.clone());

        let (_, body) = get(app.clone(), "/project-cards/P1").await;
        assert_eq!(body["subject"]["lastTaskStatus"], "active");

        store.append(operation(3, "operation.succeeded", 20, "O1", Some("J1")));
        let (_, body) = get(app, "/project-cards/P1").await;
        assert_eq!(body["subject"]["lastTaskStatus"], "success");
    }

    #[tokio::test]
    async fn test_stats_reports_seen_activities() {
        let app = test_app(seeded_store());
        get(app.clone(), "/project-cards/P1").await;

        let (status, body) = get(app, "/_/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subject"]["seen"], 5);
        assert_eq!(body["subject"]["histogram"]["project.created"], 1);
    }

    #[tokio::test]
    #[should_panic(expected = "projection exploded")]
    async fn test_refresh_reraises_handler_panic() {
        let state = AppState::new(exploding_projector(), seeded_store());
        state.refresh().await;
    }

    #[tokio::test]
    async fn test_refresh_panic_reaches_fatal_channel() {
        let (fatal, mut crashed) = mpsc::unbounded_channel();
        let state = AppState::with_fatal(exploding_projector(), seeded_store(), fatal);

        let request = tokio::spawn(async move { state.refresh().await });
        let err = request.await.unwrap_err();
        assert!(err.is_panic());
        assert_eq!(crashed.try_recv().unwrap(), "projection exploded");
    }
}
