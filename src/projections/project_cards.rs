//! Dashboard cards: the most recent task run of every project, grouped by
//! organization.
//!
//! Each card is stored twice and always written together: inside its
//! [`Organization`] (keyed by the organization uuid) and on its own under
//! [`project_card_key`].
//!
//! Terminal operation events are merged monotonically: an event older than the
//! card's `last_activity` is dropped, and a terminal status only replaces the
//! displayed status when it belongs to the operation the card currently
//! tracks. Replays and late deliveries therefore converge on the newest state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use projector_common::{Activity, OperationStatus, PayloadKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ActivityHandler;
use super::jobs::Job;
use super::operations::Operation;
use crate::errors::{HandlerError, IndexError};
use crate::index::IndexTransaction;

const PROJECT_CARD_PREFIX: &str = "project-card:";

/// Jobs whose display name starts with this are internal bookkeeping and
/// never shown on a card.
const INTERNAL_JOB_PREFIX: &str = "urn:";

pub fn project_card_key(project_uuid: &str) -> String {
    format!("{PROJECT_CARD_PREFIX}{project_uuid}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub uuid: String,
    pub project_cards: BTreeMap<String, ProjectCard>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCard {
    pub organization_uuid: String,
    pub project_uuid: String,
    pub project_name: String,
    pub last_task_uuid: String,
    pub last_task_name: String,
    pub last_task_run_at: Option<DateTime<Utc>>,
    pub last_task_status: Option<OperationStatus>,
    /// Timestamp of the last activity merged into this card. Persisted for the
    /// merge guard; not part of the client-facing view.
    pub last_activity: DateTime<Utc>,
}

pub struct ProjectCards;

impl ProjectCards {
    /// Store `card` in its organization and under its direct key.
    fn index_card(tx: &mut dyn IndexTransaction, card: &ProjectCard) -> Result<(), HandlerError> {
        let mut organization = match tx.get::<Organization>(&card.organization_uuid) {
            Ok(organization) => organization,
            Err(IndexError::NotFound { .. }) => Organization {
                uuid: card.organization_uuid.clone(),
                project_cards: BTreeMap::new(),
            },
            Err(err) => return Err(err.into()),
        };

        organization
            .project_cards
            .insert(card.project_uuid.clone(), card.clone());

        tx.put(&organization.uuid, &organization)?;
        tx.put(&project_card_key(&card.project_uuid), card)?;
        Ok(())
    }

    /// The card of the project that ran `operation_uuid`, or `None` when that
    /// project has since been deleted from its organization.
    fn card_for_operation(
        tx: &dyn IndexTransaction,
        operation_uuid: &str,
    ) -> Result<Option<ProjectCard>, HandlerError> {
        let operation = tx.get::<Operation>(operation_uuid)?;
        let project_uuid = operation.project_uuid(tx)?;
        let card = tx.get::<ProjectCard>(&project_card_key(&project_uuid))?;

        let listed = tx
            .find::<Organization>(&card.organization_uuid)?
            .is_some_and(|org| org.project_cards.contains_key(&project_uuid));
        if !listed {
            debug!(
                project = %project_uuid,
                operation = %operation_uuid,
                "project no longer listed by its organization; ignoring operation"
            );
            return Ok(None);
        }
        Ok(Some(card))
    }

    fn project_created(
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        let project = activity
            .payload
            .as_project()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Project))?;

        let card = ProjectCard {
            organization_uuid: project.organization_uuid.clone(),
            project_uuid: project.uuid.clone(),
            project_name: project.name.clone(),
            last_activity: activity.occurred_on,
            ..Default::default()
        };
        Self::index_card(tx, &card)
    }

    fn project_deleted(
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        let project = activity
            .payload
            .as_project()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Project))?;

        let mut organization = tx.get::<Organization>(&project.organization_uuid)?;
        organization.project_cards.remove(&project.uuid);
        tx.put(&organization.uuid, &organization)?;
        Ok(())
    }

    fn operation_started(
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        let operation = activity
            .payload
            .as_operation()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Operation))?;
        let Some(job_uuid) = &operation.job_uuid else {
            return Ok(());
        };

        let Some(mut card) = Self::card_for_operation(tx, &operation.uuid)? else {
            return Ok(());
        };

        let job = tx.get::<Job>(job_uuid)?;
        let job_name = job.name();
        if job_name.starts_with(INTERNAL_JOB_PREFIX) {
            return Ok(());
        }

        card.last_task_uuid = operation.uuid.clone();
        card.last_task_name = job_name;
        card.last_task_run_at = operation.started_at;
        card.last_task_status = Some(operation.status());
        card.last_activity = activity.occurred_on;

        Self::index_card(tx, &card)
    }

    fn operation_finished(
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
        status: OperationStatus,
    ) -> Result<(), HandlerError> {
        let operation_uuid = if status == OperationStatus::Canceled {
            let canceled = activity
                .payload
                .as_operation_canceled_by_user()
                .ok_or_else(|| {
                    HandlerError::type_mismatch(activity, PayloadKind::OperationCanceledByUser)
                })?;
            canceled.uuid.clone()
        } else {
            let operation = activity
                .payload
                .as_operation()
                .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Operation))?;
            if operation.job_uuid.is_none() {
                return Ok(());
            }
            operation.uuid.clone()
        };

        let Some(mut card) = Self::card_for_operation(tx, &operation_uuid)? else {
            return Ok(());
        };

        if activity.occurred_on < card.last_activity {
            debug!(
                activity_id = activity.id,
                project = %card.project_uuid,
                occurred_on = %activity.occurred_on,
                last_activity = %card.last_activity,
                "dropping stale operation update"
            );
            return Ok(());
        }
        card.last_activity = activity.occurred_on;

        if operation_uuid == card.last_task_uuid {
            card.last_task_status = Some(status);
        }

        Self::index_card(tx, &card)
    }
}

impl ActivityHandler for ProjectCards {
    fn name(&self) -> &'static str {
        "project_cards"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &[
            "project.created",
            "project.deleted",
            "operation.started",
            "operation.canceled-by-user",
            "operation.failed",
            "operation.failed-fatally",
            "operation.succeeded",
        ]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        match activity.name.as_str() {
            "project.created" => Self::project_created(tx, activity),
            "project.deleted" => Self::project_deleted(tx, activity),
            "operation.started" => Self::operation_started(tx, activity),
            "operation.canceled-by-user" => {
                Self::operation_finished(tx, activity, OperationStatus::Canceled)
            }
            "operation.failed" => Self::operation_finished(tx, activity, OperationStatus::Failure),
            "operation.failed-fatally" => {
                Self::operation_finished(tx, activity, OperationStatus::Fatal)
            }
            "operation.succeeded" => {
                Self::operation_finished(tx, activity, OperationStatus::Success)
            }
            _ => Ok(()),
        }
    }
}
