use projector_common::{Activity, PayloadKind};
use serde::{Deserialize, Serialize};

use super::ActivityHandler;
use super::jobs::Job;
use super::tasks::Task;
use crate::errors::HandlerError;
use crate::index::IndexTransaction;

/// Join cache from an operation to the job it ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub uuid: String,
    pub job_uuid: String,
}

impl Operation {
    /// Resolve the owning project by walking operation → job → task.
    ///
    /// Every link must already be projected. A miss means the stream was
    /// applied out of causal order, so it is reported as an invariant
    /// violation rather than a not-found.
    pub fn project_uuid(&self, tx: &dyn IndexTransaction) -> Result<String, HandlerError> {
        let job = tx.get::<Job>(&self.job_uuid).map_err(|err| {
            HandlerError::invariant(format!(
                "operation {} references job {} which cannot be loaded: {}",
                self.uuid, self.job_uuid, err
            ))
        })?;
        let task = tx.get::<Task>(&job.task_uuid).map_err(|err| {
            HandlerError::invariant(format!(
                "job {} of operation {} references task '{}' which cannot be loaded: {}",
                job.uuid, self.uuid, job.task_uuid, err
            ))
        })?;
        if task.project_uuid.is_empty() {
            return Err(HandlerError::invariant(format!(
                "task {} of operation {} has no project",
                task.uuid, self.uuid
            )));
        }
        Ok(task.project_uuid)
    }
}

pub struct Operations;

impl ActivityHandler for Operations {
    fn name(&self) -> &'static str {
        "operations"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &["operation.started"]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        if activity.name != "operation.started" {
            return Ok(());
        }
        let operation = activity
            .payload
            .as_operation()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Operation))?;

        let Some(job_uuid) = &operation.job_uuid else {
            return Ok(());
        };

        tx.put(
            &operation.uuid,
            &Operation {
                uuid: operation.uuid.clone(),
                job_uuid: job_uuid.clone(),
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InMemoryIndex, IndexExt};
    use crate::projections::test_support::{job_fixture, operation};
    use crate::projections::{Environments, Jobs, Tasks};

    fn seed(index: &InMemoryIndex) {
        index
            .transaction(|tx| {
                for activity in job_fixture(0) {
                    Environments.handle_activity(tx, &activity)?;
                    Tasks.handle_activity(tx, &activity)?;
                    Jobs.handle_activity(tx, &activity)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn started_operation_is_cached_and_resolves_project() {
        let index = InMemoryIndex::new();
        seed(&index);

        let project = index
            .transaction(|tx| {
                let started = operation(1, "operation.started", 10, "O1", Some("J1"));
                Operations.handle_activity(tx, &started)?;
                let cached = tx.get::<Operation>("O1")?;
                assert_eq!(cached.job_uuid, "J1");
                Ok(cached.project_uuid(tx)?)
            })
            .unwrap();
        assert_eq!(project, "P1");
    }

    #[test]
    fn operation_without_job_is_ignored() {
        let index = InMemoryIndex::new();
        index
            .transaction(|tx| {
                Operations.handle_activity(tx, &operation(1, "operation.started", 1, "O1", None))?;
                Ok(())
            })
            .unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn unresolvable_job_is_invariant_violation() {
        let index = InMemoryIndex::new();
        let op = Operation {
            uuid: "O1".into(),
            job_uuid: "J-ghost".into(),
        };
        let err = index.read(|tx| Ok(op.project_uuid(tx))).unwrap().unwrap_err();
        assert!(err.is_invariant_violation());
        assert!(err.to_string().contains("J-ghost"));
    }
}
