use projector_common::{Activity, PayloadKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ActivityHandler;
use super::environments::Environment;
use super::tasks::Task;
use crate::errors::{HandlerError, IndexError};
use crate::index::IndexTransaction;

/// A job with the names of its environment and task copied in.
///
/// Only meaningful once the referenced environment and task have been
/// projected; until then the corresponding name stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub uuid: String,
    pub environment_uuid: String,
    pub environment_name: String,
    pub task_uuid: String,
    pub task_name: String,
}

impl Job {
    /// Display name, e.g. `production - deploy`.
    pub fn name(&self) -> String {
        format!("{} - {}", self.environment_name, self.task_name)
    }

    pub fn update_environment(
        &mut self,
        uuid: &str,
        tx: &dyn IndexTransaction,
    ) -> Result<(), IndexError> {
        let environment = tx.get::<Environment>(uuid)?;
        self.environment_uuid = uuid.to_string();
        self.environment_name = environment.name;
        Ok(())
    }

    pub fn update_task(&mut self, uuid: &str, tx: &dyn IndexTransaction) -> Result<(), IndexError> {
        let task = tx.get::<Task>(uuid)?;
        self.task_uuid = uuid.to_string();
        self.task_name = task.name;
        Ok(())
    }
}

pub struct Jobs;

impl ActivityHandler for Jobs {
    fn name(&self) -> &'static str {
        "jobs"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &["job.added", "job.edited"]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        match activity.name.as_str() {
            "job.added" => {
                let job = activity
                    .payload
                    .as_job()
                    .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Job))?;

                let mut projected = Job {
                    uuid: job.uuid.clone(),
                    environment_uuid: job.environment_uuid.clone(),
                    task_uuid: job.task_uuid.clone(),
                    ..Default::default()
                };

                // Partial denormalization is accepted; the job is written anyway.
                if let Err(err) = projected.update_environment(&job.environment_uuid, tx) {
                    warn!(
                        activity_id = activity.id,
                        job = %job.uuid,
                        environment = %job.environment_uuid,
                        error = %err,
                        "could not resolve job environment"
                    );
                }
                if let Err(err) = projected.update_task(&job.task_uuid, tx) {
                    warn!(
                        activity_id = activity.id,
                        job = %job.uuid,
                        task = %job.task_uuid,
                        error = %err,
                        "could not resolve job task"
                    );
                }

                tx.put(&projected.uuid, &projected)?;
                Ok(())
            }
            "job.edited" => {
                let job = activity
                    .payload
                    .as_job()
                    .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Job))?;

                let mut existing = tx.get::<Job>(&job.uuid)?;
                if existing.uuid != job.uuid {
                    return Ok(());
                }

                existing.update_environment(&job.environment_uuid, tx)?;
                existing.update_task(&job.task_uuid, tx)?;

                tx.put(&existing.uuid, &existing)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InMemoryIndex, IndexExt};
    use crate::projections::test_support::{environment, job, job_fixture, task};
    use crate::projections::{Environments, Tasks};

    fn apply(index: &InMemoryIndex, activities: &[Activity]) {
        index
            .transaction(|tx| {
                for activity in activities {
                    let _ = Environments.handle_activity(tx, activity);
                    let _ = Tasks.handle_activity(tx, activity);
                    let _ = Jobs.handle_activity(tx, activity);
                }
                Ok(())
            })
            .unwrap();
    }

    fn get_job(index: &InMemoryIndex, uuid: &str) -> Job {
        index.read(|tx| Ok(tx.get::<Job>(uuid)?)).unwrap()
    }

    #[test]
    fn job_added_after_dependencies_is_fully_denormalized() {
        let index = InMemoryIndex::new();
        apply(&index, &job_fixture(0));

        let projected = get_job(&index, "J1");
        assert_eq!(projected.environment_name, "production");
        assert_eq!(projected.task_name, "deploy");
        assert_eq!(projected.name(), "production - deploy");
    }

    #[test]
    fn job_added_before_dependencies_is_written_partially() {
        let index = InMemoryIndex::new();
        apply(
            &index,
            &[
                environment(1, "environment.added", 1, "E1", "production"),
                job(2, "job.added", 2, "J1", "E1", "T-missing"),
            ],
        );

        let projected = get_job(&index, "J1");
        assert_eq!(projected.environment_name, "production");
        assert_eq!(projected.task_uuid, "T-missing");
        assert!(projected.task_name.is_empty());
    }

    #[test]
    fn job_edited_re_resolves_associations() {
        let index = InMemoryIndex::new();
        let mut activities = job_fixture(0);
        activities.push(environment(3, "environment.added", 3, "E2", "staging"));
        activities.push(task(4, "task.added", 4, "T2", "P1", "smoke test"));
        activities.push(job(5, "job.edited", 5, "J1", "E2", "T2"));
        apply(&index, &activities);

        let projected = get_job(&index, "J1");
        assert_eq!(projected.name(), "staging - smoke test");
        assert_eq!(projected.environment_uuid, "E2");
        assert_eq!(projected.task_uuid, "T2");
    }

    #[test]
    fn job_edited_for_unknown_job_is_not_found() {
        let index = InMemoryIndex::new();
        let err = index
            .transaction(|tx| {
                Ok(Jobs.handle_activity(tx, &job(1, "job.edited", 1, "J9", "E1", "T1")))
            })
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, HandlerError::Index(IndexError::NotFound { .. })));
        assert!(index.is_empty());
    }
}
