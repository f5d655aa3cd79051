use projector_common::{Activity, PayloadKind};
use serde::{Deserialize, Serialize};

use super::ActivityHandler;
use crate::errors::HandlerError;
use crate::index::IndexTransaction;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub uuid: String,
    pub name: String,
}

pub struct Projects;

impl ActivityHandler for Projects {
    fn name(&self) -> &'static str {
        "projects"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &["project.created"]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        if activity.name != "project.created" {
            return Ok(());
        }
        let project = activity
            .payload
            .as_project()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Project))?;

        tx.put(
            &project.uuid,
            &Project {
                uuid: project.uuid.clone(),
                name: project.name.clone(),
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InMemoryIndex, IndexExt};
    use crate::projections::test_support::at;
    use projector_common::{Payload, domain};

    #[test]
    fn project_created_upserts_projection() {
        let index = InMemoryIndex::new();
        let activity = Activity::new(
            1,
            "project.created",
            at(1),
            Payload::Project(domain::Project {
                uuid: "p1".into(),
                organization_uuid: "org1".into(),
                name: "Acme".into(),
                ..Default::default()
            }),
        );

        let project = index
            .transaction(|tx| {
                Projects.handle_activity(tx, &activity)?;
                Ok(tx.get::<Project>("p1")?)
            })
            .unwrap();

        assert_eq!(
            project,
            Project {
                uuid: "p1".into(),
                name: "Acme".into()
            }
        );
    }

    #[test]
    fn wrong_payload_is_type_mismatch() {
        let index = InMemoryIndex::new();
        let activity = Activity::new(
            9,
            "project.created",
            at(1),
            Payload::Task(domain::Task::default()),
        );
        let err = index
            .transaction(|tx| Ok(Projects.handle_activity(tx, &activity)))
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::TypeMismatch {
                activity_id: 9,
                expected: "Project",
                actual: "Task"
            }
        ));
        assert!(index.is_empty());
    }
}
