use projector_common::{Activity, PayloadKind};
use serde::{Deserialize, Serialize};

use super::ActivityHandler;
use crate::errors::HandlerError;
use crate::index::IndexTransaction;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub uuid: String,
    pub project_uuid: String,
    pub name: String,
}

pub struct Tasks;

impl ActivityHandler for Tasks {
    fn name(&self) -> &'static str {
        "tasks"
    }

    fn subscribed_to(&self) -> &'static [&'static str] {
        &["task.added", "task.edited"]
    }

    fn handle_activity(
        &self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), HandlerError> {
        if !self.subscribed_to().contains(&activity.name.as_str()) {
            return Ok(());
        }
        let task = activity
            .payload
            .as_task()
            .ok_or_else(|| HandlerError::type_mismatch(activity, PayloadKind::Task))?;

        tx.put(
            &task.uuid,
            &Task {
                uuid: task.uuid.clone(),
                project_uuid: task.project_uuid.clone(),
                name: task.name.clone(),
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{InMemoryIndex, IndexExt};
    use crate::projections::test_support::task;

    #[test]
    fn edit_overwrites_added_task() {
        let index = InMemoryIndex::new();
        let projected = index
            .transaction(|tx| {
                Tasks.handle_activity(tx, &task(1, "task.added", 1, "T1", "P1", "build"))?;
                Tasks.handle_activity(tx, &task(2, "task.edited", 2, "T1", "P1", "build & test"))?;
                Ok(tx.get::<Task>("T1")?)
            })
            .unwrap();
        assert_eq!(projected.name, "build & test");
        assert_eq!(projected.project_uuid, "P1");
    }

    #[test]
    fn ignores_unsubscribed_names() {
        let index = InMemoryIndex::new();
        index
            .transaction(|tx| {
                Tasks.handle_activity(tx, &task(1, "task.archived", 1, "T1", "P1", "x"))?;
                Ok(())
            })
            .unwrap();
        assert!(index.is_empty());
    }
}
