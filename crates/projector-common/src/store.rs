//! The activity log as seen by its consumers.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::activity::Activity;

/// Callback invoked once per activity; an error stops the iteration.
pub type Visit<'a> = dyn FnMut(&Activity) -> anyhow::Result<()> + 'a;

/// Read access to the append-only activity log.
pub trait ActivityStore: Send + Sync {
    /// Visit every activity whose name is in `names` and which occurred
    /// strictly after `since`, in ascending `occurred_on` order (ties by id).
    ///
    /// An error returned by `visit` aborts the iteration and is returned
    /// unchanged.
    fn all_by_name_since(
        &self,
        names: &[String],
        since: DateTime<Utc>,
        visit: &mut Visit<'_>,
    ) -> anyhow::Result<()>;
}

/// Activity log held in memory. Used by tests and for embedding the projector
/// without a database.
#[derive(Debug, Default)]
pub struct InMemoryActivityStore {
    activities: Mutex<Vec<Activity>>,
}

impl InMemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_activities(activities: impl IntoIterator<Item = Activity>) -> Self {
        let store = Self::new();
        for activity in activities {
            store.append(activity);
        }
        store
    }

    pub fn append(&self, activity: Activity) {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(activity);
    }

    pub fn len(&self) -> usize {
        self.activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivityStore for InMemoryActivityStore {
    fn all_by_name_since(
        &self,
        names: &[String],
        since: DateTime<Utc>,
        visit: &mut Visit<'_>,
    ) -> anyhow::Result<()> {
        // Snapshot so `visit` may append without deadlocking.
        let mut matching: Vec<Activity> = self
            .activities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.occurred_on > since && names.iter().any(|n| n == &a.name))
            .cloned()
            .collect();
        matching.sort_by_key(|a| (a.occurred_on, a.id));

        for activity in &matching {
            visit(activity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Payload;
    use chrono::TimeZone;
    use serde_json::Value;

    fn activity(id: i64, name: &str, secs: i64) -> Activity {
        Activity::new(
            id,
            name,
            Utc.timestamp_opt(secs, 0).unwrap(),
            Payload::Raw(Value::Null),
        )
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filters_by_name_and_strictly_after_since() {
        let store = InMemoryActivityStore::with_activities([
            activity(1, "project.created", 10),
            activity(2, "user.signed-up", 20),
            activity(3, "project.created", 30),
        ]);

        let mut seen = Vec::new();
        store
            .all_by_name_since(
                &names(&["project.created"]),
                Utc.timestamp_opt(10, 0).unwrap(),
                &mut |a| {
                    seen.push(a.id);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(seen, vec![3]);
    }

    #[test]
    fn visits_in_ascending_time_order() {
        let store = InMemoryActivityStore::with_activities([
            activity(5, "job.added", 50),
            activity(4, "job.added", 40),
            activity(6, "job.added", 40),
        ]);

        let mut seen = Vec::new();
        store
            .all_by_name_since(&names(&["job.added"]), DateTime::UNIX_EPOCH, &mut |a| {
                seen.push(a.id);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![4, 6, 5]);
    }

    #[test]
    fn visit_error_stops_iteration() {
        let store = InMemoryActivityStore::with_activities([
            activity(1, "job.added", 10),
            activity(2, "job.added", 20),
        ]);

        let mut calls = 0;
        let err = store
            .all_by_name_since(&names(&["job.added"]), DateTime::UNIX_EPOCH, &mut |_| {
                calls += 1;
                anyhow::bail!("stop here")
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.to_string(), "stop here");
    }
}
