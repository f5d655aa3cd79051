use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use projector_common::{
    Activity, ActivityRecord, ActivityStore, DecodeError, PayloadRegistry, Visit,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params, params_from_iter};
use serde_json::{Map, Value};

/// Activity log kept in an `activities` table.
///
/// `occurred_on` is stored as unix microseconds so ordering and the
/// watermark comparison happen in SQL.
pub struct SqliteActivityStore {
    conn: Mutex<Connection>,
    registry: PayloadRegistry,
}

impl SqliteActivityStore {
    pub fn open(path: &Path, registry: PayloadRegistry) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open activity database")?;
        Self::with_connection(conn, registry)
    }

    pub fn open_in_memory(registry: PayloadRegistry) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("Failed to open in-memory activity database")?;
        Self::with_connection(conn, registry)
    }

    fn with_connection(conn: Connection, registry: PayloadRegistry) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS activities (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                occurred_on INTEGER NOT NULL,
                context_user_uuid TEXT,
                payload TEXT NOT NULL DEFAULT 'null',
                extra TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_activities_occurred_on
                ON activities(occurred_on, id);
            ",
        )
        .context("Failed to create activities table")?;
        Ok(Self {
            conn: Mutex::new(conn),
            registry,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, activity: &Activity) -> Result<()> {
        let record = ActivityRecord::from_activity(activity)
            .with_context(|| format!("Failed to encode activity {}", activity.id))?;
        self.append_record(&record)
    }

    /// Insert a record as-is; its payload is validated on read.
    pub fn append_record(&self, record: &ActivityRecord) -> Result<()> {
        insert_record(&self.lock(), record)
    }

    /// Insert every record or none of them.
    pub fn append_records(&self, records: &[ActivityRecord]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction().context("Failed to begin activity insert")?;
        for record in records {
            insert_record(&tx, record)?;
        }
        tx.commit().context("Failed to commit activities")?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn insert_record(conn: &Connection, record: &ActivityRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)?;
    let extra = serde_json::to_string(&record.extra)?;
    conn.execute(
        "INSERT INTO activities (id, name, occurred_on, context_user_uuid, payload, extra)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.name,
            record.occurred_on.timestamp_micros(),
            record.context_user_uuid,
            payload,
            extra,
        ],
    )
    .with_context(|| format!("Failed to insert activity {}", record.id))?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> Result<ActivityRecord> {
    let id: i64 = row.get(0)?;
    let micros: i64 = row.get(2)?;
    let payload: String = row.get(4)?;
    let extra: String = row.get(5)?;

    let occurred_on = DateTime::<Utc>::from_timestamp_micros(micros)
        .with_context(|| format!("activity {id}: occurred_on {micros} out of range"))?;
    let payload: Value = serde_json::from_str(&payload)
        .with_context(|| format!("activity {id}: payload is not valid JSON"))?;
    let extra = match serde_json::from_str::<Value>(&extra) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        _ => return Err(DecodeError::Extra { id }.into()),
    };

    Ok(ActivityRecord {
        id,
        name: row.get(1)?,
        occurred_on,
        context_user_uuid: row.get(3)?,
        payload,
        extra,
    })
}

impl ActivityStore for SqliteActivityStore {
    fn all_by_name_since(
        &self,
        names: &[String],
        since: DateTime<Utc>,
        visit: &mut Visit<'_>,
    ) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }

        let placeholders = (0..names.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, name, occurred_on, context_user_uuid, payload, extra
             FROM activities
             WHERE occurred_on > ?1 AND name IN ({placeholders})
             ORDER BY occurred_on ASC, id ASC"
        );

        let mut values = Vec::with_capacity(names.len() + 1);
        values.push(SqlValue::Integer(since.timestamp_micros()));
        values.extend(names.iter().map(|name| SqlValue::Text(name.clone())));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        while let Some(row) = rows.next()? {
            let record = record_from_row(row)?;
            let activity = self.registry.decode(record)?;
            visit(&activity)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use projector_common::Payload;
    use projector_common::domain::Project;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn project(id: i64, name: &str, secs: i64) -> Activity {
        Activity::new(
            id,
            name,
            at(secs),
            Payload::Project(Project {
                uuid: format!("p{id}"),
                organization_uuid: "org".into(),
                name: "Acme".into(),
                ..Default::default()
            }),
        )
    }

    fn collect(store: &SqliteActivityStore, names: &[&str], since: DateTime<Utc>) -> Vec<i64> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut ids = Vec::new();
        store
            .all_by_name_since(&names, since, &mut |activity| {
                ids.push(activity.id);
                Ok(())
            })
            .unwrap();
        ids
    }

    #[test]
    fn filters_by_name_and_time_in_order() {
        let store = SqliteActivityStore::open_in_memory(PayloadRegistry::standard()).unwrap();
        store.append(&project(3, "project.created", 30)).unwrap();
        store.append(&project(1, "project.created", 10)).unwrap();
        store.append(&project(2, "project.deleted", 20)).unwrap();
        store.append(&project(4, "project.created", 10)).unwrap();

        assert_eq!(collect(&store, &["project.created"], at(0)), vec![1, 4, 3]);
        assert_eq!(
            collect(&store, &["project.created", "project.deleted"], at(10)),
            vec![2, 3]
        );
        assert!(collect(&store, &[], at(0)).is_empty());
        assert_eq!(store.len().unwrap(), 4);
    }

    #[test]
    fn decodes_payload_through_registry() {
        let store = SqliteActivityStore::open_in_memory(PayloadRegistry::standard()).unwrap();
        let original = project(1, "project.created", 1);
        store.append(&original).unwrap();

        let mut seen = Vec::new();
        store
            .all_by_name_since(&["project.created".to_string()], at(0), &mut |activity| {
                seen.push(activity.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![original]);
    }

    #[test]
    fn undecodable_payload_aborts_iteration() {
        let store = SqliteActivityStore::open_in_memory(PayloadRegistry::standard()).unwrap();
        store
            .append_record(&ActivityRecord {
                id: 1,
                name: "project.created".into(),
                occurred_on: at(1),
                context_user_uuid: None,
                payload: serde_json::json!({"uuid": 42}),
                extra: Map::new(),
            })
            .unwrap();

        let err = store
            .all_by_name_since(&["project.created".to_string()], at(0), &mut |_| Ok(()))
            .unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some(), "{err:#}");
    }

    #[test]
    fn visitor_error_is_returned_unchanged() {
        let store = SqliteActivityStore::open_in_memory(PayloadRegistry::standard()).unwrap();
        store.append(&project(1, "project.created", 1)).unwrap();
        store.append(&project(2, "project.created", 2)).unwrap();

        let mut calls = 0;
        let err = store
            .all_by_name_since(&["project.created".to_string()], at(0), &mut |_| {
                calls += 1;
                anyhow::bail!("stop here")
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "stop here");
        assert_eq!(calls, 1);
    }

    #[test]
    fn append_records_is_all_or_nothing() {
        let store = SqliteActivityStore::open_in_memory(PayloadRegistry::standard()).unwrap();
        store.append(&project(1, "project.created", 1)).unwrap();

        let batch: Vec<ActivityRecord> = [2, 3, 1]
            .into_iter()
            .map(|id| ActivityRecord::from_activity(&project(id, "project.created", id)).unwrap())
            .collect();
        let err = store.append_records(&batch).unwrap_err();
        assert!(format!("{err:#}").contains("activity 1"), "{err:#}");
        assert_eq!(store.len().unwrap(), 1);

        store.append_records(&batch[..2]).unwrap();
        assert_eq!(collect(&store, &["project.created"], at(0)), vec![1, 2, 3]);
    }

    #[test]
    fn reopening_file_keeps_activities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.db");
        {
            let store = SqliteActivityStore::open(&path, PayloadRegistry::standard()).unwrap();
            store.append(&project(1, "project.created", 1)).unwrap();
        }
        let store = SqliteActivityStore::open(&path, PayloadRegistry::standard()).unwrap();
        assert_eq!(collect(&store, &["project.created"], at(0)), vec![1]);
    }
}
