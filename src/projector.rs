//! Catch-up replay of the activity log into the index.
//!
//! A pass reads the watermark (`version`), asks the store for every subscribed
//! activity that occurred after it and feeds them, oldest first, through the
//! [`BroadcastHandler`]. The watermark and every projection written during a
//! pass share one index transaction: either the whole pass commits or none of
//! it does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use projector_common::ActivityStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{IndexError, ProjectorError};
use crate::index::{Index, IndexExt, IndexTransaction, IndexWithDefaults};
use crate::projections::{
    BroadcastHandler, BroadcastStats, Organization, ProjectCard, project_card_key,
    standard_handlers,
};

pub const VERSION_KEY: &str = "version";

/// Timestamp of the newest activity applied to the index. Defaults to the
/// earliest representable instant so no activity predates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub DateTime<Utc>);

impl Default for Version {
    fn default() -> Self {
        Self(DateTime::<Utc>::MIN_UTC)
    }
}

/// Outcome of one [`Projector::update`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub applied: u64,
    pub version: DateTime<Utc>,
}

pub struct Projector {
    index: IndexWithDefaults<Arc<dyn Index>>,
    handler: Mutex<BroadcastHandler>,
}

impl Projector {
    /// Projector with the standard handler set.
    pub fn new(index: Arc<dyn Index>) -> Self {
        Self::with_handler(index, standard_handlers())
    }

    pub fn with_handler(index: Arc<dyn Index>, handler: BroadcastHandler) -> Self {
        Self {
            index: IndexWithDefaults::new(index).with_default(Version::default()),
            handler: Mutex::new(handler),
        }
    }

    /// The index with the `version` default registered.
    pub fn index(&self) -> &dyn Index {
        &self.index
    }

    pub fn subscribed_to(&self) -> Vec<String> {
        self.lock_handler().subscribed_to()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.lock_handler().stats()
    }

    /// A replay that panicked rolled its transaction back, so the handler's
    /// counters are the only state left behind and are safe to reuse.
    fn lock_handler(&self) -> MutexGuard<'_, BroadcastHandler> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply every subscribed activity newer than the watermark.
    ///
    /// Passes are serialized; a caller arriving during a pass waits for it and
    /// then runs its own (usually empty) pass.
    pub fn update(&self, store: &dyn ActivityStore) -> Result<UpdateSummary, ProjectorError> {
        let mut handler = self.lock_handler();
        let names = handler.subscribed_to();
        let started = Instant::now();

        let summary = self.index.transaction(|tx| {
            let since = read_version(tx)?;
            let mut version = since;
            let mut applied = 0u64;

            store
                .all_by_name_since(&names, since, &mut |activity| {
                    if activity.occurred_on > version {
                        version = activity.occurred_on;
                        tx.put(VERSION_KEY, &Version(version))
                            .map_err(ProjectorError::from)?;
                    }
                    handler.handle_activity(tx, activity)?;
                    applied += 1;
                    Ok(())
                })
                .map_err(ProjectorError::from_store)?;

            Ok(UpdateSummary { applied, version })
        })?;

        if summary.applied > 0 {
            info!(
                applied = summary.applied,
                version = %summary.version,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "projector caught up"
            );
        } else {
            debug!(version = %summary.version, "projector already up to date");
        }
        Ok(summary)
    }

    /// Current watermark.
    pub fn version(&self) -> Result<DateTime<Utc>, ProjectorError> {
        self.index.read(|tx| read_version(tx))
    }

    pub fn organization(&self, uuid: &str) -> Result<Organization, ProjectorError> {
        self.index.read(|tx| Ok(tx.get::<Organization>(uuid)?))
    }

    pub fn project_card(&self, project_uuid: &str) -> Result<ProjectCard, ProjectorError> {
        self.index
            .read(|tx| Ok(tx.get::<ProjectCard>(&project_card_key(project_uuid))?))
    }
}

/// Read the watermark; an undecodable value restarts from the beginning.
fn read_version(tx: &dyn IndexTransaction) -> Result<DateTime<Utc>, ProjectorError> {
    match tx.get::<Version>(VERSION_KEY) {
        Ok(Version(version)) => Ok(version),
        Err(IndexError::Codec { key, source }) => {
            warn!(key = %key, error = %source, "corrupt watermark; replaying from the beginning");
            Ok(Version::default().0)
        }
        Err(err) => Err(err.into()),
    }
}
