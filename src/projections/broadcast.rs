//! Fan-out dispatcher in front of the projection handlers.
//!
//! Every activity reaches every registered handler in registration order,
//! sharing one transaction. A handler error is logged and dispatch carries on;
//! only invariant violations (under [`InvariantPolicy::Abort`]) and panics
//! escape, after the remaining state has been logged.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use projector_common::Activity;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::ActivityHandler;
use crate::errors::ProjectorError;
use crate::index::IndexTransaction;

pub const DEFAULT_STATUS_INTERVAL: u64 = 1000;

/// What to do when a handler reports a broken causal invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvariantPolicy {
    /// Finish dispatching the activity, then fail the replay.
    #[default]
    Abort,
    /// Log and keep going.
    Skip,
}

impl InvariantPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for InvariantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvariantPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("Invalid invariant policy: {}", other)),
        }
    }
}

/// Point-in-time view of the dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStats {
    pub seen: u64,
    pub histogram: BTreeMap<String, u64>,
    pub last_activity: Option<DateTime<Utc>>,
    pub handlers: Vec<&'static str>,
}

pub struct BroadcastHandler {
    handlers: Vec<Box<dyn ActivityHandler>>,
    histogram: BTreeMap<String, u64>,
    seen: u64,
    last_activity: Option<DateTime<Utc>>,
    status_interval: u64,
    invariant_policy: InvariantPolicy,
    started: Instant,
}

impl Default for BroadcastHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            histogram: BTreeMap::new(),
            seen: 0,
            last_activity: None,
            status_interval: DEFAULT_STATUS_INTERVAL,
            invariant_policy: InvariantPolicy::default(),
            started: Instant::now(),
        }
    }

    pub fn add(mut self, handler: impl ActivityHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Log a status line every `interval` activities; `0` disables it.
    pub fn with_status_interval(mut self, interval: u64) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_invariant_policy(mut self, policy: InvariantPolicy) -> Self {
        self.invariant_policy = policy;
        self
    }

    pub fn invariant_policy(&self) -> InvariantPolicy {
        self.invariant_policy
    }

    /// Union of all handler subscriptions, first-seen order, no duplicates.
    pub fn subscribed_to(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for handler in &self.handlers {
            for name in handler.subscribed_to() {
                if !names.iter().any(|n| n == name) {
                    names.push((*name).to_string());
                }
            }
        }
        names
    }

    pub fn handle_activity(
        &mut self,
        tx: &mut dyn IndexTransaction,
        activity: &Activity,
    ) -> Result<(), ProjectorError> {
        self.seen += 1;
        *self.histogram.entry(activity.name.clone()).or_default() += 1;
        self.last_activity = Some(activity.occurred_on);
        if self.status_interval > 0 && self.seen % self.status_interval == 0 {
            self.log_status();
        }

        let mut violation = None;
        for handler in &self.handlers {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handler.handle_activity(tx, activity)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_invariant_violation() => {
                    error!(
                        handler = handler.name(),
                        activity_id = activity.id,
                        activity = %activity.name,
                        policy = %self.invariant_policy,
                        error = %err,
                        "invariant violated"
                    );
                    if self.invariant_policy == InvariantPolicy::Abort && violation.is_none() {
                        violation = Some(err);
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        handler = handler.name(),
                        activity_id = activity.id,
                        activity = %activity.name,
                        error = %err,
                        "handler failed"
                    );
                }
                Err(payload) => {
                    error!(
                        handler = handler.name(),
                        activity_id = activity.id,
                        activity = %activity.name,
                        "handler panicked"
                    );
                    self.log_status();
                    panic::resume_unwind(payload);
                }
            }
        }

        if let Some(source) = violation {
            self.log_status();
            return Err(ProjectorError::Invariant {
                activity_id: activity.id,
                name: activity.name.clone(),
                source,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            seen: self.seen,
            histogram: self.histogram.clone(),
            last_activity: self.last_activity,
            handlers: self.handlers.iter().map(|h| h.name()).collect(),
        }
    }

    pub fn log_status(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let per_second = if elapsed > 0.0 {
            self.seen as f64 / elapsed
        } else {
            0.0
        };
        info!(
            seen = self.seen,
            per_second = format!("{per_second:.1}"),
            last_activity = ?self.last_activity,
            histogram = ?self.histogram,
            "projector status"
        );
    }
}
