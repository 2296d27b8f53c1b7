//! Alerts and their lifecycle.
//!
//! An alert is created by the classifier, stored by the [`AlertRegistry`], and
//! only ever mutated by acknowledgement (one-way).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::SubjectId;
use crate::severity::{AlertSeverity, SeverityLevel};

/// Alert lifecycle storage.
pub mod registry;

pub use registry::AlertRegistry;

/// Unique identifier for an alert.
///
/// Built from the subject, the millisecond timestamp and a monotonic sequence,
/// so two alerts for one subject within the same second never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(String);

impl AlertId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlertId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues [`AlertId`]s. One generator per engine instance.
#[derive(Debug, Default)]
pub struct AlertIdGenerator {
    seq: AtomicU64,
}

impl AlertIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, subject: &SubjectId, at: DateTime<Utc>) -> AlertId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        AlertId(format!("{subject}_{}_{seq:06}", at.format("%Y%m%d%H%M%S%3f")))
    }
}

/// A raised alert.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: AlertId,
    pub subject_id: SubjectId,
    pub alert_severity: AlertSeverity,
    pub message: String,
    pub severity_level_at_trigger: SeverityLevel,
    pub triggering_loss_ml: f64,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}
