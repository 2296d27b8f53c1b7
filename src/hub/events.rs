//! Event payloads delivered to observers.
//!
//! Events serialize as `{"type": ..., "data": ...}` so transports can forward
//! them verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{Alert, AlertId};
use crate::reading::{Reading, SubjectId};
use crate::source::SourceMode;

/// A broadcast event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A reading was ingested.
    Reading(Reading),

    /// An alert was raised.
    Alert(Alert),

    /// An alert was acknowledged for the first time.
    AlertAcknowledged { alert_id: AlertId },

    /// Sent once to each observer as it attaches.
    ConnectionEstablished {
        mode: SourceMode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl MonitorEvent {
    #[must_use]
    pub fn connection_established(mode: SourceMode) -> Self {
        Self::ConnectionEstablished {
            mode,
            message: "Connected to HemoDrop monitor".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// The `type` tag of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Reading(_) => "reading",
            Self::Alert(_) => "alert",
            Self::AlertAcknowledged { .. } => "alert_acknowledged",
            Self::ConnectionEstablished { .. } => "connection_established",
        }
    }

    /// Subject the event concerns, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectId> {
        match self {
            Self::Reading(r) => Some(r.subject_id()),
            Self::Alert(a) => Some(&a.subject_id),
            Self::AlertAcknowledged { .. } | Self::ConnectionEstablished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_type_and_data_envelope() {
        let event = MonitorEvent::AlertAcknowledged {
            alert_id: AlertId::from("p1_20240101000000000_000001"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "alert_acknowledged");
        assert_eq!(json["data"]["alert_id"], "p1_20240101000000000_000001");

        let hello = serde_json::to_value(MonitorEvent::connection_established(SourceMode::Simulation)).unwrap();
        assert_eq!(hello["type"], "connection_established");
        assert_eq!(hello["data"]["mode"], "simulation");
    }

    #[test]
    fn reading_event_carries_reading_fields() {
        let reading = Reading::now(SubjectId::new("p1").unwrap(), 42.0, 1.5).unwrap();
        let event = MonitorEvent::Reading(reading.clone());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reading");
        assert_eq!(json["data"]["cumulative_loss_ml"], 42.0);
        assert_eq!(event.subject(), Some(reading.subject_id()));

        let back: MonitorEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
