//! # HemoDrop - Blood Loss Monitoring Engine
//!
//! HemoDrop ingests periodic blood-loss readings per monitored subject,
//! classifies them against clinical thresholds, detects dangerous trends and
//! raises alerts, broadcasting readings and alerts to live observers as they
//! happen.
//!
//! ## Core Concepts
//!
//! - **Reading**: cumulative loss and bleeding rate for one subject at one instant
//! - **Classifier**: severity bands, rate urgency and trend escalation
//! - **SubjectLedger**: retention-bounded reading history per subject
//! - **AlertRegistry**: raised alerts and their acknowledgement
//! - **SessionScheduler**: background sampling of active monitoring sessions
//! - **BroadcastHub**: best-effort fan-out to attached observers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hemodrop::{MonitorConfig, MonitorEngine, OpenRegistry, Reading, SubjectId};
//!
//! let engine = MonitorEngine::new(MonitorConfig::from_env()?, Arc::new(OpenRegistry))?;
//! let stream = engine.subscribe(256)?;
//!
//! let subject = SubjectId::new("bay-3")?;
//! let outcome = engine.submit_reading(&subject, Reading::now(subject.clone(), 320.0, 12.5)?)?;
//! assert!(outcome.alert.is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod reading;
pub mod severity;
pub mod time;

// Configuration and classification
pub mod classifier;
pub mod config;

// State
pub mod alert;
pub mod ledger;
pub mod session;
pub mod subjects;

// Acquisition, fan-out and orchestration
pub mod engine;
pub mod hub;
pub mod scheduler;
pub mod source;

pub use alert::{Alert, AlertId, AlertIdGenerator, AlertRegistry};
pub use classifier::{AlertDecision, Classifier};
pub use config::{EscalationPolicy, MonitorConfig, RateThresholds, SchedulerConfig, SeverityThresholds};
pub use engine::{HealthReport, HistoryReport, IngestOutcome, MonitorEngine, SubjectStatus};
pub use error::{ExecutionError, HemoError, HemoResult, ValidationError};
pub use hub::{
    BroadcastHub, ChannelObserver, DeliveryError, JsonLinesObserver, MonitorEvent, Observer, ObserverId,
    ObserverStream, PublishReport,
};
pub use ledger::{SubjectLedger, TrendStats};
pub use reading::{RawSensorFields, Reading, SubjectId};
pub use scheduler::{CycleReport, SchedulerHandle, SessionScheduler};
pub use session::{MonitoringSession, SessionId, SessionState};
pub use severity::{AlertSeverity, SeverityLevel};
pub use source::{
    ProbeSample, ReadingSource, SensorProbe, SensorSource, SimulatedSource, SimulationProfile, SimulationRequest,
    SourceMode,
};
pub use subjects::{InMemorySubjectRegistry, OpenRegistry, SubjectRegistry};
pub use time::TimeRange;
