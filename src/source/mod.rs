//! Reading sources.
//!
//! The scheduler depends only on the [`ReadingSource`] capability. Two
//! implementations ship with the crate: a seeded simulator and an adapter that
//! turns raw probe volumes into readings by estimating the rate from history.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reading::{Reading, SubjectId};

/// Least-squares rate estimation.
pub mod regression;
/// Physical-sensor adapter.
pub mod sensor;
/// Simulated bleeding curves.
pub mod simulated;

pub use sensor::{ProbeSample, SensorProbe, SensorSource};
pub use simulated::{SimulatedSource, SimulationProfile, SimulationRequest};

/// Whether readings come from the simulator or real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    Simulation,
    Production,
}

impl SourceMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces a reading for a subject on demand.
///
/// `None` means no data is available right now (hardware not ready, probe
/// silent). Callers skip the subject for this cycle instead of retrying.
pub trait ReadingSource: Send + Sync {
    fn read(&self, subject: &SubjectId) -> Option<Reading>;

    /// Mode reported to observers.
    fn mode(&self) -> SourceMode;
}
