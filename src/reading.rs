//! Subjects and the readings taken from them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stable identifier of a monitored subject (patient).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a subject id, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptySubjectId` for blank input.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySubjectId);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw acquisition fields carried alongside a hardware reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSensorFields {
    /// Identifier of the device that produced the sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    /// Raw volume as reported by the probe, before any correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_volume_ml: Option<f64>,
    /// Number of samples the regression used to estimate the rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regression_points: Option<usize>,
}

/// One timestamped measurement of cumulative blood loss and bleeding rate.
///
/// Immutable once built; the ledger hands out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    subject_id: SubjectId,
    timestamp: DateTime<Utc>,
    #[serde(alias = "volume_ml")]
    cumulative_loss_ml: f64,
    #[serde(alias = "rate_ml_min")]
    rate_ml_per_min: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw: Option<RawSensorFields>,
}

impl Reading {
    /// Creates a validated reading.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidReading` for negative or non-finite values.
    pub fn new(
        subject_id: SubjectId,
        timestamp: DateTime<Utc>,
        cumulative_loss_ml: f64,
        rate_ml_per_min: f64,
    ) -> Result<Self, ValidationError> {
        let reading = Self {
            subject_id,
            timestamp,
            cumulative_loss_ml,
            rate_ml_per_min,
            raw: None,
        };
        reading.validate()?;
        Ok(reading)
    }

    /// Convenience constructor stamped with the current time.
    pub fn now(
        subject_id: SubjectId,
        cumulative_loss_ml: f64,
        rate_ml_per_min: f64,
    ) -> Result<Self, ValidationError> {
        Self::new(subject_id, Utc::now(), cumulative_loss_ml, rate_ml_per_min)
    }

    #[must_use]
    pub const fn subject_id(&self) -> &SubjectId {
        &self.subject_id
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn cumulative_loss_ml(&self) -> f64 {
        self.cumulative_loss_ml
    }

    #[must_use]
    pub const fn rate_ml_per_min(&self) -> f64 {
        self.rate_ml_per_min
    }

    #[must_use]
    pub const fn raw(&self) -> Option<&RawSensorFields> {
        self.raw.as_ref()
    }

    #[must_use]
    pub fn with_raw(mut self, raw: RawSensorFields) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Checks the volume and rate invariants.
    ///
    /// Deserialized readings bypass [`Reading::new`], so ingestion calls this again.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_non_negative("cumulative_loss_ml", self.cumulative_loss_ml)?;
        check_non_negative("rate_ml_per_min", self.rate_ml_per_min)?;
        Ok(())
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidReading { field, value })
    }
}
