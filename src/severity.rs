//! Severity scales.
//!
//! Two independent axes: [`SeverityLevel`] reflects the cumulative state of a
//! subject, [`AlertSeverity`] reflects the urgency of the event that triggered an
//! alert. Both carry an explicit rank; ordering never depends on names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Clinical classification of cumulative blood loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Normal,
    Minor,
    Moderate,
    Major,
    Critical,
}

impl SeverityLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 5] = [
        Self::Normal,
        Self::Minor,
        Self::Moderate,
        Self::Major,
        Self::Critical,
    ];

    /// Ordinal rank, 0 for `Normal` up to 4 for `Critical`.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Minor => 1,
            Self::Moderate => 2,
            Self::Major => 3,
            Self::Critical => 4,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }

    /// Canned alert message for this level.
    #[must_use]
    pub const fn alert_message(self) -> &'static str {
        match self {
            Self::Normal => "Blood loss within normal limits",
            Self::Minor => "Minor blood loss detected - monitor closely",
            Self::Moderate => "Moderate blood loss - consider intervention",
            Self::Major => "Major blood loss - immediate intervention required",
            Self::Critical => "CRITICAL blood loss - activate emergency response",
        }
    }

    /// True if `self` is strictly worse than `other`.
    #[must_use]
    pub const fn escalated_from(self, other: Self) -> bool {
        self.rank() > other.rank()
    }
}

impl Ord for SeverityLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for SeverityLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for SeverityLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of a triggering event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Info => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Emergency => 3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }

    /// Critical and Emergency alerts are raised even at `SeverityLevel::Normal`.
    #[must_use]
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }
}

impl Ord for AlertSeverity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for AlertSeverity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
