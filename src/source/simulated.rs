//! Simulated bleeding curves.
//!
//! Cumulative loss follows a piecewise-linear curve of elapsed simulated
//! minutes (slow ooze, acceleration, hemorrhage, partial control) plus bounded
//! jitter. Cumulative loss never decreases for a subject.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::reading::{Reading, SubjectId};

use super::{ReadingSource, SourceMode};

/// Curve segments as `(start_minute, slope_ml_per_min)`, ascending by start.
const SEGMENTS: [(f64, f64); 4] = [(0.0, 5.0), (5.0, 15.0), (15.0, 25.0), (30.0, 10.0)];

/// Shape of the simulated curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationProfile {
    /// Simulated minutes elapsed per wall-clock second.
    pub minutes_per_second: f64,
    /// Maximum absolute jitter applied to the volume (mL).
    pub volume_jitter_ml: f64,
    /// Maximum absolute jitter applied to the rate (mL/min).
    pub rate_jitter_ml_per_min: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            minutes_per_second: 1.0 / 60.0,
            volume_jitter_ml: 5.0,
            rate_jitter_ml_per_min: 2.0,
        }
    }
}

/// Noise-free curve value and slope at `minutes` of elapsed time.
#[must_use]
pub fn curve_at(minutes: f64) -> (f64, f64) {
    let minutes = minutes.max(0.0);
    let mut volume = 0.0;
    let mut slope = SEGMENTS[0].1;
    for (i, &(start, seg_slope)) in SEGMENTS.iter().enumerate() {
        if minutes < start {
            break;
        }
        let end = SEGMENTS.get(i + 1).map_or(f64::INFINITY, |s| s.0);
        volume += seg_slope * (minutes.min(end) - start);
        slope = seg_slope;
    }
    (volume, slope)
}

#[derive(Debug, Clone, Copy)]
struct Track {
    started: DateTime<Utc>,
    last_volume: f64,
}

/// Seedable simulator implementing [`ReadingSource`].
#[derive(Debug)]
pub struct SimulatedSource {
    profile: SimulationProfile,
    rng: Mutex<StdRng>,
    tracks: Mutex<HashMap<SubjectId, Track>>,
}

impl SimulatedSource {
    #[must_use]
    pub fn new(profile: SimulationProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    /// Deterministic simulator for tests and demos.
    #[must_use]
    pub fn seeded(profile: SimulationProfile, seed: u64) -> Self {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: SimulationProfile, rng: StdRng) -> Self {
        Self {
            profile,
            rng: Mutex::new(rng),
            tracks: Mutex::new(HashMap::new()),
        }
    }

    /// Produces the reading for `subject` as of `now`.
    ///
    /// The first call for a subject anchors its curve at `now`.
    pub fn read_at(&self, subject: &SubjectId, now: DateTime<Utc>) -> Option<Reading> {
        let mut tracks = self.tracks.lock().ok()?;
        let track = tracks.entry(subject.clone()).or_insert(Track {
            started: now,
            last_volume: 0.0,
        });

        #[allow(clippy::cast_precision_loss)]
        let elapsed_secs = (now - track.started).num_milliseconds().max(0) as f64 / 1000.0;
        let (base_volume, base_rate) = curve_at(elapsed_secs * self.profile.minutes_per_second);

        let (volume_noise, rate_noise) = {
            let mut rng = self.rng.lock().ok()?;
            (
                jitter(&mut *rng, self.profile.volume_jitter_ml),
                jitter(&mut *rng, self.profile.rate_jitter_ml_per_min),
            )
        };

        let volume = (base_volume + volume_noise).max(track.last_volume).max(0.0);
        track.last_volume = volume;
        let rate = (base_rate + rate_noise).max(0.0);

        match Reading::new(subject.clone(), now, round2(volume), round2(rate)) {
            Ok(reading) => Some(reading),
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "simulator produced an invalid reading");
                None
            }
        }
    }

    /// Forgets a subject's curve so the next read starts from zero.
    pub fn reset(&self, subject: &SubjectId) {
        if let Ok(mut tracks) = self.tracks.lock() {
            tracks.remove(subject);
        }
    }

    /// Readings for a batch simulation: one per simulated minute, ramping
    /// linearly to `max_volume` with +/-10 mL jitter and a rate uniform in [0, 20].
    pub fn batch(&self, request: &SimulationRequest, start: DateTime<Utc>) -> Vec<Reading> {
        let Ok(mut rng) = self.rng.lock() else {
            return Vec::new();
        };
        let minutes = request.duration_minutes.max(1);
        let max_volume = f64::from(request.max_volume);

        (0..minutes)
            .filter_map(|i| {
                let ramp = f64::from(i) * max_volume / f64::from(minutes);
                let volume = (ramp + rng.gen_range(-10.0..=10.0)).clamp(0.0, max_volume);
                let rate: f64 = rng.gen_range(0.0..=20.0);
                let ts = start + chrono::Duration::minutes(i64::from(i));
                Reading::new(request.subject_id.clone(), ts, round2(volume), round2(rate)).ok()
            })
            .collect()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulationProfile::default())
    }
}

impl ReadingSource for SimulatedSource {
    fn read(&self, subject: &SubjectId) -> Option<Reading> {
        self.read_at(subject, Utc::now())
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Simulation
    }
}

/// Parameters of a one-shot batch simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default = "default_max_volume")]
    pub max_volume: u32,
    #[serde(default = "default_subject")]
    pub subject_id: SubjectId,
}

fn default_duration_minutes() -> u32 {
    10
}

fn default_max_volume() -> u32 {
    500
}

fn default_subject() -> SubjectId {
    SubjectId::new("test_patient_001").expect("literal subject id is non-empty")
}

impl Default for SimulationRequest {
    fn default() -> Self {
        Self {
            duration_minutes: default_duration_minutes(),
            max_volume: default_max_volume(),
            subject_id: default_subject(),
        }
    }
}

fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
