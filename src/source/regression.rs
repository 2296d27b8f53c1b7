//! Least-squares rate estimation over timestamped volumes.
//!
//! The x axis is "minutes ago" relative to `now`, so a rising volume produces a
//! negative slope. The estimate is the inverted slope, clamped to >= 0.

use chrono::{DateTime, Utc};

/// Minimum points for a meaningful regression.
pub const MIN_POINTS: usize = 2;

/// Estimated bleeding rate in mL/min, or `None` with too few or degenerate points.
#[must_use]
pub fn estimate_rate(points: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Option<f64> {
    if points.len() < MIN_POINTS {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let xs: Vec<f64> = points
        .iter()
        .map(|(ts, _)| (now - *ts).num_milliseconds() as f64 / 60_000.0)
        .collect();
    let ys: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    let slope = least_squares_slope(&xs, &ys)?;
    Some((-slope).max(0.0))
}

/// Standard ordinary least-squares slope.
#[must_use]
pub fn least_squares_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < MIN_POINTS {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0f64;
    let mut var = 0.0f64;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }

    if var <= f64::EPSILON {
        return None;
    }

    let slope = cov / var;
    slope.is_finite().then_some(slope)
}
