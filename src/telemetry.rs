//! Bounded telemetry history and the chart's sliding window.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::envelope::Telemetry;

/// A charted sensor quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Degrees Celsius.
    Temperature,
    /// Relative humidity, percent.
    Humidity,
    /// Barometric pressure, hPa.
    Pressure,
}

impl Metric {
    /// All metrics in display order.
    pub const ALL: [Self; 3] = [Self::Temperature, Self::Humidity, Self::Pressure];

    /// Human-readable name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Temperature => "Temperature",
            Self::Humidity => "Humidity",
            Self::Pressure => "Pressure",
        }
    }

    /// Display unit.
    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Humidity => "%",
            Self::Pressure => "hPa",
        }
    }

    /// Extract this metric from a reading.
    #[must_use]
    pub fn value(self, reading: &Telemetry) -> f64 {
        match self {
            Self::Temperature => reading.temperature,
            Self::Humidity => reading.humidity,
            Self::Pressure => reading.pressure,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.unit())
    }
}

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::zero())
}

/// Most recent readings, newest first, capped at `limit`.
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    readings: VecDeque<Telemetry>,
    limit: usize,
}

impl TelemetryHistory {
    /// Empty history keeping at most `limit` readings.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            readings: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Add a live reading at the front, dropping the oldest beyond the cap.
    pub fn record(&mut self, reading: Telemetry) {
        self.readings.push_front(reading);
        self.readings.truncate(self.limit);
    }

    /// Replace the contents with historical readings (newest first).
    pub fn seed(&mut self, readings: impl IntoIterator<Item = Telemetry>) {
        self.readings = readings.into_iter().take(self.limit).collect();
    }

    /// Newest reading.
    #[must_use]
    pub fn latest(&self) -> Option<&Telemetry> {
        self.readings.front()
    }

    /// Readings newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Telemetry> {
        self.readings.iter()
    }

    /// Number of readings held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Whether no readings are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Maximum number of readings held.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Readings with a timestamp in `[now - span, now + lead]`, oldest first.
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>, span: Duration, lead: Duration) -> Vec<&Telemetry> {
        let from = now - delta(span);
        let to = now + delta(lead);
        let mut inside: Vec<&Telemetry> = self
            .readings
            .iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .collect();
        inside.sort_by_key(|r| r.timestamp);
        inside
    }

    /// `(seconds relative to now, value)` points for `metric` inside the window.
    #[must_use]
    pub fn series(
        &self,
        metric: Metric,
        now: DateTime<Utc>,
        span: Duration,
        lead: Duration,
    ) -> Vec<(f64, f64)> {
        self.window(now, span, lead)
            .into_iter()
            .map(|r| {
                let x = (r.timestamp - now).num_milliseconds() as f64 / 1000.0;
                (x, metric.value(r))
            })
            .collect()
    }
}

/// Padded `[min, max]` of the y values, for chart axes.
#[must_use]
pub fn value_bounds(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut values = points.iter().map(|&(_, y)| y);
    let first = values.next()?;
    let (min, max) = values.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y)));
    let pad = ((max - min) * 0.1).max(0.5);
    Some((min - pad, max + pad))
}
