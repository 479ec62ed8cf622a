//! Synthetic telemetry for running the relay without a device attached.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

use super::RelayHandle;
use crate::envelope::Telemetry;

const TEMPERATURE_RANGE: (f64, f64) = (15.0, 35.0);
const HUMIDITY_RANGE: (f64, f64) = (20.0, 90.0);
const PRESSURE_RANGE: (f64, f64) = (980.0, 1040.0);

/// Random-walk sensor readings within plausible bounds.
#[derive(Debug)]
pub struct Simulator {
    rng: StdRng,
    next_id: i64,
    temperature: f64,
    humidity: f64,
    pressure: f64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl Simulator {
    /// Deterministic simulator for tests.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            next_id: 1,
            temperature: 22.0,
            humidity: 45.0,
            pressure: 1013.0,
        }
    }

    /// Produce the next reading stamped `now`.
    pub fn next_reading(&mut self, now: DateTime<Utc>) -> Telemetry {
        self.temperature = drift(&mut self.rng, self.temperature, 0.3, TEMPERATURE_RANGE);
        self.humidity = drift(&mut self.rng, self.humidity, 1.0, HUMIDITY_RANGE);
        self.pressure = drift(&mut self.rng, self.pressure, 0.5, PRESSURE_RANGE);

        let reading = Telemetry {
            id: self.next_id,
            temperature: round1(self.temperature),
            humidity: round1(self.humidity),
            pressure: round1(self.pressure),
            timestamp: now,
        };
        self.next_id += 1;
        reading
    }

    /// Broadcast a reading through `relay` every `interval` until cancelled.
    pub async fn run(mut self, relay: RelayHandle, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        log::info!("[simulator] Emitting readings every {}s", interval.as_secs_f32());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reading = self.next_reading(Utc::now());
                    let reached = relay.broadcast(reading);
                    log::debug!("[simulator] Reading {} sent to {reached} clients", self.next_id - 1);
                }
                () = shutdown.cancelled() => break,
            }
        }
    }
}

fn drift(rng: &mut StdRng, value: f64, step: f64, (min, max): (f64, f64)) -> f64 {
    (value + rng.random_range(-step..=step)).clamp(min, max)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
