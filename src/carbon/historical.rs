//! Historical Pattern Source - Carbon intensity from a typical daily curve
//!
//! Used when no live carbon feed is configured. Midday solar keeps the grid
//! clean, the evening ramp is the dirtiest part of the day.

use crate::carbon::reading::{CarbonReading, Forecast};
use crate::carbon::source::CarbonIntensitySource;
use crate::carbon::uncertainty::{LinearUncertainty, UncertaintyPolicy};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Timelike, Utc};
use std::sync::Arc;

pub const SOURCE_NAME: &str = "historical_pattern";

/// Typical intensity in gCO2/kWh for a local hour of day (0-23)
pub fn intensity_for_hour(hour: u32) -> f64 {
    match hour {
        10..=16 => 220.0 + (hour as f64 - 13.0).abs() * 25.0,
        17..=21 => 520.0 + (hour as f64 - 17.0) * 20.0,
        _ => 380.0,
    }
}

pub struct HistoricalPatternSource {
    zone: String,
    uncertainty: Arc<dyn UncertaintyPolicy>,
    clock: fn() -> DateTime<Utc>,
}

impl HistoricalPatternSource {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            uncertainty: Arc::new(LinearUncertainty::default()),
            clock: Utc::now,
        }
    }

    pub fn with_uncertainty(mut self, policy: Arc<dyn UncertaintyPolicy>) -> Self {
        self.uncertainty = policy;
        self
    }

    /// Replace the wall clock (tests pin the time of day)
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Reading predicted for `at`, `hours_ahead` from now
    pub fn reading_at(&self, at: DateTime<Utc>, hours_ahead: f64) -> CarbonReading {
        let hour = at.with_timezone(&Local).hour();
        let value = intensity_for_hour(hour);
        let uncertainty = if hours_ahead > 0.0 {
            self.uncertainty.uncertainty(value, hours_ahead)
        } else {
            0.0
        };
        CarbonReading::new(value, uncertainty, at, self.zone.clone(), SOURCE_NAME)
    }
}

#[async_trait]
impl CarbonIntensitySource for HistoricalPatternSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn get_current(&self) -> Result<CarbonReading> {
        Ok(self.reading_at((self.clock)(), 0.0))
    }

    async fn get_forecast(&self, horizon: Duration) -> Result<Forecast> {
        let now = (self.clock)();
        let hours = horizon.num_hours().max(0);
        let points = (1..=hours)
            .map(|h| self.reading_at(now + Duration::hours(h), h as f64))
            .collect();
        Ok(Forecast::new(points))
    }
}
