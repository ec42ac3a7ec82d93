//! Carbon Reading - Grid carbon intensity at a point in time

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named carbon intensity thresholds in gCO2/kWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbonThresholds {
    /// Below this the grid is considered clean
    pub low: f64,

    /// Above this low-urgency work is a deferral candidate
    pub high: f64,

    /// Above this the grid is considered dirty regardless of forecast
    pub very_high: f64,
}

impl Default for CarbonThresholds {
    fn default() -> Self {
        Self {
            low: 250.0,
            high: 400.0,
            very_high: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarbonBand {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl fmt::Display for CarbonBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CarbonBand::Low => "low",
            CarbonBand::Moderate => "moderate",
            CarbonBand::High => "high",
            CarbonBand::VeryHigh => "very high",
        };
        write!(f, "{}", label)
    }
}

/// Carbon intensity reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonReading {
    /// Grams CO2 per kWh
    pub value_gco2_per_kwh: f64,

    /// Half-width of the uncertainty band, never negative
    pub uncertainty_gco2_per_kwh: f64,

    pub timestamp: DateTime<Utc>,

    /// Grid zone (e.g. "US-CAL-CISO")
    pub zone: String,

    /// Where the value came from (e.g. "historical_pattern", "electricity_maps")
    pub source: String,
}

impl CarbonReading {
    pub fn new(
        value_gco2_per_kwh: f64,
        uncertainty_gco2_per_kwh: f64,
        timestamp: DateTime<Utc>,
        zone: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            value_gco2_per_kwh,
            uncertainty_gco2_per_kwh: uncertainty_gco2_per_kwh.max(0.0),
            timestamp,
            zone: zone.into(),
            source: source.into(),
        }
    }

    /// Stand-in used when no carbon source answered
    pub fn fallback(value_gco2_per_kwh: f64, zone: impl Into<String>) -> Self {
        Self::new(value_gco2_per_kwh, 0.0, Utc::now(), zone, "fallback")
    }

    pub fn is_low(&self, threshold: f64) -> bool {
        self.value_gco2_per_kwh < threshold
    }

    pub fn is_high(&self, threshold: f64) -> bool {
        self.value_gco2_per_kwh > threshold
    }

    /// Optimistic end of the uncertainty band
    pub fn lower_bound(&self) -> f64 {
        self.value_gco2_per_kwh - self.uncertainty_gco2_per_kwh
    }

    pub fn band(&self, thresholds: &CarbonThresholds) -> CarbonBand {
        if self.is_low(thresholds.low) {
            CarbonBand::Low
        } else if self.is_high(thresholds.very_high) {
            CarbonBand::VeryHigh
        } else if self.is_high(thresholds.high) {
            CarbonBand::High
        } else {
            CarbonBand::Moderate
        }
    }

    /// Grams CO2 emitted by consuming `energy_joules` at this intensity
    pub fn carbon_grams(&self, energy_joules: f64) -> f64 {
        joules_to_kwh(energy_joules) * self.value_gco2_per_kwh
    }
}

pub const JOULES_PER_KWH: f64 = 3_600_000.0;

pub fn joules_to_kwh(joules: f64) -> f64 {
    joules / JOULES_PER_KWH
}

/// Forecast readings ordered by timestamp, earliest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    points: Vec<CarbonReading>,
}

impl Forecast {
    pub fn new(mut points: Vec<CarbonReading>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self { points }
    }

    pub fn points(&self) -> &[CarbonReading] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Lowest-intensity point; the earliest one wins ties
    pub fn min_point(&self) -> Option<&CarbonReading> {
        self.points.iter().fold(None, |best: Option<&CarbonReading>, p| match best {
            Some(b) if b.value_gco2_per_kwh <= p.value_gco2_per_kwh => Some(b),
            _ => Some(p),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reading(value: f64, uncertainty: f64, hours: i64) -> CarbonReading {
        let base = DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        CarbonReading::new(value, uncertainty, base + Duration::hours(hours), "TEST", "test")
    }

    #[test]
    fn test_forecast_sorted_and_min_point() {
        let forecast = Forecast::new(vec![
            reading(300.0, 5.0, 3),
            reading(280.0, 5.0, 1),
            reading(280.0, 5.0, 2),
            reading(410.0, 5.0, 0),
        ]);
        let hours: Vec<_> = forecast.points().iter().map(|p| p.timestamp).collect();
        assert!(hours.windows(2).all(|w| w[0] <= w[1]));

        let min = forecast.min_point().unwrap();
        assert_eq!(min.value_gco2_per_kwh, 280.0);
        assert_eq!(min.timestamp, reading(0.0, 0.0, 1).timestamp);
    }

    #[test]
    fn test_bands() {
        let thresholds = CarbonThresholds::default();
        assert_eq!(reading(200.0, 0.0, 0).band(&thresholds), CarbonBand::Low);
        assert_eq!(reading(300.0, 0.0, 0).band(&thresholds), CarbonBand::Moderate);
        assert_eq!(reading(450.0, 0.0, 0).band(&thresholds), CarbonBand::High);
        assert_eq!(reading(600.0, 0.0, 0).band(&thresholds), CarbonBand::VeryHigh);
    }

    #[test]
    fn test_negative_uncertainty_is_clamped() {
        let r = reading(300.0, -12.0, 0);
        assert_eq!(r.uncertainty_gco2_per_kwh, 0.0);
        assert_eq!(r.lower_bound(), 300.0);
    }

    #[test]
    fn test_carbon_grams() {
        let r = reading(360.0, 0.0, 0);
        assert!((r.carbon_grams(3_600_000.0) - 360.0).abs() < 1e-9);
        assert!((r.carbon_grams(36.0) - 0.0036).abs() < 1e-12);
    }
}
