//! Forecast Uncertainty - How wide the band around a predicted value is
//!
//! The growth model is a placeholder that has never been validated against
//! real forecast error, so sources take it as a pluggable policy.

use serde::{Deserialize, Serialize};

/// Uncertainty band for a forecast point
pub trait UncertaintyPolicy: Send + Sync {
    /// Half-width in gCO2/kWh for a prediction `hours_ahead` in the future
    fn uncertainty(&self, value_gco2_per_kwh: f64, hours_ahead: f64) -> f64;
}

/// `base + per_hour * hours_ahead`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearUncertainty {
    pub base_gco2_per_kwh: f64,
    pub per_hour_gco2_per_kwh: f64,
}

impl Default for LinearUncertainty {
    fn default() -> Self {
        Self {
            base_gco2_per_kwh: 10.0,
            per_hour_gco2_per_kwh: 5.0,
        }
    }
}

impl UncertaintyPolicy for LinearUncertainty {
    fn uncertainty(&self, _value_gco2_per_kwh: f64, hours_ahead: f64) -> f64 {
        (self.base_gco2_per_kwh + self.per_hour_gco2_per_kwh * hours_ahead.max(0.0)).max(0.0)
    }
}

/// Fraction of the predicted value per hour ahead
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProportionalUncertainty {
    pub fraction_per_hour: f64,
}

impl UncertaintyPolicy for ProportionalUncertainty {
    fn uncertainty(&self, value_gco2_per_kwh: f64, hours_ahead: f64) -> f64 {
        (value_gco2_per_kwh.abs() * self.fraction_per_hour * hours_ahead.max(0.0)).max(0.0)
    }
}

/// No uncertainty at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUncertainty;

impl UncertaintyPolicy for NoUncertainty {
    fn uncertainty(&self, _value_gco2_per_kwh: f64, _hours_ahead: f64) -> f64 {
        0.0
    }
}
