//! Engine Configuration
//!
//! Loaded from a JSON file, from the environment (`.env` is honored by the
//! binary), or both: file first, then environment overrides.

use crate::carbon::electricity_maps::{ElectricityMapsSource, DEFAULT_BASE_URL};
use crate::carbon::historical::HistoricalPatternSource;
use crate::carbon::reading::CarbonThresholds;
use crate::carbon::source::CarbonIntensitySource;
use crate::carbon::uncertainty::LinearUncertainty;
use crate::error::{CarbonQueryError, Result};
use crate::selector::SelectorPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_ZONE: &str = "US-CAL-CISO";
pub const DEFAULT_DB_PATH: &str = "carbon_query.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Grid zone queried for carbon intensity
    pub zone: String,

    /// SQLite database file (or `file:` URI)
    pub db_path: String,

    /// SQL batch run before the first query (schema, seed data)
    pub init_sql: Option<String>,

    pub thresholds: CarbonThresholds,
    pub forecast_horizon_hours: i64,
    pub min_defer_minutes: u32,
    pub fallback_defer_minutes: u32,

    /// Intensity assumed when no carbon source answers (gCO2/kWh)
    pub fallback_carbon_intensity: f64,

    /// Trials per benchmark
    pub profile_iterations: usize,

    /// Overrides the detected core count for the FAST tier
    pub max_threads: Option<usize>,

    pub uncertainty: LinearUncertainty,

    /// Live carbon data is used when set; the historical pattern otherwise
    pub electricity_maps_token: Option<String>,
    pub electricity_maps_base_url: String,

    /// JSON-lines file every execution record is appended to
    pub metrics_log: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            zone: DEFAULT_ZONE.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            init_sql: None,
            thresholds: CarbonThresholds::default(),
            forecast_horizon_hours: 6,
            min_defer_minutes: 15,
            fallback_defer_minutes: 60,
            fallback_carbon_intensity: 475.0,
            profile_iterations: 5,
            max_threads: None,
            uncertainty: LinearUncertainty::default(),
            electricity_maps_token: None,
            electricity_maps_base_url: DEFAULT_BASE_URL.to_string(),
            metrics_log: None,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            CarbonQueryError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            CarbonQueryError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Defaults with process environment overrides
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `CARBON_*` / `ELECTRICITYMAPS_*` overrides from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(zone) = lookup("CARBON_ZONE") {
            self.zone = zone;
        }
        if let Some(db_path) = lookup("CARBON_DB_PATH") {
            self.db_path = db_path;
        }
        if let Some(high) = parse_var(&lookup, "CARBON_HIGH_THRESHOLD")? {
            self.thresholds.high = high;
        }
        if let Some(low) = parse_var(&lookup, "CARBON_LOW_THRESHOLD")? {
            self.thresholds.low = low;
        }
        if let Some(hours) = parse_var(&lookup, "CARBON_FORECAST_HOURS")? {
            self.forecast_horizon_hours = hours;
        }
        if let Some(iterations) = parse_var(&lookup, "CARBON_PROFILE_ITERATIONS")? {
            self.profile_iterations = iterations;
        }
        if let Some(token) = lookup("ELECTRICITYMAPS_API_TOKEN") {
            self.electricity_maps_token = Some(token);
        }
        if let Some(base_url) = lookup("ELECTRICITYMAPS_BASE_URL") {
            self.electricity_maps_base_url = base_url;
        }
        if let Some(log) = lookup("CARBON_METRICS_LOG") {
            self.metrics_log = Some(PathBuf::from(log));
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(t.low <= t.high && t.high <= t.very_high) {
            return Err(CarbonQueryError::Config(format!(
                "Carbon thresholds must satisfy low <= high <= very_high (got {} / {} / {})",
                t.low, t.high, t.very_high
            )));
        }
        if self.forecast_horizon_hours <= 0 {
            return Err(CarbonQueryError::Config(format!(
                "Forecast horizon must be positive (got {} hours)",
                self.forecast_horizon_hours
            )));
        }
        if !(self.fallback_carbon_intensity >= 0.0) {
            return Err(CarbonQueryError::Config(
                "Fallback carbon intensity must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn selector_policy(&self) -> SelectorPolicy {
        SelectorPolicy {
            thresholds: self.thresholds,
            forecast_horizon_hours: self.forecast_horizon_hours,
            min_defer_minutes: self.min_defer_minutes,
            fallback_defer_minutes: self.fallback_defer_minutes,
        }
    }

    /// Electricity Maps when a token is configured, the historical pattern otherwise
    pub fn carbon_source(&self) -> Result<Arc<dyn CarbonIntensitySource>> {
        let uncertainty = Arc::new(self.uncertainty);
        match &self.electricity_maps_token {
            Some(token) => {
                info!("Carbon data: Electricity Maps ({})", self.zone);
                let source = ElectricityMapsSource::new(token.clone(), self.zone.clone())?
                    .with_base_url(self.electricity_maps_base_url.clone())
                    .with_uncertainty(uncertainty);
                Ok(Arc::new(source))
            }
            None => {
                info!("Carbon data: historical pattern ({})", self.zone);
                Ok(Arc::new(
                    HistoricalPatternSource::new(self.zone.clone()).with_uncertainty(uncertainty),
                ))
            }
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CarbonQueryError::Config(format!("Invalid {}={:?}: {}", key, raw, e)))
        })
        .transpose()
}
