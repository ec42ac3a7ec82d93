//! Electricity Maps Source - Live carbon intensity over HTTP

use crate::carbon::reading::{CarbonReading, Forecast};
use crate::carbon::source::CarbonIntensitySource;
use crate::carbon::uncertainty::{LinearUncertainty, UncertaintyPolicy};
use crate::error::{CarbonQueryError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const SOURCE_NAME: &str = "electricity_maps";
pub const DEFAULT_BASE_URL: &str = "https://api-access.electricitymaps.com/free-tier";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntensityPoint {
    carbon_intensity: f64,
    datetime: DateTime<Utc>,
    #[serde(default)]
    zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    forecast: Vec<IntensityPoint>,
}

pub struct ElectricityMapsSource {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    zone: String,
    uncertainty: Arc<dyn UncertaintyPolicy>,
}

impl ElectricityMapsSource {
    pub fn new(api_token: String, zone: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| CarbonQueryError::Carbon(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token,
            zone: zone.into(),
            uncertainty: Arc::new(LinearUncertainty::default()),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_uncertainty(mut self, policy: Arc<dyn UncertaintyPolicy>) -> Self {
        self.uncertainty = policy;
        self
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}/carbon-intensity/{}", self.base_url, endpoint);
        debug!("Requesting {} for zone {}", url, self.zone);

        let response = self
            .client
            .get(&url)
            .header("auth-token", &self.api_token)
            .query(&[("zone", self.zone.as_str())])
            .send()
            .await
            .map_err(|e| CarbonQueryError::Carbon(format!("Electricity Maps request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarbonQueryError::Carbon(format!(
                "Electricity Maps returned {}: {}",
                status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CarbonQueryError::Carbon(format!("Failed to parse Electricity Maps response: {}", e)))
    }
}

#[async_trait]
impl CarbonIntensitySource for ElectricityMapsSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn get_current(&self) -> Result<CarbonReading> {
        let point: IntensityPoint = self.fetch("latest").await?;
        Ok(CarbonReading::new(
            point.carbon_intensity,
            0.0,
            point.datetime,
            point.zone.unwrap_or_else(|| self.zone.clone()),
            SOURCE_NAME,
        ))
    }

    async fn get_forecast(&self, horizon: Duration) -> Result<Forecast> {
        let response: ForecastResponse = self.fetch("forecast").await?;
        Ok(forecast_within_horizon(
            response.forecast,
            Utc::now(),
            horizon,
            &self.zone,
            self.uncertainty.as_ref(),
        ))
    }
}

fn forecast_within_horizon(
    points: Vec<IntensityPoint>,
    now: DateTime<Utc>,
    horizon: Duration,
    zone: &str,
    uncertainty: &dyn UncertaintyPolicy,
) -> Forecast {
    let end = now + horizon;
    let readings = points
        .into_iter()
        .filter(|p| p.datetime <= end)
        .map(|p| {
            let hours_ahead = (p.datetime - now).num_minutes() as f64 / 60.0;
            CarbonReading::new(
                p.carbon_intensity,
                uncertainty.uncertainty(p.carbon_intensity, hours_ahead),
                p.datetime,
                p.zone.unwrap_or_else(|| zone.to_string()),
                SOURCE_NAME,
            )
        })
        .collect();
    Forecast::new(readings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forecast_payload_and_trim_horizon() {
        let payload = r#"{
            "zone": "DE",
            "forecast": [
                {"carbonIntensity": 310, "datetime": "2026-05-01T03:00:00Z"},
                {"carbonIntensity": 290, "datetime": "2026-05-01T01:00:00Z"},
                {"carbonIntensity": 150, "datetime": "2026-05-01T09:00:00Z"}
            ]
        }"#;
        let response: ForecastResponse = serde_json::from_str(payload).unwrap();
        let now = DateTime::parse_from_rfc3339("2026-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let forecast = forecast_within_horizon(
            response.forecast,
            now,
            Duration::hours(6),
            "DE",
            &LinearUncertainty::default(),
        );

        assert_eq!(forecast.len(), 2);
        let first = &forecast.points()[0];
        assert_eq!(first.value_gco2_per_kwh, 290.0);
        assert_eq!(first.zone, "DE");
        assert_eq!(first.uncertainty_gco2_per_kwh, 15.0);
        assert_eq!(forecast.points()[1].uncertainty_gco2_per_kwh, 25.0);
    }

    #[test]
    fn test_parse_latest_payload() {
        let payload = r#"{"zone": "US-CAL-CISO", "carbonIntensity": 248, "datetime": "2026-05-01T12:00:00.000Z"}"#;
        let point: IntensityPoint = serde_json::from_str(payload).unwrap();
        assert_eq!(point.carbon_intensity, 248.0);
        assert_eq!(point.zone.as_deref(), Some("US-CAL-CISO"));
    }
}
