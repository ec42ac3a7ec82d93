//! Carbon Intensity Source - Contract for anything that reports grid carbon

use crate::carbon::reading::{CarbonReading, Forecast};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Duration;

/// Supplies the current carbon intensity and a forecast.
///
/// Both calls may fail; callers degrade instead of propagating.
#[async_trait]
pub trait CarbonIntensitySource: Send + Sync {
    /// Source name (e.g. "historical_pattern", "electricity_maps")
    fn name(&self) -> &'static str;

    async fn get_current(&self) -> Result<CarbonReading>;

    /// Readings ordered by timestamp covering at most `horizon` from now
    async fn get_forecast(&self, horizon: Duration) -> Result<Forecast>;
}
