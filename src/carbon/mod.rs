//! Carbon Module - Grid carbon intensity readings, forecasts and sources

pub mod electricity_maps;
pub mod historical;
pub mod reading;
pub mod source;
pub mod uncertainty;

pub use electricity_maps::ElectricityMapsSource;
pub use historical::HistoricalPatternSource;
pub use reading::{CarbonBand, CarbonReading, CarbonThresholds, Forecast};
pub use source::CarbonIntensitySource;
pub use uncertainty::{LinearUncertainty, NoUncertainty, ProportionalUncertainty, UncertaintyPolicy};
