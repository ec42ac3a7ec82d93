//! Profiler Module - Energy and duration measurement of query runs

pub mod counter;
pub mod energy;
pub mod estimate;
pub mod measurement;

pub use counter::{DomainReading, EnergyCounter, EnergySnapshot, RaplCounter};
pub use energy::EnergyProfiler;
pub use estimate::{CpuEstimateCounter, ProcessSample, ProcessSampler};
pub use measurement::{AggregateEnergyMeasurement, EnergyMeasurement, EnergySource};
