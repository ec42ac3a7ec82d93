//! carbon-query - Carbon-aware SQL execution
//!
//! A query is compiled into FAST / BALANCED / EFFICIENT variants, one is
//! picked from the current grid carbon intensity and the caller's urgency
//! (or the run is deferred to a cleaner window), and the run is profiled
//! for energy and emissions.

pub mod analyzer;
pub mod carbon;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod profiler;
pub mod selector;

pub use analyzer::{QueryAnalyzer, QueryFeatures};
pub use carbon::{CarbonIntensitySource, CarbonReading, Forecast};
pub use compiler::{ExecutionStrategy, ExecutionVariant, ResourceConfig, StrategyTable, VariantCompiler, VariantSet};
pub use config::EngineConfig;
pub use engine::{BenchmarkResult, CarbonAwareEngine, ExecutionOutcome, StrategyComparison, StrategyRun};
pub use error::{CarbonQueryError, Result};
pub use execution::{ExecutionBackend, ExecutionHandle, QueryRows, SqliteBackend};
pub use metrics::{MetricRecord, MetricsCollector, MetricsSink, MetricsSummary};
pub use profiler::{AggregateEnergyMeasurement, EnergyMeasurement, EnergyProfiler, EnergySource};
pub use selector::{CarbonAwareSelector, SelectionDecision, SelectorPolicy, Urgency};
