//! Carbon-Aware Engine - Compile, select, execute, measure, record
//!
//! The engine owns its collaborators and is the only component that talks
//! to the carbon source, the database backend and the metrics sink.
//!
//! Degradations, each logged and never surfaced as an error:
//! - no current carbon reading: the configured fallback intensity is used
//! - no forecast: the selector falls back to a fixed deferral
//! - no hardware counter: energy is estimated from CPU utilisation, or
//!   zero when the process table is unreadable
//! - metrics sink failure: the record is dropped
//!
//! Backend failures propagate to the caller.

use crate::carbon::reading::CarbonReading;
use crate::carbon::source::CarbonIntensitySource;
use crate::compiler::{ExecutionStrategy, ExecutionVariant, StrategyTable, VariantCompiler};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::execution::{ExecutionBackend, QueryRows, SqliteBackend};
use crate::metrics::{MetricRecord, MetricsSink};
use crate::profiler::{AggregateEnergyMeasurement, EnergyMeasurement, EnergyProfiler};
use crate::selector::{CarbonAwareSelector, SelectionDecision, Urgency};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of `execute`. Rows and measurement are absent when deferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub rows: Option<QueryRows>,
    pub measurement: Option<EnergyMeasurement>,
    pub decision: SelectionDecision,

    /// Reading the decision was made against
    pub carbon: CarbonReading,
}

impl ExecutionOutcome {
    pub fn was_deferred(&self) -> bool {
        self.decision.should_defer
    }

    /// Measured emissions of the run, if it ran
    pub fn carbon_grams(&self) -> Option<f64> {
        self.measurement
            .as_ref()
            .map(|m| m.carbon_grams(self.carbon.value_gco2_per_kwh))
    }
}

/// One strategy's run inside a comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRun {
    pub rows: QueryRows,
    pub measurement: EnergyMeasurement,
}

/// The same query run once on every tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyComparison {
    pub carbon: CarbonReading,
    pub runs: StrategyTable<StrategyRun>,
}

impl StrategyComparison {
    pub fn carbon_grams(&self, strategy: ExecutionStrategy) -> f64 {
        self.runs[strategy]
            .measurement
            .carbon_grams(self.carbon.value_gco2_per_kwh)
    }

    /// Strategy with the lowest measured energy; earlier tiers win ties
    pub fn most_efficient(&self) -> ExecutionStrategy {
        self.runs
            .iter()
            .fold(None, |best: Option<(ExecutionStrategy, f64)>, (strategy, run)| {
                let energy = run.measurement.energy_joules;
                match best {
                    Some((_, best_energy)) if best_energy <= energy => best,
                    _ => Some((strategy, energy)),
                }
            })
            .map(|(strategy, _)| strategy)
            .unwrap_or(ExecutionStrategy::Balanced)
    }
}

/// Repeated trials of one query on one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub strategy: ExecutionStrategy,
    pub rows: QueryRows,
    pub measurement: AggregateEnergyMeasurement,
    pub carbon: CarbonReading,
}

impl BenchmarkResult {
    /// Emissions of one average run
    pub fn carbon_grams(&self) -> f64 {
        self.measurement.mean.carbon_grams(self.carbon.value_gco2_per_kwh)
    }
}

pub struct CarbonAwareEngine {
    config: EngineConfig,
    compiler: VariantCompiler,
    selector: CarbonAwareSelector,
    profiler: EnergyProfiler,
    carbon: Arc<dyn CarbonIntensitySource>,
    backend: Arc<dyn ExecutionBackend>,
    metrics: Arc<dyn MetricsSink>,
}

impl CarbonAwareEngine {
    pub fn new(
        config: EngineConfig,
        carbon: Arc<dyn CarbonIntensitySource>,
        backend: Arc<dyn ExecutionBackend>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let compiler = match config.max_threads {
            Some(threads) => VariantCompiler::with_parallelism(threads),
            None => VariantCompiler::new(),
        };
        let selector = CarbonAwareSelector::new(config.selector_policy());

        info!(
            "CarbonAwareEngine initialized (backend={}, carbon={}, zone={})",
            backend.name(),
            carbon.name(),
            config.zone
        );

        Self {
            config,
            compiler,
            selector,
            profiler: EnergyProfiler::new(),
            carbon,
            backend,
            metrics,
        }
    }

    /// SQLite backend and carbon source built from `config`
    pub fn from_config(config: EngineConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        let carbon = config.carbon_source()?;
        let mut backend = SqliteBackend::open(config.db_path.clone());
        if let Some(init_sql) = &config.init_sql {
            backend = backend.with_init_sql(init_sql.clone());
        }
        Ok(Self::new(config, carbon, Arc::new(backend), metrics))
    }

    pub fn with_profiler(mut self, profiler: EnergyProfiler) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compiler(&self) -> &VariantCompiler {
        &self.compiler
    }

    pub fn selector(&self) -> &CarbonAwareSelector {
        &self.selector
    }

    /// Current grid reading, or the configured fallback when the source fails
    pub async fn current_carbon(&self) -> CarbonReading {
        match self.carbon.get_current().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    "Carbon source {} unavailable, assuming {:.0} gCO2/kWh: {}",
                    self.carbon.name(),
                    self.config.fallback_carbon_intensity,
                    e
                );
                CarbonReading::fallback(self.config.fallback_carbon_intensity, self.config.zone.clone())
            }
        }
    }

    /// Run `sql` on the tier the selector picks, or return a deferral
    pub async fn execute(&self, sql: &str, urgency: Urgency) -> Result<ExecutionOutcome> {
        info!("Executing query with {} urgency", urgency);

        let variants = self.compiler.compile(sql);
        let carbon = self.current_carbon().await;
        info!(
            "Carbon intensity: {:.0} gCO2/kWh ({}, {})",
            carbon.value_gco2_per_kwh,
            carbon.band(&self.config.thresholds),
            carbon.source
        );

        let decision = self
            .selector
            .select(urgency, &carbon, |horizon| self.carbon.get_forecast(horizon), &variants)
            .await;

        if decision.should_defer {
            info!("Query deferred for {} minutes", decision.defer_minutes);
            return Ok(ExecutionOutcome {
                rows: None,
                measurement: None,
                decision,
                carbon,
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("urgency".to_string(), serde_json::Value::from(urgency.as_str()));
        metadata.insert("rule".to_string(), serde_json::Value::from(decision.rule.clone()));

        let (rows, measurement) = self
            .run_variant(sql, &decision.chosen_variant, &carbon, metadata)
            .await?;

        Ok(ExecutionOutcome {
            rows: Some(rows),
            measurement: Some(measurement),
            decision,
            carbon,
        })
    }

    /// Run `sql` once on every tier, bypassing the selector
    pub async fn compare_strategies(&self, sql: &str) -> Result<StrategyComparison> {
        info!("Comparing all strategies");

        let variants = self.compiler.compile(sql);
        let carbon = self.current_carbon().await;

        let fast = self.comparison_run(sql, &variants[ExecutionStrategy::Fast], &carbon).await?;
        let balanced = self.comparison_run(sql, &variants[ExecutionStrategy::Balanced], &carbon).await?;
        let efficient = self.comparison_run(sql, &variants[ExecutionStrategy::Efficient], &carbon).await?;

        Ok(StrategyComparison {
            carbon,
            runs: StrategyTable::from_entries([fast, balanced, efficient]),
        })
    }

    async fn comparison_run(
        &self,
        sql: &str,
        variant: &ExecutionVariant,
        carbon: &CarbonReading,
    ) -> Result<StrategyRun> {
        let mut metadata = HashMap::new();
        metadata.insert("comparison".to_string(), serde_json::Value::Bool(true));

        let (rows, measurement) = self.run_variant(sql, variant, carbon, metadata).await?;
        Ok(StrategyRun { rows, measurement })
    }

    /// Profile `sql` on one tier over repeated trials
    pub async fn benchmark(
        &self,
        sql: &str,
        strategy: ExecutionStrategy,
        iterations: usize,
    ) -> Result<BenchmarkResult> {
        let variants = self.compiler.compile(sql);
        let variant = &variants[strategy];
        let carbon = self.current_carbon().await;

        info!("Benchmarking {} over {} iterations", strategy, iterations.max(1));

        let handle = self.backend.get_handle(variant).await?;
        let effective_sql = variant.effective_sql(sql);
        let (rows, measurement) = self
            .profiler
            .profile_with_uncertainty(|| handle.run(effective_sql), iterations)
            .await?;

        let record = MetricRecord::new(sql, strategy, measurement.mean.clone(), carbon.clone())
            .with_metadata("iterations", measurement.iterations)
            .with_metadata("measured_iterations", measurement.measured_iterations)
            .with_metadata("energy_std_dev_joules", measurement.energy_std_dev_joules)
            .with_metadata("row_count", rows.row_count());
        self.record_metrics(record).await;

        Ok(BenchmarkResult {
            strategy,
            rows,
            measurement,
            carbon,
        })
    }

    async fn run_variant(
        &self,
        sql: &str,
        variant: &ExecutionVariant,
        carbon: &CarbonReading,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<(QueryRows, EnergyMeasurement)> {
        info!("Executing with {}", variant);

        let handle = self.backend.get_handle(variant).await?;
        let effective_sql = variant.effective_sql(sql);
        let (rows, measurement) = self.profiler.profile(|| handle.run(effective_sql)).await;
        let rows = rows?;

        info!(
            "{} run: {} rows, {} ({:.6} g CO2)",
            variant.strategy,
            rows.row_count(),
            measurement,
            measurement.carbon_grams(carbon.value_gco2_per_kwh)
        );

        let mut record = MetricRecord::new(sql, variant.strategy, measurement.clone(), carbon.clone())
            .with_metadata("row_count", rows.row_count());
        record.metadata.extend(metadata);
        self.record_metrics(record).await;

        Ok((rows, measurement))
    }

    async fn record_metrics(&self, record: MetricRecord) {
        if let Err(e) = self.metrics.record(record).await {
            warn!("Failed to record execution metrics: {}", e);
        }
    }
}
