//! Variant Compiler - Turns query features into three execution profiles
//!
//! Every compiled query gets exactly one FAST, one BALANCED and one EFFICIENT
//! variant. The compiler performs no I/O and never executes the query.

use crate::analyzer::{QueryAnalyzer, QueryFeatures};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;
use tracing::debug;

/// Execution strategy (latency/energy trade-off)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Latency-optimized: all cores, large memory budget
    Fast,
    /// Middle ground
    Balanced,
    /// Energy-optimized: few cores, small memory budget
    Efficient,
}

impl ExecutionStrategy {
    pub const ALL: [ExecutionStrategy; 3] = [
        ExecutionStrategy::Fast,
        ExecutionStrategy::Balanced,
        ExecutionStrategy::Efficient,
    ];

    pub fn index(self) -> usize {
        match self {
            ExecutionStrategy::Fast => 0,
            ExecutionStrategy::Balanced => 1,
            ExecutionStrategy::Efficient => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::Fast => "fast",
            ExecutionStrategy::Balanced => "balanced",
            ExecutionStrategy::Efficient => "efficient",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(ExecutionStrategy::Fast),
            "balanced" => Ok(ExecutionStrategy::Balanced),
            "efficient" => Ok(ExecutionStrategy::Efficient),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// One value per strategy, stored in a fixed array indexed by strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTable<T> {
    entries: [T; 3],
}

impl<T> StrategyTable<T> {
    pub fn from_fn(mut f: impl FnMut(ExecutionStrategy) -> T) -> Self {
        Self {
            entries: ExecutionStrategy::ALL.map(|strategy| f(strategy)),
        }
    }

    /// Entries in FAST, BALANCED, EFFICIENT order
    pub fn from_entries(entries: [T; 3]) -> Self {
        Self { entries }
    }

    pub fn get(&self, strategy: ExecutionStrategy) -> &T {
        &self.entries[strategy.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExecutionStrategy, &T)> {
        ExecutionStrategy::ALL.into_iter().zip(self.entries.iter())
    }

    pub fn map<U>(self, mut f: impl FnMut(ExecutionStrategy, T) -> U) -> StrategyTable<U> {
        let mut strategies = ExecutionStrategy::ALL.into_iter();
        StrategyTable {
            entries: self.entries.map(|entry| {
                let strategy = strategies.next().unwrap_or(ExecutionStrategy::Balanced);
                f(strategy, entry)
            }),
        }
    }
}

impl<T> Index<ExecutionStrategy> for StrategyTable<T> {
    type Output = T;

    fn index(&self, strategy: ExecutionStrategy) -> &T {
        &self.entries[strategy.index()]
    }
}

impl<T> IndexMut<ExecutionStrategy> for StrategyTable<T> {
    fn index_mut(&mut self, strategy: ExecutionStrategy) -> &mut T {
        &mut self.entries[strategy.index()]
    }
}

/// Resource knobs applied to the execution handle of a tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Worker threads the backend may use
    pub threads: usize,

    /// Memory budget in megabytes
    pub memory_limit_mb: u64,

    pub enable_optimizer: bool,
}

/// A compiled execution profile for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionVariant {
    pub strategy: ExecutionStrategy,
    pub resource_config: ResourceConfig,
    pub estimated_latency_ms: f64,
    pub estimated_energy_j: f64,

    /// SQL to run instead of the original text, if the variant rewrites it
    pub rewritten_sql: Option<String>,
}

impl ExecutionVariant {
    /// SQL text this variant should execute
    pub fn effective_sql<'a>(&'a self, original: &'a str) -> &'a str {
        self.rewritten_sql.as_deref().unwrap_or(original)
    }
}

impl fmt::Display for ExecutionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: threads={} memory={}MB latency~{:.0}ms energy~{:.2}J",
            self.strategy,
            self.resource_config.threads,
            self.resource_config.memory_limit_mb,
            self.estimated_latency_ms,
            self.estimated_energy_j
        )
    }
}

/// The three variants of one compiled query
pub type VariantSet = StrategyTable<ExecutionVariant>;

/// Multi-variant compiler
#[derive(Debug, Clone)]
pub struct VariantCompiler {
    analyzer: QueryAnalyzer,
    max_threads: usize,
}

impl VariantCompiler {
    /// Compiler sized to the cores of this machine
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_parallelism(cores)
    }

    pub fn with_parallelism(max_threads: usize) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(),
            max_threads: max_threads.max(1),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Compile SQL into its FAST, BALANCED and EFFICIENT variants
    pub fn compile(&self, sql: &str) -> VariantSet {
        let features = self.analyzer.analyze(sql);
        self.compile_features(sql, &features)
    }

    /// Compile from already-extracted features
    pub fn compile_features(&self, sql: &str, features: &QueryFeatures) -> VariantSet {
        let base_latency = base_latency_ms(features);
        let base_energy = base_energy_j(features);
        let n = self.max_threads;

        debug!(
            "Compiling variants: base_latency={:.0}ms base_energy={:.2}J cores={}",
            base_latency, base_energy, n
        );

        StrategyTable::from_fn(|strategy| match strategy {
            ExecutionStrategy::Fast => ExecutionVariant {
                strategy,
                resource_config: ResourceConfig {
                    threads: n,
                    memory_limit_mb: 4096,
                    enable_optimizer: true,
                },
                estimated_latency_ms: 0.7 * base_latency,
                estimated_energy_j: 1.25 * base_energy,
                rewritten_sql: None,
            },
            ExecutionStrategy::Balanced => ExecutionVariant {
                strategy,
                resource_config: ResourceConfig {
                    threads: (n / 2).max(1),
                    memory_limit_mb: 2048,
                    enable_optimizer: true,
                },
                estimated_latency_ms: base_latency,
                estimated_energy_j: base_energy,
                rewritten_sql: None,
            },
            ExecutionStrategy::Efficient => {
                let threads = (n / 4).max(1);
                ExecutionVariant {
                    strategy,
                    resource_config: ResourceConfig {
                        threads,
                        memory_limit_mb: 1024,
                        enable_optimizer: true,
                    },
                    estimated_latency_ms: 1.5 * base_latency,
                    estimated_energy_j: 0.7 * base_energy,
                    rewritten_sql: Some(format!("PRAGMA threads = {};\n{}", threads, sql.trim())),
                }
            }
        })
    }
}

impl Default for VariantCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn base_latency_ms(features: &QueryFeatures) -> f64 {
    let mut latency = 200.0;
    if features.has_join {
        latency += 120.0;
    }
    if features.has_aggregation {
        latency += 100.0;
    }
    if features.has_sort {
        latency += 50.0;
    }
    latency + 40.0 * features.extra_tables() as f64
}

fn base_energy_j(features: &QueryFeatures) -> f64 {
    let mut energy = 8.0;
    if features.has_join {
        energy += 4.0;
    }
    if features.has_aggregation {
        energy += 3.0;
    }
    if features.has_sort {
        energy += 1.0;
    }
    energy
}
