//! Execution Metrics - Per-run energy and carbon records
//!
//! The engine forwards one `MetricRecord` per executed query to a
//! `MetricsSink`. `MetricsCollector` keeps the most recent records in memory
//! (`DEFAULT_RETAINED_RECORDS` unless configured; older ones are evicted and
//! drop out of `summary`) and optionally appends each as a JSON line to a
//! log file, which is never truncated.

use crate::carbon::reading::CarbonReading;
use crate::compiler::ExecutionStrategy;
use crate::error::{CarbonQueryError, Result};
use crate::profiler::measurement::EnergyMeasurement;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Records kept in memory by default
pub const DEFAULT_RETAINED_RECORDS: usize = 10_000;

/// One executed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub query: String,
    pub strategy: ExecutionStrategy,
    pub measurement: EnergyMeasurement,

    /// Grid reading the run was charged against
    pub carbon_reading: CarbonReading,

    pub carbon_grams: f64,

    /// Free-form context (urgency, rule, row count, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MetricRecord {
    pub fn new(
        query: impl Into<String>,
        strategy: ExecutionStrategy,
        measurement: EnergyMeasurement,
        carbon_reading: CarbonReading,
    ) -> Self {
        let carbon_grams = measurement.carbon_grams(carbon_reading.value_gco2_per_kwh);
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            query: query.into(),
            strategy,
            measurement,
            carbon_reading,
            carbon_grams,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Destination for execution records
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: MetricRecord) -> Result<()>;
}

/// Totals over all recorded runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub total_energy_joules: f64,
    pub avg_duration_ms: f64,
    pub total_carbon_grams: f64,
}

/// In-memory collector with an optional JSON-lines log
pub struct MetricsCollector {
    records: Arc<Mutex<VecDeque<MetricRecord>>>,
    retained: usize,
    log_file: Option<PathBuf>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            retained: DEFAULT_RETAINED_RECORDS,
            log_file: None,
        }
    }

    /// Also append every record to `path`
    pub fn with_log_file(path: impl Into<PathBuf>) -> Self {
        Self {
            log_file: Some(path.into()),
            ..Self::new()
        }
    }

    /// Keep at most `max_records` in memory, evicting the oldest
    pub fn with_retention(mut self, max_records: usize) -> Self {
        self.retained = max_records.max(1);
        self
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<MetricRecord> {
        self.records
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> MetricsSummary {
        let records = self.records();
        if records.is_empty() {
            return MetricsSummary::default();
        }

        let count = records.len();
        MetricsSummary {
            count,
            total_energy_joules: records.iter().map(|r| r.measurement.energy_joules).sum(),
            avg_duration_ms: records.iter().map(|r| r.measurement.duration_ms).sum::<f64>() / count as f64,
            total_carbon_grams: records.iter().map(|r| r.carbon_grams).sum(),
        }
    }

    /// Write every record as a pretty-printed JSON array
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records())?;
        fs::write(path, json)?;
        Ok(())
    }

    async fn append_to_log(&self, record: &MetricRecord) -> Result<()> {
        if let Some(ref log_file) = self.log_file {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .await
                .map_err(|e| CarbonQueryError::Metrics(format!("Failed to open metrics log: {}", e)))?;

            file.write_all(line.as_bytes())
                .await
                .map_err(|e| CarbonQueryError::Metrics(format!("Failed to write metrics log: {}", e)))?;
            file.flush()
                .await
                .map_err(|e| CarbonQueryError::Metrics(format!("Failed to write metrics log: {}", e)))?;
        }

        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSink for MetricsCollector {
    async fn record(&self, record: MetricRecord) -> Result<()> {
        self.append_to_log(&record).await?;

        let mut records = self
            .records
            .lock()
            .map_err(|_| CarbonQueryError::Metrics("Metrics store mutex poisoned".to_string()))?;
        while records.len() >= self.retained {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }
}
