//! Fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use carbon_query::carbon::reading::{CarbonReading, Forecast};
use carbon_query::error::{CarbonQueryError, Result};
use carbon_query::execution::{ExecutionBackend, ExecutionHandle, QueryRows};
use carbon_query::metrics::{MetricRecord, MetricsSink};
use carbon_query::{CarbonIntensitySource, ExecutionVariant};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-06-01T18:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn reading(value: f64) -> CarbonReading {
    CarbonReading::new(value, 0.0, fixed_now(), "TEST", "fake")
}

/// Carbon source with a scripted current value and forecast
pub struct FakeCarbon {
    current: Option<f64>,
    forecast: Option<Vec<(i64, f64, f64)>>,
    pub forecast_calls: AtomicUsize,
}

impl FakeCarbon {
    /// `forecast` points are `(hours ahead, value, uncertainty)`
    pub fn new(current: Option<f64>, forecast: Option<Vec<(i64, f64, f64)>>) -> Self {
        Self {
            current,
            forecast,
            forecast_calls: AtomicUsize::new(0),
        }
    }

    pub fn steady(current: f64) -> Self {
        Self::new(Some(current), Some(vec![(1, current, 0.0)]))
    }

    pub fn forecast_calls(&self) -> usize {
        self.forecast_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CarbonIntensitySource for FakeCarbon {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn get_current(&self) -> Result<CarbonReading> {
        self.current
            .map(reading)
            .ok_or_else(|| CarbonQueryError::Carbon("current reading unavailable".to_string()))
    }

    async fn get_forecast(&self, _horizon: Duration) -> Result<Forecast> {
        self.forecast_calls.fetch_add(1, Ordering::SeqCst);
        let points = self
            .forecast
            .as_ref()
            .ok_or_else(|| CarbonQueryError::Carbon("forecast unavailable".to_string()))?;
        Ok(Forecast::new(
            points
                .iter()
                .map(|(hours, value, uncertainty)| {
                    CarbonReading::new(*value, *uncertainty, fixed_now() + Duration::hours(*hours), "TEST", "fake")
                })
                .collect(),
        ))
    }
}

/// Backend that returns canned rows and counts handle requests
#[derive(Default)]
pub struct CountingBackend {
    pub handle_requests: AtomicUsize,
    pub executed: Arc<Mutex<Vec<String>>>,

    /// Runs that succeed before every later run fails
    pub fail_after: Option<usize>,
}

impl CountingBackend {
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    pub fn failing_after(successful_runs: usize) -> Self {
        Self {
            fail_after: Some(successful_runs),
            ..Self::default()
        }
    }

    pub fn handle_requests(&self) -> usize {
        self.handle_requests.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

struct CountingHandle {
    executed: Arc<Mutex<Vec<String>>>,
    fail_after: Option<usize>,
}

#[async_trait]
impl ExecutionHandle for CountingHandle {
    async fn run(&self, sql: &str) -> Result<QueryRows> {
        let runs = {
            let mut executed = self.executed.lock().unwrap();
            executed.push(sql.to_string());
            executed.len()
        };
        if self.fail_after.map_or(false, |limit| runs > limit) {
            return Err(CarbonQueryError::Execution("no such table: orders".to_string()));
        }
        Ok(QueryRows {
            columns: vec!["n".to_string()],
            rows: vec![vec![serde_json::json!(1)]],
        })
    }
}

#[async_trait]
impl ExecutionBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get_handle(&self, _variant: &ExecutionVariant) -> Result<Arc<dyn ExecutionHandle>> {
        self.handle_requests.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingHandle {
            executed: self.executed.clone(),
            fail_after: self.fail_after,
        }))
    }
}

/// Sink that always fails
pub struct BrokenSink;

#[async_trait]
impl MetricsSink for BrokenSink {
    async fn record(&self, _record: MetricRecord) -> Result<()> {
        Err(CarbonQueryError::Metrics("disk full".to_string()))
    }
}
