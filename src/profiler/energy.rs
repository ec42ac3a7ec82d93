//! Energy Profiler - Wraps an async operation with duration and energy capture
//!
//! Energy comes from an optional `EnergyCounter`: RAPL when the host exposes
//! it, a CPU-utilisation estimate otherwise. Without either, or when a
//! reading fails, the measurement carries zero joules tagged `NoBackend`
//! and the operation still runs.

use crate::error::Result;
use crate::profiler::counter::{EnergyCounter, EnergySnapshot, RaplCounter};
use crate::profiler::estimate::{CpuEstimateCounter, ProcessSample, ProcessSampler};
use crate::profiler::measurement::{AggregateEnergyMeasurement, EnergyMeasurement, EnergySource};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct EnergyProfiler {
    counter: Option<Arc<dyn EnergyCounter>>,
    sampler: Option<Arc<ProcessSampler>>,
}

impl EnergyProfiler {
    /// Profiler backed by whatever counter the host exposes
    pub fn new() -> Self {
        let profiler = if let Some(counter) = RaplCounter::detect() {
            Self::with_counter(Arc::new(counter))
        } else if let Some(counter) = CpuEstimateCounter::detect() {
            Self::with_counter(Arc::new(counter))
        } else {
            info!("Energy profiling: no energy counter available, reporting durations only");
            Self::without_counter()
        };
        profiler.with_process_sampling()
    }

    pub fn with_counter(counter: Arc<dyn EnergyCounter>) -> Self {
        Self {
            counter: Some(counter),
            sampler: None,
        }
    }

    pub fn without_counter() -> Self {
        Self {
            counter: None,
            sampler: None,
        }
    }

    /// Also record CPU utilisation and memory growth of each run
    pub fn with_process_sampling(mut self) -> Self {
        self.sampler = ProcessSampler::current().map(Arc::new);
        self
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.counter.as_ref().map(|c| c.name())
    }

    /// Await `operation` once and measure what it consumed
    pub async fn profile<F, Fut, T>(&self, operation: F) -> (T, EnergyMeasurement)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let usage_before = self.sample_process();
        let before = self.read_counter();
        let started = Instant::now();

        let result = operation().await;

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let after = before.as_ref().and_then(|_| self.read_counter());
        let usage_after = usage_before.and_then(|_| self.sample_process());

        let mut measurement = match (before, after, self.counter.as_ref()) {
            (Some(before), Some(after), Some(counter)) => {
                let backend = counter.name().to_string();
                let source = if counter.is_estimate() {
                    EnergySource::Estimated { backend }
                } else {
                    EnergySource::Hardware { backend }
                };
                EnergyMeasurement::new(after.joules_since(&before), duration_ms, source)
            }
            _ => EnergyMeasurement::new(0.0, duration_ms, EnergySource::NoBackend),
        };
        if let (Some(before), Some(after)) = (usage_before, usage_after) {
            measurement = measurement.with_process_usage(after.cpu_percent, after.memory_mb - before.memory_mb);
        }

        debug!("Profiled operation: {}", measurement);
        (result, measurement)
    }

    /// One untimed warm-up call, then `iterations` sequential trials.
    ///
    /// Returns the first trial's value. Zero iterations runs one trial. The
    /// first failing call, warm-up included, ends the run with its error.
    pub async fn profile_with_uncertainty<F, Fut, T>(
        &self,
        mut operation: F,
        iterations: usize,
    ) -> Result<(T, AggregateEnergyMeasurement)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let iterations = iterations.max(1);

        // warm-up: page cache, prepared statements, lazy handles
        operation().await?;

        let (first, first_measurement) = self.profile(&mut operation).await;
        let first = first?;
        let mut trials = Vec::with_capacity(iterations);
        trials.push(first_measurement);

        for trial in 2..=iterations {
            let (result, measurement) = self.profile(&mut operation).await;
            if let Err(e) = result {
                warn!("Trial {} of {} failed: {}", trial, iterations, e);
                return Err(e);
            }
            trials.push(measurement);
        }

        let aggregate = AggregateEnergyMeasurement::from_trials(&trials);
        if aggregate.measured_iterations < iterations {
            warn!(
                "Energy counter answered for {} of {} trials",
                aggregate.measured_iterations, iterations
            );
        }
        info!("Profiled {} trials: {}", iterations, aggregate);
        Ok((first, aggregate))
    }

    fn read_counter(&self) -> Option<EnergySnapshot> {
        let counter = self.counter.as_ref()?;
        match counter.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Energy counter {} unreadable, reporting zero energy: {}", counter.name(), e);
                None
            }
        }
    }

    fn sample_process(&self) -> Option<ProcessSample> {
        let sampler = self.sampler.as_ref()?;
        match sampler.sample() {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!("Process sample failed: {}", e);
                None
            }
        }
    }
}

impl Default for EnergyProfiler {
    fn default() -> Self {
        Self::new()
    }
}
