//! CPU Energy Estimate - Modelled energy for hosts without a hardware counter
//!
//! Power is the package TDP scaled by this process's CPU utilisation, capped
//! at one full package. Energy accumulates across snapshots so the estimate
//! reads like a cumulative counter.

use crate::error::{CarbonQueryError, Result};
use crate::profiler::counter::{DomainReading, EnergyCounter, EnergySnapshot};
use std::sync::Mutex;
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing::info;

/// Typical desktop/server package TDP
pub const DEFAULT_TDP_WATTS: f64 = 65.0;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// CPU and resident memory of this process at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    /// Utilisation since the previous sample (100 = one core)
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Samples the current process through sysinfo
pub struct ProcessSampler {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessSampler {
    /// `None` when the process table is not readable
    pub fn current() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        let sampler = Self {
            pid,
            system: Mutex::new(System::new()),
        };
        // first refresh only sets the CPU baseline
        sampler.sample().ok()?;
        Some(sampler)
    }

    pub fn sample(&self) -> Result<ProcessSample> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| CarbonQueryError::Profiling("Process sampler mutex poisoned".to_string()))?;

        if !system.refresh_process(self.pid) {
            return Err(CarbonQueryError::Profiling(format!(
                "Process {} not found in process table",
                self.pid
            )));
        }
        let process = system.process(self.pid).ok_or_else(|| {
            CarbonQueryError::Profiling(format!("Process {} not found in process table", self.pid))
        })?;

        Ok(ProcessSample {
            cpu_percent: f64::from(process.cpu_usage()),
            memory_mb: process.memory() as f64 / BYTES_PER_MIB,
        })
    }
}

/// Joules drawn over `seconds` at `cpu_percent` of a `tdp_watts` package
pub fn estimate_joules(tdp_watts: f64, cpu_percent: f64, seconds: f64) -> f64 {
    if !(cpu_percent.is_finite() && seconds.is_finite()) {
        return 0.0;
    }
    let share = (cpu_percent / 100.0).clamp(0.0, 1.0);
    tdp_watts.max(0.0) * share * seconds.max(0.0)
}

struct EstimateState {
    last: Instant,
    accumulated_uj: f64,
}

/// `EnergyCounter` that models energy from CPU utilisation
pub struct CpuEstimateCounter {
    sampler: ProcessSampler,
    tdp_watts: f64,
    state: Mutex<EstimateState>,
}

impl CpuEstimateCounter {
    pub fn detect() -> Option<Self> {
        Self::with_tdp(DEFAULT_TDP_WATTS)
    }

    pub fn with_tdp(tdp_watts: f64) -> Option<Self> {
        let sampler = ProcessSampler::current()?;
        info!("Energy profiling: estimating from CPU utilisation ({:.0} W TDP)", tdp_watts);
        Some(Self {
            sampler,
            tdp_watts,
            state: Mutex::new(EstimateState {
                last: Instant::now(),
                accumulated_uj: 0.0,
            }),
        })
    }

    pub fn tdp_watts(&self) -> f64 {
        self.tdp_watts
    }
}

impl EnergyCounter for CpuEstimateCounter {
    fn name(&self) -> &'static str {
        "cpu-tdp"
    }

    fn is_estimate(&self) -> bool {
        true
    }

    fn snapshot(&self) -> Result<EnergySnapshot> {
        let sample = self.sampler.sample()?;
        let mut state = self
            .state
            .lock()
            .map_err(|_| CarbonQueryError::Profiling("Estimate state mutex poisoned".to_string()))?;

        let now = Instant::now();
        let seconds = now.duration_since(state.last).as_secs_f64();
        state.last = now;
        state.accumulated_uj += estimate_joules(self.tdp_watts, sample.cpu_percent, seconds) * 1_000_000.0;

        Ok(EnergySnapshot {
            domains: vec![DomainReading {
                name: "cpu-estimate".to_string(),
                energy_uj: state.accumulated_uj as u64,
                max_range_uj: u64::MAX,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_scales_with_utilisation() {
        assert!((estimate_joules(65.0, 100.0, 2.0) - 130.0).abs() < 1e-9);
        assert!((estimate_joules(65.0, 50.0, 1.0) - 32.5).abs() < 1e-9);
        assert_eq!(estimate_joules(65.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn test_estimate_caps_at_full_package() {
        // several busy cores still draw at most the package TDP
        assert!((estimate_joules(65.0, 400.0, 1.0) - 65.0).abs() < 1e-9);
        assert_eq!(estimate_joules(65.0, -5.0, 1.0), 0.0);
        assert_eq!(estimate_joules(65.0, f64::NAN, 1.0), 0.0);
    }

    #[test]
    fn test_counter_is_cumulative() {
        let Some(counter) = CpuEstimateCounter::detect() else {
            return;
        };
        assert!(counter.is_estimate());

        let first = counter.snapshot().unwrap();
        let busy = (0..200_000u64).fold(0u64, |acc, x| acc.wrapping_add(x * x));
        assert!(busy > 0);
        let second = counter.snapshot().unwrap();

        assert_eq!(second.domains[0].name, "cpu-estimate");
        assert!(second.domains[0].energy_uj >= first.domains[0].energy_uj);
        assert!(second.joules_since(&first) >= 0.0);
    }

    #[test]
    fn test_sampler_reports_resident_memory() {
        let Some(sampler) = ProcessSampler::current() else {
            return;
        };
        let sample = sampler.sample().unwrap();
        assert!(sample.memory_mb > 0.0);
        assert!(sample.cpu_percent >= 0.0);
    }
}
