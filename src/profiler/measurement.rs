//! Energy Measurement - What one profiled run consumed

use crate::carbon::reading::joules_to_kwh;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of an energy figure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnergySource {
    /// Read from a hardware energy counter
    Hardware { backend: String },

    /// Modelled from process CPU utilisation
    Estimated { backend: String },

    /// No counter available; energy is a zero placeholder
    NoBackend,
}

impl EnergySource {
    pub fn is_measured(&self) -> bool {
        matches!(self, EnergySource::Hardware { .. })
    }

    /// Energy figure is a zero stand-in, not a reading or an estimate
    pub fn is_placeholder(&self) -> bool {
        matches!(self, EnergySource::NoBackend)
    }
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergySource::Hardware { backend } => write!(f, "{}", backend),
            EnergySource::Estimated { backend } => write!(f, "{} estimate", backend),
            EnergySource::NoBackend => write!(f, "no backend"),
        }
    }
}

/// Energy and wall-clock time of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyMeasurement {
    pub energy_joules: f64,
    pub duration_ms: f64,
    pub source: EnergySource,

    /// Process CPU utilisation over the run (100 = one core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,

    /// Resident memory growth over the run, in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_delta_mb: Option<f64>,
}

impl EnergyMeasurement {
    /// Negative or NaN inputs are stored as zero
    pub fn new(energy_joules: f64, duration_ms: f64, source: EnergySource) -> Self {
        Self {
            energy_joules: non_negative(energy_joules),
            duration_ms: non_negative(duration_ms),
            source,
            cpu_percent: None,
            memory_delta_mb: None,
        }
    }

    pub fn with_process_usage(mut self, cpu_percent: f64, memory_delta_mb: f64) -> Self {
        self.cpu_percent = Some(non_negative(cpu_percent));
        self.memory_delta_mb = Some(if memory_delta_mb.is_finite() { memory_delta_mb } else { 0.0 });
        self
    }

    /// Average power draw; zero for a zero-length run
    pub fn power_watts(&self) -> f64 {
        if self.duration_ms > 0.0 {
            self.energy_joules * 1000.0 / self.duration_ms
        } else {
            0.0
        }
    }

    /// Grams CO2 at the given grid intensity (gCO2/kWh)
    pub fn carbon_grams(&self, carbon_intensity_gco2_per_kwh: f64) -> f64 {
        joules_to_kwh(self.energy_joules) * carbon_intensity_gco2_per_kwh
    }
}

impl fmt::Display for EnergyMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} J in {:.2} ms ({:.2} W) [{}]",
            self.energy_joules,
            self.duration_ms,
            self.power_watts(),
            self.source
        )?;
        if let Some(cpu) = self.cpu_percent {
            write!(f, " cpu {:.0}%", cpu)?;
        }
        Ok(())
    }
}

/// Mean of repeated trials with their spread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateEnergyMeasurement {
    /// Mean energy over the measured trials, mean duration over all trials
    pub mean: EnergyMeasurement,

    /// Sample standard deviation of measured energy; zero below two trials
    pub energy_std_dev_joules: f64,

    pub duration_std_dev_ms: f64,
    pub iterations: usize,

    /// Trials whose energy came from a counter; placeholders are excluded
    /// from the energy statistics
    #[serde(default)]
    pub measured_iterations: usize,
}

impl AggregateEnergyMeasurement {
    pub fn from_trials(trials: &[EnergyMeasurement]) -> Self {
        let measured: Vec<&EnergyMeasurement> = trials.iter().filter(|m| !m.source.is_placeholder()).collect();
        let energies: Vec<f64> = measured.iter().map(|m| m.energy_joules).collect();
        let durations: Vec<f64> = trials.iter().map(|m| m.duration_ms).collect();

        let source = measured
            .first()
            .map(|m| m.source.clone())
            .unwrap_or(EnergySource::NoBackend);

        let mut aggregate = EnergyMeasurement::new(mean(&energies), mean(&durations), source);
        let cpu: Vec<f64> = trials.iter().filter_map(|m| m.cpu_percent).collect();
        let memory: Vec<f64> = trials.iter().filter_map(|m| m.memory_delta_mb).collect();
        if !cpu.is_empty() {
            aggregate = aggregate.with_process_usage(mean(&cpu), mean(&memory));
        }

        Self {
            mean: aggregate,
            energy_std_dev_joules: sample_std_dev(&energies),
            duration_std_dev_ms: sample_std_dev(&durations),
            iterations: trials.len(),
            measured_iterations: measured.len(),
        }
    }

    pub fn energy_joules(&self) -> f64 {
        self.mean.energy_joules
    }

    pub fn duration_ms(&self) -> f64 {
        self.mean.duration_ms
    }

    pub fn power_watts(&self) -> f64 {
        self.mean.power_watts()
    }
}

impl fmt::Display for AggregateEnergyMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} ± {:.4} J in {:.2} ± {:.2} ms over {} runs [{}]",
            self.mean.energy_joules,
            self.energy_std_dev_joules,
            self.mean.duration_ms,
            self.duration_std_dev_ms,
            self.iterations,
            self.mean.source
        )?;
        if self.measured_iterations < self.iterations {
            write!(f, " ({} measured)", self.measured_iterations)?;
        }
        Ok(())
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Bessel-corrected standard deviation
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_never_divides_by_zero() {
        let m = EnergyMeasurement::new(5.0, 0.0, EnergySource::NoBackend);
        assert_eq!(m.power_watts(), 0.0);

        let m = EnergyMeasurement::new(2.0, 500.0, EnergySource::NoBackend);
        assert!((m.power_watts() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_inputs_clamped() {
        let m = EnergyMeasurement::new(-1.0, f64::NAN, EnergySource::NoBackend);
        assert_eq!(m.energy_joules, 0.0);
        assert_eq!(m.duration_ms, 0.0);
    }

    #[test]
    fn test_aggregate_statistics() {
        let source = EnergySource::Hardware { backend: "fake".to_string() };
        let trials: Vec<_> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .map(|e| EnergyMeasurement::new(*e, 10.0, source.clone()))
            .collect();
        let agg = AggregateEnergyMeasurement::from_trials(&trials);
        assert_eq!(agg.iterations, 8);
        assert!((agg.energy_joules() - 5.0).abs() < 1e-12);
        // sum of squared deviations is 32, over n - 1 = 7
        assert!((agg.energy_std_dev_joules - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
        assert_eq!(agg.duration_std_dev_ms, 0.0);
        assert_eq!(agg.mean.source, source);
    }

    #[test]
    fn test_placeholder_trials_left_out_of_energy() {
        let source = EnergySource::Hardware { backend: "rapl".to_string() };
        let trials = vec![
            EnergyMeasurement::new(0.0, 10.0, EnergySource::NoBackend),
            EnergyMeasurement::new(10.0, 20.0, source.clone()),
            EnergyMeasurement::new(10.0, 30.0, source.clone()),
        ];
        let agg = AggregateEnergyMeasurement::from_trials(&trials);
        assert_eq!(agg.iterations, 3);
        assert_eq!(agg.measured_iterations, 2);
        assert_eq!(agg.energy_joules(), 10.0);
        assert_eq!(agg.energy_std_dev_joules, 0.0);
        assert_eq!(agg.duration_ms(), 20.0);
        assert_eq!(agg.mean.source, source);
    }

    #[test]
    fn test_all_placeholders_stay_tagged() {
        let trials = vec![
            EnergyMeasurement::new(0.0, 5.0, EnergySource::NoBackend),
            EnergyMeasurement::new(0.0, 7.0, EnergySource::NoBackend),
        ];
        let agg = AggregateEnergyMeasurement::from_trials(&trials);
        assert_eq!(agg.measured_iterations, 0);
        assert_eq!(agg.mean.source, EnergySource::NoBackend);
        assert_eq!(agg.energy_joules(), 0.0);
    }

    #[test]
    fn test_process_usage_averaged() {
        let source = EnergySource::Estimated { backend: "cpu-tdp".to_string() };
        let trials = vec![
            EnergyMeasurement::new(1.0, 10.0, source.clone()).with_process_usage(40.0, 2.0),
            EnergyMeasurement::new(3.0, 10.0, source.clone()).with_process_usage(80.0, -1.0),
        ];
        let agg = AggregateEnergyMeasurement::from_trials(&trials);
        assert_eq!(agg.mean.cpu_percent, Some(60.0));
        assert_eq!(agg.mean.memory_delta_mb, Some(0.5));
        assert!(!agg.mean.source.is_measured());
        assert!(!agg.mean.source.is_placeholder());
    }

    #[test]
    fn test_single_trial_has_zero_spread() {
        let source = EnergySource::Hardware { backend: "rapl".to_string() };
        let trials = vec![EnergyMeasurement::new(3.5, 12.0, source)];
        let agg = AggregateEnergyMeasurement::from_trials(&trials);
        assert_eq!(agg.energy_std_dev_joules, 0.0);
        assert_eq!(agg.energy_joules(), 3.5);
    }

    #[test]
    fn test_carbon_grams() {
        let m = EnergyMeasurement::new(7_200_000.0, 1000.0, EnergySource::NoBackend);
        assert!((m.carbon_grams(475.0) - 950.0).abs() < 1e-9);
    }
}
