//! Carbon-Aware Selector - Picks a variant and decides whether to defer
//!
//! Matching against the decision table is pure. The forecast is only
//! requested when the deferral rule fires, and a failed or empty forecast
//! degrades to a fixed precautionary deferral. `select` always returns a
//! decision.

use crate::carbon::reading::{CarbonReading, CarbonThresholds, Forecast};
use crate::compiler::{ExecutionStrategy, VariantSet};
use crate::error::Result;
use crate::selector::decision::SelectionDecision;
use crate::selector::rules::{self, RuleAction, RuleInput, SelectionRule};
use crate::selector::urgency::Urgency;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// Tunables of the selection policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorPolicy {
    pub thresholds: CarbonThresholds,

    /// How far ahead the deferral rule looks
    pub forecast_horizon_hours: i64,

    /// Shortest deferral ever recommended
    pub min_defer_minutes: u32,

    /// Deferral used when the forecast is unavailable
    pub fallback_defer_minutes: u32,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            thresholds: CarbonThresholds::default(),
            forecast_horizon_hours: 6,
            min_defer_minutes: 15,
            fallback_defer_minutes: 60,
        }
    }
}

impl SelectorPolicy {
    pub fn forecast_horizon(&self) -> Duration {
        Duration::hours(self.forecast_horizon_hours)
    }
}

/// Carbon-aware variant selector
#[derive(Debug, Clone, Default)]
pub struct CarbonAwareSelector {
    policy: SelectorPolicy,
}

impl CarbonAwareSelector {
    pub fn new(policy: SelectorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SelectorPolicy {
        &self.policy
    }

    /// Decision-table rule that applies to this urgency and reading
    pub fn matching_rule(&self, urgency: Urgency, carbon_now: &CarbonReading) -> &'static SelectionRule {
        rules::first_match(&RuleInput {
            urgency,
            carbon_gco2_per_kwh: carbon_now.value_gco2_per_kwh,
            high_carbon_threshold: self.policy.thresholds.high,
        })
    }

    /// Select a variant for `urgency` given the current reading.
    ///
    /// `forecast_fn` is awaited at most once, and only by the deferral rule.
    pub async fn select<F, Fut>(
        &self,
        urgency: Urgency,
        carbon_now: &CarbonReading,
        forecast_fn: F,
        variants: &VariantSet,
    ) -> SelectionDecision
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = Result<Forecast>>,
    {
        let rule = self.matching_rule(urgency, carbon_now);

        let decision = match rule.action {
            RuleAction::Run { strategy, reason } => {
                self.decision(rule.name, strategy, false, 0, reason.to_string(), carbon_now, variants)
            }
            RuleAction::ConsiderDeferral => {
                let forecast = forecast_fn(self.policy.forecast_horizon()).await;
                self.resolve_deferral(rule.name, carbon_now, forecast, variants)
            }
        };

        info!(
            "Selected {} for {} urgency at {:.0} gCO2/kWh (rule: {}, defer: {})",
            decision.strategy(),
            urgency,
            carbon_now.value_gco2_per_kwh,
            decision.rule,
            decision.should_defer
        );

        decision
    }

    /// Outcome of the deferral rule once the forecast call has returned
    pub fn resolve_deferral(
        &self,
        rule: &str,
        carbon_now: &CarbonReading,
        forecast: Result<Forecast>,
        variants: &VariantSet,
    ) -> SelectionDecision {
        let strategy = ExecutionStrategy::Balanced;
        let threshold = self.policy.thresholds.high;
        let current = carbon_now.value_gco2_per_kwh;

        let forecast = match forecast {
            Ok(forecast) if !forecast.is_empty() => forecast,
            Ok(_) => return self.fallback_deferral(rule, "forecast was empty", carbon_now, variants),
            Err(e) => return self.fallback_deferral(rule, &e.to_string(), carbon_now, variants),
        };

        let min_point = match forecast.min_point() {
            Some(point) => point,
            None => return self.fallback_deferral(rule, "forecast was empty", carbon_now, variants),
        };
        let lower_bound = min_point.lower_bound();

        if lower_bound < threshold {
            let reason = format!(
                "Forecast minimum {:.0} gCO2/kWh has a conservative bound of {:.0}, which already clears the {:.0} threshold; running now (current {:.0} gCO2/kWh).",
                min_point.value_gco2_per_kwh, lower_bound, threshold, current
            );
            return self.decision(rule, strategy, false, 0, reason, carbon_now, variants);
        }

        let minutes_until_min = (min_point.timestamp - carbon_now.timestamp).num_minutes().max(0);
        let defer_minutes = u32::try_from(minutes_until_min)
            .unwrap_or(u32::MAX)
            .max(self.policy.min_defer_minutes);

        let reason = format!(
            "Current carbon {:.0} gCO2/kWh exceeds {:.0}; forecast minimum {:.0} gCO2/kWh at {}, deferring {} minutes.",
            current,
            threshold,
            min_point.value_gco2_per_kwh,
            min_point.timestamp.format("%Y-%m-%d %H:%M UTC"),
            defer_minutes
        );
        self.decision(rule, strategy, true, defer_minutes, reason, carbon_now, variants)
    }

    fn fallback_deferral(
        &self,
        rule: &str,
        cause: &str,
        carbon_now: &CarbonReading,
        variants: &VariantSet,
    ) -> SelectionDecision {
        let minutes = self.policy.fallback_defer_minutes;
        warn!("Carbon forecast unusable, deferring {} minutes: {}", minutes, cause);
        let reason = format!(
            "Carbon forecast unavailable ({}); current {:.0} gCO2/kWh exceeds {:.0}, deferring {} minutes as a precaution.",
            cause, carbon_now.value_gco2_per_kwh, self.policy.thresholds.high, minutes
        );
        self.decision(rule, ExecutionStrategy::Balanced, true, minutes, reason, carbon_now, variants)
    }

    #[allow(clippy::too_many_arguments)]
    fn decision(
        &self,
        rule: &str,
        strategy: ExecutionStrategy,
        should_defer: bool,
        defer_minutes: u32,
        reason: String,
        carbon_now: &CarbonReading,
        variants: &VariantSet,
    ) -> SelectionDecision {
        let variant = variants[strategy].clone();
        let expected_energy_j = variant.estimated_energy_j;

        SelectionDecision {
            expected_carbon_g: carbon_now.carbon_grams(expected_energy_j),
            expected_energy_j,
            chosen_variant: variant,
            should_defer,
            defer_minutes,
            reason,
            rule: rule.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::VariantCompiler;
    use crate::error::CarbonQueryError;
    use chrono::{DateTime, Utc};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-06-01T18:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn reading(value: f64, uncertainty: f64, hours_ahead: i64) -> CarbonReading {
        CarbonReading::new(value, uncertainty, now() + Duration::hours(hours_ahead), "TEST", "test")
    }

    fn variants() -> VariantSet {
        VariantCompiler::with_parallelism(8).compile("SELECT * FROM t")
    }

    #[test]
    fn test_conservative_bound_below_threshold_runs_now() {
        let selector = CarbonAwareSelector::default();
        let forecast = Forecast::new(vec![reading(420.0, 5.0, 1), reading(390.0, 20.0, 3)]);
        let decision = selector.resolve_deferral("carbon-deferral", &reading(450.0, 0.0, 0), Ok(forecast), &variants());
        assert!(!decision.should_defer);
        assert_eq!(decision.defer_minutes, 0);
        assert_eq!(decision.strategy(), ExecutionStrategy::Balanced);
        assert!(decision.reason.contains("already clears"));
    }

    #[test]
    fn test_defers_until_forecast_minimum() {
        let selector = CarbonAwareSelector::default();
        let forecast = Forecast::new(vec![reading(470.0, 10.0, 1), reading(430.0, 20.0, 4)]);
        let decision = selector.resolve_deferral("carbon-deferral", &reading(480.0, 0.0, 0), Ok(forecast), &variants());
        assert!(decision.should_defer);
        assert_eq!(decision.defer_minutes, 240);
        assert!(decision.reason.contains("480"));
        assert!(decision.reason.contains("430"));
    }

    #[test]
    fn test_minimum_deferral_applies() {
        let selector = CarbonAwareSelector::default();
        let soon = CarbonReading::new(460.0, 0.0, now() + Duration::minutes(5), "TEST", "test");
        let forecast = Forecast::new(vec![soon, reading(470.0, 0.0, 2)]);
        let decision = selector.resolve_deferral("carbon-deferral", &reading(480.0, 0.0, 0), Ok(forecast), &variants());
        assert!(decision.should_defer);
        assert_eq!(decision.defer_minutes, 15);
    }

    #[test]
    fn test_forecast_failure_falls_back() {
        let selector = CarbonAwareSelector::default();
        let decision = selector.resolve_deferral(
            "carbon-deferral",
            &reading(450.0, 0.0, 0),
            Err(CarbonQueryError::Carbon("feed down".to_string())),
            &variants(),
        );
        assert!(decision.should_defer);
        assert_eq!(decision.defer_minutes, 60);
        assert!(decision.reason.contains("feed down"));

        let empty = selector.resolve_deferral("carbon-deferral", &reading(450.0, 0.0, 0), Ok(Forecast::default()), &variants());
        assert!(empty.should_defer);
        assert_eq!(empty.defer_minutes, 60);
    }

    #[test]
    fn test_empty_forecast_logs_warning() {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || LogBuffer(sink.clone()))
            .finish();

        let selector = CarbonAwareSelector::default();
        let decision = tracing::subscriber::with_default(subscriber, || {
            selector.resolve_deferral("carbon-deferral", &reading(450.0, 0.0, 0), Ok(Forecast::default()), &variants())
        });

        assert_eq!(decision.defer_minutes, 60);
        let output = String::from_utf8(logs.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("forecast was empty"));
    }

    #[test]
    fn test_expected_carbon() {
        let selector = CarbonAwareSelector::default();
        let forecast = Forecast::new(vec![reading(100.0, 0.0, 1)]);
        let decision = selector.resolve_deferral("carbon-deferral", &reading(450.0, 0.0, 0), Ok(forecast), &variants());
        let expected = decision.expected_energy_j / 3.6e6 * 450.0;
        assert!((decision.expected_carbon_g - expected).abs() < 1e-15);
    }
}
