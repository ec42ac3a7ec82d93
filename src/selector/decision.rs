//! Selection Decision - The output of one selector call

use crate::compiler::{ExecutionStrategy, ExecutionVariant};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which variant to run and whether to wait for cleaner power first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub chosen_variant: ExecutionVariant,

    /// Advisory: the caller re-invokes after `defer_minutes`
    pub should_defer: bool,
    pub defer_minutes: u32,

    /// Human-readable justification
    pub reason: String,

    pub expected_energy_j: f64,
    pub expected_carbon_g: f64,

    /// Name of the decision-table rule that fired
    pub rule: String,
}

impl SelectionDecision {
    pub fn strategy(&self) -> ExecutionStrategy {
        self.chosen_variant.strategy
    }

    /// Earliest time the query should be re-submitted
    pub fn defer_until(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.should_defer
            .then(|| from + Duration::minutes(i64::from(self.defer_minutes)))
    }

    /// Multi-line summary for logs and the CLI
    pub fn explain(&self) -> String {
        let mut lines = vec![
            format!("Selected: {}", self.strategy()),
            format!("Rule: {}", self.rule),
            format!("Reason: {}", self.reason),
        ];
        if self.should_defer {
            lines.push(format!("Deferring: {} minutes", self.defer_minutes));
        }
        lines.push(format!("Expected energy: {:.2} J", self.expected_energy_j));
        lines.push(format!("Expected carbon: {:.6} g CO2", self.expected_carbon_g));
        lines.join("\n")
    }
}
