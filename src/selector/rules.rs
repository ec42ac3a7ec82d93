//! Selection Rules - Ordered decision table for variant selection
//!
//! Rules are evaluated top to bottom and the first one whose predicate holds
//! decides. The last rule always matches.

use crate::compiler::ExecutionStrategy;
use crate::selector::urgency::Urgency;

/// Scalars the predicates look at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleInput {
    pub urgency: Urgency,
    pub carbon_gco2_per_kwh: f64,
    pub high_carbon_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Run now with a fixed strategy
    Run {
        strategy: ExecutionStrategy,
        reason: &'static str,
    },

    /// Consult the forecast and possibly defer
    ConsiderDeferral,
}

#[derive(Clone, Copy)]
pub struct SelectionRule {
    pub name: &'static str,
    pub applies: fn(&RuleInput) -> bool,
    pub action: RuleAction,
}

impl SelectionRule {
    pub fn matches(&self, input: &RuleInput) -> bool {
        (self.applies)(input)
    }
}

pub const CRITICAL_SLA: &str = "critical-sla";
pub const HIGH_URGENCY: &str = "high-urgency";
pub const CARBON_DEFERRAL: &str = "carbon-deferral";
pub const DEFAULT: &str = "default";

pub static SELECTION_RULES: [SelectionRule; 4] = [
    SelectionRule {
        name: CRITICAL_SLA,
        applies: |input| input.urgency == Urgency::Critical,
        action: RuleAction::Run {
            strategy: ExecutionStrategy::Fast,
            reason: "Critical urgency: SLA requires minimum latency.",
        },
    },
    SelectionRule {
        name: HIGH_URGENCY,
        applies: |input| input.urgency.rank() >= 4,
        action: RuleAction::Run {
            strategy: ExecutionStrategy::Balanced,
            reason: "High urgency: urgency prioritizes completion over efficiency.",
        },
    },
    SelectionRule {
        name: CARBON_DEFERRAL,
        applies: |input| {
            input.urgency.rank() < 3 && input.carbon_gco2_per_kwh > input.high_carbon_threshold
        },
        action: RuleAction::ConsiderDeferral,
    },
    SelectionRule {
        name: DEFAULT,
        applies: |_| true,
        action: RuleAction::Run {
            strategy: ExecutionStrategy::Balanced,
            reason: "Moderate carbon/urgency, default.",
        },
    },
];

/// First rule whose predicate holds
pub fn first_match(input: &RuleInput) -> &'static SelectionRule {
    SELECTION_RULES
        .iter()
        .find(|rule| rule.matches(input))
        .unwrap_or(&SELECTION_RULES[SELECTION_RULES.len() - 1])
}
