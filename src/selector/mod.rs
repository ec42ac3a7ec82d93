//! Selector Module - Carbon-aware variant selection
//!
//! - Urgency: caller-declared priority class
//! - SELECTION_RULES: ordered decision table
//! - CarbonAwareSelector: evaluates the table and resolves deferrals
//! - SelectionDecision: the immutable result

pub mod carbon_aware;
pub mod decision;
pub mod rules;
pub mod urgency;

pub use carbon_aware::{CarbonAwareSelector, SelectorPolicy};
pub use decision::SelectionDecision;
pub use rules::{RuleAction, RuleInput, SelectionRule, SELECTION_RULES};
pub use urgency::Urgency;
