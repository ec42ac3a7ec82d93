//! Query urgency levels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-declared priority class, ordered BATCH < LOW < MEDIUM < HIGH < CRITICAL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Can wait indefinitely
    Batch,
    /// < 10s SLO
    Low,
    /// < 2s SLO
    #[default]
    Medium,
    /// < 500ms SLO
    High,
    /// < 100ms SLO
    Critical,
}

impl Urgency {
    pub const ALL: [Urgency; 5] = [
        Urgency::Batch,
        Urgency::Low,
        Urgency::Medium,
        Urgency::High,
        Urgency::Critical,
    ];

    /// Numeric rank, 1 (BATCH) to 5 (CRITICAL)
    pub fn rank(self) -> u8 {
        match self {
            Urgency::Batch => 1,
            Urgency::Low => 2,
            Urgency::Medium => 3,
            Urgency::High => 4,
            Urgency::Critical => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Batch => "batch",
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
            Urgency::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "batch" | "1" => Ok(Urgency::Batch),
            "low" | "2" => Ok(Urgency::Low),
            "medium" | "3" => Ok(Urgency::Medium),
            "high" | "4" => Ok(Urgency::High),
            "critical" | "5" => Ok(Urgency::Critical),
            other => Err(format!("unknown urgency '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_matches_ordering() {
        for pair in Urgency::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].rank() + 1, pair[1].rank());
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("Critical".parse::<Urgency>(), Ok(Urgency::Critical));
        assert_eq!("2".parse::<Urgency>(), Ok(Urgency::Low));
        assert!("whenever".parse::<Urgency>().is_err());
    }

    #[test]
    fn test_default_is_medium() {
        assert_eq!(Urgency::default(), Urgency::Medium);
    }
}
