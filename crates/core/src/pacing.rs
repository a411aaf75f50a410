//! Pacing classifications shared by analysis and adaptation.

use serde::{Deserialize, Serialize};

/// Pace relative to the expected one-day-per-task schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningVelocity {
    /// actual/expected <= 0.7
    Slow,
    /// Between the bounds, or nothing expected yet
    #[default]
    Normal,
    /// actual/expected >= 1.2
    Fast,
}

impl LearningVelocity {
    /// Classify from completed and expected day counts.
    pub fn classify(actual: usize, expected: usize) -> Self {
        if expected == 0 {
            return LearningVelocity::Normal;
        }
        let ratio = actual as f64 / expected as f64;
        if ratio >= 1.2 {
            LearningVelocity::Fast
        } else if ratio <= 0.7 {
            LearningVelocity::Slow
        } else {
            LearningVelocity::Normal
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningVelocity::Slow => "slow",
            LearningVelocity::Normal => "normal",
            LearningVelocity::Fast => "fast",
        }
    }
}

/// Qualitative bucket of aggregate schedule delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Not behind
    #[default]
    Low,
    /// 1-3 days behind
    Medium,
    /// 4-7 days behind
    High,
    /// More than 7 days behind
    Critical,
}

impl RiskLevel {
    /// Bucket a total number of days behind.
    pub fn from_days_behind(days: usize) -> Self {
        match days {
            0 => RiskLevel::Low,
            1..=3 => RiskLevel::Medium,
            4..=7 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_bounds() {
        assert_eq!(LearningVelocity::classify(0, 0), LearningVelocity::Normal);
        assert_eq!(LearningVelocity::classify(12, 10), LearningVelocity::Fast);
        assert_eq!(LearningVelocity::classify(7, 10), LearningVelocity::Slow);
        assert_eq!(LearningVelocity::classify(8, 10), LearningVelocity::Normal);
        assert_eq!(LearningVelocity::classify(11, 10), LearningVelocity::Normal);
    }

    #[test]
    fn test_risk_buckets() {
        assert_eq!(RiskLevel::from_days_behind(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_days_behind(1), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_days_behind(3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_days_behind(4), RiskLevel::High);
        assert_eq!(RiskLevel::from_days_behind(7), RiskLevel::High);
        assert_eq!(RiskLevel::from_days_behind(8), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"high\"");
    }
}
