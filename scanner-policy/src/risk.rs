//! Conversion of a severity histogram into an aggregate risk score.

use scanner_primitives::{RiskScore, SeverityHistogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by policy configuration.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A risk policy was configured with unusable parameters.
    #[error("invalid risk policy: {reason}")]
    InvalidPolicy {
        /// Description of the problem.
        reason: String,
    },
}

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// How surplus severities collapse into one [`RiskScore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskPolicy {
    /// Risk is the highest severity observed.
    #[default]
    MaxSeverity,
    /// Max severity, escalated to High when a Medium/Low-only set carries
    /// enough weighted findings.
    WeightedCount {
        /// Weight of each Low surplus.
        low_weight: u32,
        /// Weight of each Medium surplus.
        medium_weight: u32,
        /// Weighted total at which the score becomes High.
        escalate_at: u32,
    },
}

impl RiskPolicy {
    /// Checks the policy parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidPolicy`] for a zero threshold or when
    /// every weight is zero.
    pub fn validate(&self) -> PolicyResult<()> {
        match *self {
            Self::MaxSeverity => Ok(()),
            Self::WeightedCount {
                low_weight,
                medium_weight,
                escalate_at,
            } => {
                if escalate_at == 0 {
                    return Err(PolicyError::InvalidPolicy {
                        reason: "escalate_at must be greater than zero".to_owned(),
                    });
                }
                if low_weight == 0 && medium_weight == 0 {
                    return Err(PolicyError::InvalidPolicy {
                        reason: "at least one weight must be non-zero".to_owned(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Scores a histogram.
    ///
    /// An empty histogram always scores [`RiskScore::None`].
    #[must_use]
    pub fn score(&self, histogram: &SeverityHistogram) -> RiskScore {
        let max = max_severity(histogram);
        match *self {
            Self::MaxSeverity => max,
            Self::WeightedCount {
                low_weight,
                medium_weight,
                escalate_at,
            } => {
                if max >= RiskScore::High || max == RiskScore::None {
                    return max;
                }
                let weighted = weight(histogram.low, low_weight)
                    .saturating_add(weight(histogram.medium, medium_weight));
                if weighted >= u64::from(escalate_at) {
                    RiskScore::High
                } else {
                    max
                }
            }
        }
    }
}

fn max_severity(histogram: &SeverityHistogram) -> RiskScore {
    if histogram.critical > 0 {
        RiskScore::Critical
    } else if histogram.high > 0 {
        RiskScore::High
    } else if histogram.medium > 0 {
        RiskScore::Medium
    } else if histogram.low > 0 {
        RiskScore::Low
    } else {
        RiskScore::None
    }
}

fn weight(count: usize, weight: u32) -> u64 {
    u64::try_from(count)
        .unwrap_or(u64::MAX)
        .saturating_mul(u64::from(weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(low: usize, medium: usize, high: usize, critical: usize) -> SeverityHistogram {
        SeverityHistogram {
            low,
            medium,
            high,
            critical,
            cross_server: 0,
        }
    }

    #[test]
    fn max_severity_is_the_default() {
        let policy = RiskPolicy::default();
        assert_eq!(policy.score(&histogram(0, 0, 0, 0)), RiskScore::None);
        assert_eq!(policy.score(&histogram(7, 0, 0, 0)), RiskScore::Low);
        assert_eq!(policy.score(&histogram(3, 9, 0, 0)), RiskScore::Medium);
        assert_eq!(policy.score(&histogram(0, 1, 1, 0)), RiskScore::High);
        assert_eq!(policy.score(&histogram(0, 0, 1, 1)), RiskScore::Critical);
    }

    #[test]
    fn weighted_count_escalates_only_low_and_medium_sets() {
        let policy = RiskPolicy::WeightedCount {
            low_weight: 1,
            medium_weight: 3,
            escalate_at: 10,
        };
        policy.validate().unwrap();

        assert_eq!(policy.score(&histogram(0, 0, 0, 0)), RiskScore::None);
        assert_eq!(policy.score(&histogram(2, 2, 0, 0)), RiskScore::Medium);
        assert_eq!(policy.score(&histogram(1, 3, 0, 0)), RiskScore::High);
        assert_eq!(policy.score(&histogram(10, 0, 0, 0)), RiskScore::High);
        assert_eq!(policy.score(&histogram(10, 0, 0, 1)), RiskScore::Critical);
    }

    #[test]
    fn degenerate_weights_are_rejected() {
        let zero_threshold = RiskPolicy::WeightedCount {
            low_weight: 1,
            medium_weight: 1,
            escalate_at: 0,
        };
        assert!(zero_threshold.validate().is_err());

        let no_weights = RiskPolicy::WeightedCount {
            low_weight: 0,
            medium_weight: 0,
            escalate_at: 4,
        };
        assert!(no_weights.validate().is_err());
    }

    #[test]
    fn policy_deserialises_from_tagged_config() {
        let policy: RiskPolicy = serde_json::from_str(
            r#"{"kind": "weighted_count", "low_weight": 1, "medium_weight": 2, "escalate_at": 6}"#,
        )
        .unwrap();
        assert!(matches!(policy, RiskPolicy::WeightedCount { escalate_at: 6, .. }));

        let policy: RiskPolicy = serde_json::from_str(r#"{"kind": "max_severity"}"#).unwrap();
        assert_eq!(policy, RiskPolicy::MaxSeverity);
    }
}
