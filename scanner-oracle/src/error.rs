//! Errors raised at the reasoning oracle boundary.

use std::time::Duration;

use scanner_adapters::traits::AdapterError;
use scanner_primitives::FailureKind;

/// Result alias for oracle operations.
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors surfaced by the reasoning oracle boundary.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A single oracle call exceeded its deadline.
    #[error("oracle call timed out after {after:?}")]
    Timeout {
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The external service could not be reached or refused the request.
    #[error("oracle unavailable: {reason}")]
    Unavailable {
        /// Transport or provider failure details.
        reason: String,
    },

    /// The oracle answered, but not in the agreed shape.
    #[error("oracle contract violation after {attempts} attempt(s): {reason}")]
    ContractViolation {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Description of the last violation observed.
        reason: String,
    },

    /// The request handed to the oracle was malformed.
    #[error("invalid oracle request: {reason}")]
    InvalidRequest {
        /// Description of the problem.
        reason: String,
    },
}

impl OracleError {
    /// Convenience constructor for a single-attempt contract violation.
    #[must_use]
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            attempts: 1,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`OracleError::Unavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`OracleError::InvalidRequest`].
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns `true` when re-sending the same request may succeed.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    /// Classifies the error for the failed-group ledger of a run.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Unavailable { .. } => FailureKind::Unavailable,
            Self::ContractViolation { .. } => FailureKind::ContractViolation,
            Self::InvalidRequest { .. } => FailureKind::Rejected,
        }
    }
}

impl From<AdapterError> for OracleError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::InvalidRequest { reason } => Self::InvalidRequest { reason },
            AdapterError::RateLimited { retry_after } => Self::Unavailable {
                reason: match retry_after {
                    Some(delay) => format!("rate limited; retry after {delay:?}"),
                    None => "rate limited".to_owned(),
                },
            },
            other => Self::Unavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_rejections_are_not_contract_violations() {
        let rejected = OracleError::from(AdapterError::InvalidRequest {
            reason: "context length exceeded".to_owned(),
        });
        assert_eq!(rejected.failure_kind(), FailureKind::Rejected);
        assert!(!rejected.is_contract_violation());

        let limited = OracleError::from(AdapterError::RateLimited { retry_after: None });
        assert_eq!(limited.failure_kind(), FailureKind::Unavailable);
        assert_eq!(
            OracleError::contract("prose").failure_kind(),
            FailureKind::ContractViolation
        );
    }
}
