//! Single point of interaction with the reasoning oracle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use scanner_primitives::{
    AnalysisFragment, CapabilityMap, ServerFindings, ServerName, ToolDeclaration,
};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::contract::{check_findings, check_fragment};
use crate::error::{OracleError, OracleResult};
use crate::oracle::{OracleDescriptor, OracleRequest, ReasoningOracle};

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Default number of re-sends after a contract violation.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Deadline and retry settings for [`OracleGateway`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    call_timeout: Duration,
    max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl GatewayConfig {
    /// Creates a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidRequest`] if `call_timeout` is zero.
    pub fn new(call_timeout: Duration, max_retries: u32) -> OracleResult<Self> {
        if call_timeout.is_zero() {
            return Err(OracleError::invalid_request("oracle call timeout must be non-zero"));
        }
        Ok(Self {
            call_timeout,
            max_retries,
        })
    }

    /// Returns the per-call deadline.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Returns how many times a contract violation is retried.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Enforces the oracle contract: deadline per call, bounded retries on
/// contract violations, and no fabricated results.
///
/// Timeouts and transport failures are returned immediately; the caller
/// decides whether to skip the group, retry later, or abort the run.
#[derive(Clone)]
pub struct OracleGateway {
    oracle: Arc<dyn ReasoningOracle>,
    config: GatewayConfig,
}

impl fmt::Debug for OracleGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleGateway")
            .field("oracle", &self.oracle.descriptor())
            .field("config", &self.config)
            .finish()
    }
}

impl OracleGateway {
    /// Wraps an oracle.
    #[must_use]
    pub fn new(oracle: Arc<dyn ReasoningOracle>, config: GatewayConfig) -> Self {
        Self { oracle, config }
    }

    /// Describes the oracle behind the gateway.
    #[must_use]
    pub fn descriptor(&self) -> OracleDescriptor {
        self.oracle.descriptor()
    }

    /// Returns the gateway settings.
    #[must_use]
    pub const fn config(&self) -> GatewayConfig {
        self.config
    }

    /// Classifies tools through the oracle.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error once the retry budget is spent, or
    /// immediately for timeouts and transport failures.
    pub async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
        let oracle = &self.oracle;
        self.call("classify", || async move {
            let map = oracle.classify(tools).await?;
            if let Some((tool, _)) = map
                .iter()
                .find(|(tool, _)| !tools.iter().any(|decl| decl.tool_ref() == *tool))
            {
                return Err(OracleError::contract(format!(
                    "classification references unknown tool {tool}"
                )));
            }
            Ok::<_, OracleError>(map)
        })
        .await
    }

    /// Evaluates one candidate group.
    ///
    /// Capability vectors attached to the request are unioned into the
    /// returned fragment.
    ///
    /// # Errors
    ///
    /// - [`OracleError::Timeout`] if a call exceeds the deadline;
    /// - [`OracleError::ContractViolation`] once every attempt violated the
    ///   contract;
    /// - [`OracleError::Unavailable`] on transport failure.
    pub async fn analyze(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
        let oracle = &self.oracle;
        let mut fragment = self
            .call("detect_surpluses", || async move {
                let fragment = oracle.detect_surpluses(request).await?;
                check_fragment(&fragment, request)?;
                Ok::<_, OracleError>(fragment)
            })
            .await?;
        if let Some(local) = request.capability_vectors() {
            fragment.capability_vectors.merge_all(local);
        }
        Ok(fragment)
    }

    /// Reviews the declarations of one server.
    ///
    /// # Errors
    ///
    /// Same as [`OracleGateway::analyze`]; an assessment naming undeclared
    /// tools counts as a contract violation.
    pub async fn assess(
        &self,
        server: &ServerName,
        tools: &[ToolDeclaration],
    ) -> OracleResult<ServerFindings> {
        let oracle = &self.oracle;
        self.call("assess_server", || async move {
            let findings = oracle.assess_server(server, tools).await?;
            check_findings(&findings, tools)?;
            Ok::<_, OracleError>(findings)
        })
        .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt_once: F) -> OracleResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OracleResult<T>>,
    {
        let attempts_allowed = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match timeout(self.config.call_timeout, attempt_once()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(operation, attempt, timeout = ?self.config.call_timeout, "oracle call timed out");
                    return Err(OracleError::Timeout {
                        after: self.config.call_timeout,
                    });
                }
            };

            match outcome {
                Ok(value) => {
                    debug!(operation, attempt, "oracle call succeeded");
                    return Ok(value);
                }
                Err(OracleError::ContractViolation { reason, .. }) if attempt < attempts_allowed => {
                    warn!(operation, attempt, %reason, "oracle response violated the contract; retrying");
                }
                Err(OracleError::ContractViolation { reason, .. }) => {
                    return Err(OracleError::ContractViolation {
                        attempts: attempt,
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }
}
