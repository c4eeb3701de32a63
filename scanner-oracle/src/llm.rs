//! Oracle backed by a language model behind a [`ModelAdapter`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use scanner_adapters::traits::{
    InferenceRequest, MessageRole, ModelAdapter, PromptMessage, ResponseFormat, collect_response,
};
use scanner_primitives::{
    AnalysisFragment, CapabilityMap, ServerFindings, ServerName, ToolDeclaration,
};
use tracing::debug;

use crate::contract::{
    ANALYSIS_SCHEMA_NAME, ASSESSMENT_SCHEMA_NAME, CLASSIFICATION_SCHEMA_NAME, ResponseContract,
    analysis_schema, assessment_schema, classification_schema,
};
use crate::error::OracleResult;
use crate::oracle::{OracleDescriptor, OracleRequest, ReasoningOracle};
use crate::prompt::{
    CLASSIFICATION_SYSTEM_PROMPT, COMPOSITION_SYSTEM_PROMPT, INTENT_SYSTEM_PROMPT,
    classification_prompt, composition_prompt, intent_prompt,
};

/// Sampling settings for [`LlmOracle`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LlmOracleConfig {
    /// Fixed decoding temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens, if any.
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: Some(8_192),
        }
    }
}

/// Reasoning oracle that asks a language model for schema-constrained JSON.
///
/// Outputs are not guaranteed to be identical across runs even at
/// temperature zero; the gateway validates every answer instead.
pub struct LlmOracle {
    adapter: Arc<dyn ModelAdapter>,
    config: LlmOracleConfig,
    contract: ResponseContract,
}

impl fmt::Debug for LlmOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmOracle")
            .field("model", &self.adapter.metadata().model())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmOracle {
    /// Wraps an adapter.
    ///
    /// # Errors
    ///
    /// Returns [`crate::OracleError::InvalidRequest`] if the response schemas fail to
    /// compile.
    pub fn new(adapter: Arc<dyn ModelAdapter>, config: LlmOracleConfig) -> OracleResult<Self> {
        Ok(Self {
            adapter,
            config,
            contract: ResponseContract::new()?,
        })
    }

    async fn ask(&self, system: &str, prompt: String, format: ResponseFormat) -> OracleResult<String> {
        let mut request = InferenceRequest::new(vec![PromptMessage::new(MessageRole::User, prompt)])?
            .with_system_prompt(system)
            .with_temperature(self.config.temperature)
            .with_response_format(format);
        if let Some(tokens) = self.config.max_output_tokens {
            request = request.with_max_output_tokens(tokens);
        }

        let stream = self.adapter.infer(request).await?;
        let text = collect_response(stream).await?;
        debug!(
            model = self.adapter.metadata().model(),
            response_bytes = text.len(),
            "oracle answered"
        );
        Ok(text)
    }
}

#[async_trait]
impl ReasoningOracle for LlmOracle {
    fn descriptor(&self) -> OracleDescriptor {
        let metadata = self.adapter.metadata();
        OracleDescriptor::new(metadata.provider(), metadata.model(), self.config.temperature)
    }

    async fn classify(&self, tools: &[ToolDeclaration]) -> OracleResult<CapabilityMap> {
        if tools.is_empty() {
            return Ok(CapabilityMap::new());
        }
        let text = self
            .ask(
                CLASSIFICATION_SYSTEM_PROMPT,
                classification_prompt(tools)?,
                ResponseFormat::json_schema(CLASSIFICATION_SCHEMA_NAME, classification_schema()),
            )
            .await?;
        self.contract.parse_classification(&text, tools)
    }

    async fn detect_surpluses(&self, request: &OracleRequest) -> OracleResult<AnalysisFragment> {
        let text = self
            .ask(
                COMPOSITION_SYSTEM_PROMPT,
                composition_prompt(request)?,
                ResponseFormat::json_schema(ANALYSIS_SCHEMA_NAME, analysis_schema()),
            )
            .await?;
        self.contract.parse_fragment(&text, request)
    }

    async fn assess_server(
        &self,
        server: &ServerName,
        tools: &[ToolDeclaration],
    ) -> OracleResult<ServerFindings> {
        if tools.is_empty() {
            return Ok(ServerFindings::default());
        }
        let text = self
            .ask(
                INTENT_SYSTEM_PROMPT,
                intent_prompt(server, tools)?,
                ResponseFormat::json_schema(ASSESSMENT_SCHEMA_NAME, assessment_schema()),
            )
            .await?;
        self.contract.parse_assessment(&text, tools)
    }
}
