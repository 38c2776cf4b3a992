//! Boundary to the external coding agent.
//!
//! A phase hands the agent instructions, a JSON schema for the answer, the
//! tools it may use, a working directory and a model, and gets back either a
//! structured value or nothing. Conversational turn-taking happens inside the
//! gateway implementation.
//!
//! Real implementation: [`claude::ClaudeGateway`]. Test double:
//! [`testing::ScriptedGateway`].

pub mod claude;
pub mod stream;
pub mod testing;

use std::path::PathBuf;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::GatewayError;

pub use claude::ClaudeGateway;

/// One request to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub instructions: String,
    /// JSON schema the answer must satisfy.
    pub schema: Value,
    pub allowed_tools: Vec<String>,
    pub cwd: PathBuf,
    pub model: String,
}

impl AgentRequest {
    /// Build a request whose answer deserializes into `T`.
    pub fn for_output<T: JsonSchema>(
        instructions: impl Into<String>,
        allowed_tools: &[String],
        cwd: impl Into<PathBuf>,
        model: &str,
    ) -> Result<Self, GatewayError> {
        let schema = serde_json::to_value(schemars::schema_for!(T)).map_err(GatewayError::Schema)?;
        Ok(Self {
            instructions: instructions.into(),
            schema,
            allowed_tools: allowed_tools.to_vec(),
            cwd: cwd.into(),
            model: model.to_string(),
        })
    }
}

/// An agent that can answer a structured request.
///
/// `Ok(None)` means the agent ran but produced no structured result.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<Option<Value>, GatewayError>;
}

/// Ask the agent for a `T`, retrying up to `max_output_retries` extra times
/// when the answer is missing or does not fit the schema.
///
/// Returns `None` once retries are used up. Process failures are retried the
/// same way and never escape as errors: to the caller they are a failed phase.
pub async fn invoke_structured<T: DeserializeOwned>(
    gateway: &dyn AgentGateway,
    request: &AgentRequest,
    max_output_retries: u32,
) -> Option<T> {
    let attempts = max_output_retries + 1;
    for attempt in 1..=attempts {
        match gateway.invoke(request).await {
            Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                Ok(parsed) => return Some(parsed),
                Err(e) => warn!(attempt, attempts, error = %e, "Agent output did not match schema"),
            },
            Ok(None) => warn!(attempt, attempts, "Agent returned no structured result"),
            Err(e) => warn!(attempt, attempts, error = %e, "Agent invocation failed"),
        }
        debug!(model = %request.model, cwd = %request.cwd.display(), "Retrying agent request");
    }
    None
}
