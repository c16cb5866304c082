//! Event types for the agent's stream-json output.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::task::{TaskMetrics, TaskResult};

/// One decoded line of agent output.
///
/// Only [`ResultEvent`] is decoded in full; progress events are kept opaque.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    System(SystemEvent),
    Assistant(OpaqueEvent),
    User(OpaqueEvent),
    Result(ResultEvent),
    #[serde(other)]
    Other,
}

/// System initialization message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Assistant or user turn. The body is not interpreted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OpaqueEvent {
    #[serde(default)]
    pub message: Value,
}

/// Token usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "lenient")]
    pub input_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub output_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub cache_read_input_tokens: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub cache_creation_input_tokens: u64,
}

/// Terminal result event summarising a run.
///
/// Only the `type` tag is required. A field that is `null` or has an
/// unexpected shape decodes as its default instead of rejecting the line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub subtype: String,
    #[serde(default, deserialize_with = "lenient")]
    pub is_error: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub duration_ms: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub duration_api_ms: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub num_turns: u32,
    #[serde(default, deserialize_with = "lenient")]
    pub result: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_cost_usd: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub structured_output: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub permission_denials: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub usage: Usage,
}

impl ResultEvent {
    /// The caller-facing result payload.
    pub fn task_result(&self) -> TaskResult {
        TaskResult {
            content: self.result.clone().unwrap_or_default(),
            structured_output: self.structured_output.clone(),
            session_id: self.session_id.clone(),
            subtype: self.subtype.clone(),
            is_error: self.is_error,
        }
    }

    pub fn metrics(&self) -> TaskMetrics {
        TaskMetrics {
            duration_ms: self.duration_ms,
            duration_api_ms: self.duration_api_ms,
            num_turns: self.num_turns,
            cost_usd: self.total_cost_usd,
            permission_denials: self.permission_denials.len(),
        }
    }
}

/// Decode a field, falling back to the default on `null` or a type mismatch.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}
