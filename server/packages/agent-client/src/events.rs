use serde::Deserialize;
use serde_json::Value;

/// One event from the ADK `/run_sse` stream, one JSON object per SSE payload.
///
/// The remote emits more fields than we consume (author, invocation ids, usage
/// metadata); only the parts the translation layer needs are modeled, the rest
/// is ignored on deserialize.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentEvent {
    #[serde(default)]
    pub content: Option<Content>,
    /// True for incremental text deltas; the final event repeats the full text
    /// with `partial` unset.
    #[serde(default)]
    pub partial: bool,
    #[serde(default, alias = "turn_complete", rename = "turnComplete")]
    pub turn_complete: bool,
    /// State-delta / artifact actions attached by the agent.
    #[serde(default)]
    pub actions: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part; exactly one of the fields is normally set, anything else is
/// an unrecognized part kind and gets skipped downstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "functionCall")]
    pub function_call: Option<Value>,
    #[serde(default, rename = "functionResponse")]
    pub function_response: Option<Value>,
}

impl Part {
    pub fn is_recognized(&self) -> bool {
        self.text.is_some() || self.function_call.is_some() || self.function_response.is_some()
    }
}
