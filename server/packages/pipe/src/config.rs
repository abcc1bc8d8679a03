use std::time::Duration;

use adk_pipe_error::PipeError;
use url::Url;

/// The operator-set valves for one adapter instance. Built once at startup and
/// read-only for the process lifetime.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Base URL of the deployed ADK service.
    pub app_url: String,
    /// ADK app name, the first path segment of the session endpoint.
    pub app_name: String,
    /// Model id advertised to the chat host.
    pub model_name: String,
    /// Seeded into new session state so the agent answers in this language.
    pub preferred_language: String,
    /// Optional artificial gap between successive text deltas.
    pub stream_delay: Option<Duration>,
}

impl PipeConfig {
    pub fn validate(&self) -> Result<(), PipeError> {
        let url = Url::parse(&self.app_url)
            .map_err(|err| PipeError::invalid_request(format!("invalid app url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipeError::invalid_request(format!(
                "app url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.app_name.is_empty() {
            return Err(PipeError::invalid_request("app name must not be empty"));
        }
        if self.model_name.is_empty() {
            return Err(PipeError::invalid_request("model name must not be empty"));
        }
        Ok(())
    }
}
