use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    AuthFailed,
    SessionCreationFailed,
    StreamError,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:adk-pipe:error:invalid_request",
            Self::AuthFailed => "urn:adk-pipe:error:auth_failed",
            Self::SessionCreationFailed => "urn:adk-pipe:error:session_creation_failed",
            Self::StreamError => "urn:adk-pipe:error:stream_error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::AuthFailed => "Auth Failed",
            Self::SessionCreationFailed => "Session Creation Failed",
            Self::StreamError => "Stream Error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::AuthFailed => 502,
            Self::SessionCreationFailed => 502,
            Self::StreamError => 502,
        }
    }
}

/// RFC 7807 problem body returned on the inbound surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("identity token acquisition failed: {attempts}")]
    Auth { attempts: String },
    #[error("session creation failed with status {status}: {body}")]
    SessionCreation { status: u16, body: String },
    #[error("stream error: {message}")]
    Stream { message: String },
}

impl PipeError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::Auth { .. } => ErrorType::AuthFailed,
            Self::SessionCreation { .. } => ErrorType::SessionCreationFailed,
            Self::Stream { .. } => ErrorType::StreamError,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        if let Self::SessionCreation { status, .. } = self {
            extensions.insert(
                "upstreamStatus".to_string(),
                Value::Number(serde_json::Number::from(*status)),
            );
        }
        problem.extensions = extensions;
        problem
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

impl From<PipeError> for ProblemDetails {
    fn from(value: PipeError) -> Self {
        value.to_problem_details()
    }
}

impl From<&PipeError> for ProblemDetails {
    fn from(value: &PipeError) -> Self {
        value.to_problem_details()
    }
}
