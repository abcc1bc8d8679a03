use std::collections::VecDeque;

use adk_pipe_error::PipeError;
use futures::stream::{self, Stream};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

pub mod events;
pub mod sse;

pub use events::{AgentEvent, Content, Part};
pub use sse::SseDecoder;

/// One turn forwarded to the remote agent's run endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub user_id: String,
    pub session_id: String,
    pub text: String,
}

/// HTTP client for a deployed ADK app: session bootstrap plus the streaming
/// run endpoint. Holds no per-turn state; a bearer token is passed per call.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http_client: Client,
    app_url: String,
    app_name: String,
}

impl AgentClient {
    pub fn new(app_url: impl Into<String>, app_name: impl Into<String>) -> Self {
        let app_url = app_url.into().trim_end_matches('/').to_string();
        Self {
            http_client: Client::new(),
            app_url,
            app_name: app_name.into(),
        }
    }

    pub fn app_url(&self) -> &str {
        &self.app_url
    }

    /// Create the remote session backing a conversation. Seeds the session
    /// state with the preferred response language.
    pub async fn create_session(
        &self,
        token: &str,
        user_id: &str,
        session_id: &str,
        preferred_language: &str,
    ) -> Result<(), PipeError> {
        let url = format!(
            "{}/apps/{}/users/{user_id}/sessions/{session_id}",
            self.app_url, self.app_name
        );
        let body = json!({"state": {"preferred_language": preferred_language}});

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipeError::SessionCreation {
                status: 0,
                body: format!("session endpoint unreachable: {err}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // The remote keeps sessions alive across adapter restarts; recreating
        // an id it already knows comes back as a conflict, not a failure.
        if session_already_exists(status, &body) {
            return Ok(());
        }

        Err(PipeError::SessionCreation {
            status: status.as_u16(),
            body,
        })
    }

    /// Open the streaming run endpoint for one turn. Returns a lazy, finite,
    /// non-restartable stream of decoded events; dropping it closes the
    /// upstream connection.
    pub async fn run_sse(
        &self,
        token: &str,
        request: &RunRequest,
    ) -> Result<impl Stream<Item = Result<AgentEvent, PipeError>> + Send, PipeError> {
        let body = json!({
            "app_name": self.app_name,
            "user_id": request.user_id,
            "session_id": request.session_id,
            "new_message": {
                "role": "user",
                "parts": [{"text": request.text}],
            },
            "streaming": true,
        });

        let response = self
            .http_client
            .post(format!("{}/run_sse", self.app_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipeError::stream(format!("run endpoint unreachable: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipeError::stream(format!(
                "run endpoint returned {status}: {body}"
            )));
        }

        Ok(event_stream(response))
    }
}

fn session_already_exists(status: StatusCode, body: &str) -> bool {
    (status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT)
        && body.to_ascii_lowercase().contains("already exists")
}

struct StreamState {
    response: Response,
    decoder: SseDecoder,
    pending: VecDeque<AgentEvent>,
    done: bool,
}

fn event_stream(response: Response) -> impl Stream<Item = Result<AgentEvent, PipeError>> + Send {
    let state = StreamState {
        response,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                if event.turn_complete {
                    state.done = true;
                    state.pending.clear();
                }
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }

            match state.response.chunk().await {
                Ok(Some(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk);
                    for payload in state.decoder.push(&text) {
                        decode_payload(&payload, &mut state.pending);
                    }
                }
                Ok(None) => {
                    state.done = true;
                    if let Some(payload) = state.decoder.finish() {
                        decode_payload(&payload, &mut state.pending);
                    }
                }
                Err(err) => {
                    state.done = true;
                    state.pending.clear();
                    return Some((
                        Err(PipeError::stream(format!("run stream interrupted: {err}"))),
                        state,
                    ));
                }
            }
        }
    })
}

fn decode_payload(payload: &str, pending: &mut VecDeque<AgentEvent>) {
    match serde_json::from_str::<AgentEvent>(payload) {
        Ok(event) => pending.push_back(event),
        // Malformed payloads are skipped, not fatal.
        Err(err) => warn!(error = %err, "skipping unparsable stream event"),
    }
}
