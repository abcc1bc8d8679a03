use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adk_pipe_agent_client::{AgentClient, AgentEvent, RunRequest};
use adk_pipe_error::PipeError;
use adk_pipe_identity::TokenChain;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::config::PipeConfig;
use crate::session::SessionRegistry;
use crate::translate::{
    completion_chunk, deltas_for_event, now_secs, user_input_from_messages, ChatDelta, ChatMessage,
};

const DEFAULT_USER_ID: &str = "default";
const DONE_MARKER: &str = "[DONE]";
const KEEP_ALIVE_SECS: u64 = 15;

pub struct AppState {
    pub config: PipeConfig,
    pub token_chain: TokenChain,
    pub agent_client: AgentClient,
    pub sessions: SessionRegistry,
    next_id: AtomicU64,
}

impl AppState {
    pub fn new(config: PipeConfig, token_chain: TokenChain) -> Self {
        let agent_client = AgentClient::new(config.app_url.clone(), config.app_name.clone());
        Self {
            config,
            token_chain,
            agent_client,
            sessions: SessionRegistry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_conversation_id(&self) -> String {
        let value = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("conv_{value}")
    }
}

/// Inbound OpenAI chat-completions request. `chat_id` is the Open WebUI
/// metadata passthrough field keying the conversation.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(get_health))
        .route("/v1/models", get(get_models))
        .route("/v1/chat/completions", post(post_chat_completions))
        .with_state(state)
}

async fn get_health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn get_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{
            "id": state.config.model_name,
            "object": "model",
            "created": now_secs(),
            "owned_by": "adk-pipe",
        }],
    }))
}

async fn post_chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    if !request.stream {
        return problem_response(&PipeError::invalid_request(
            "this adapter only serves streaming completions; set \"stream\": true",
        ));
    }
    if request.messages.is_empty() {
        return problem_response(&PipeError::invalid_request("messages must not be empty"));
    }

    let user_id = request
        .user
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_ID.to_string());
    let conversation_id = request
        .chat_id
        .clone()
        .unwrap_or_else(|| state.next_conversation_id());

    // Token fetch, session bootstrap, and the run request are strictly
    // sequential; any failure before the stream opens is surfaced as a
    // problem response the host renders in the chat.
    let token = match state.token_chain.fetch(&state.config.app_url).await {
        Ok(token) => token,
        Err(err) => {
            warn!(error = %err, "token acquisition failed");
            return problem_response(&err);
        }
    };

    let session_id = match state
        .sessions
        .ensure(
            &state.agent_client,
            &token,
            &user_id,
            &conversation_id,
            &state.config.preferred_language,
        )
        .await
    {
        Ok(session_id) => session_id,
        Err(err) => {
            warn!(error = %err, conversation_id = %conversation_id, "session bootstrap failed");
            return problem_response(&err);
        }
    };

    let run = RunRequest {
        user_id,
        session_id,
        text: user_input_from_messages(&request.messages),
    };
    let events = match state.agent_client.run_sse(&token, &run).await {
        Ok(events) => events,
        Err(err) => {
            warn!(error = %err, "run request failed");
            return problem_response(&err);
        }
    };

    let stream = turn_stream(
        events,
        state.config.model_name.clone(),
        state.config.stream_delay,
    );
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
        .into_response()
}

enum OutFrame {
    Delta(ChatDelta),
    Done,
}

struct TurnState {
    events: BoxStream<'static, Result<AgentEvent, PipeError>>,
    pending: VecDeque<OutFrame>,
    finished: bool,
    texts_emitted: u64,
    model: String,
    delay: Option<Duration>,
}

/// Drive the upstream event stream into `chat.completion.chunk` SSE frames.
/// Each upstream event is fully translated before the next one is awaited; a
/// mid-stream failure becomes one visible error chunk followed by the done
/// marker.
fn turn_stream(
    events: impl Stream<Item = Result<AgentEvent, PipeError>> + Send + 'static,
    model: String,
    delay: Option<Duration>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let state = TurnState {
        events: events.boxed(),
        pending: VecDeque::new(),
        finished: false,
        texts_emitted: 0,
        model,
        delay,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                let event = match frame {
                    OutFrame::Delta(ChatDelta::Text(text)) => {
                        if state.texts_emitted > 0 {
                            if let Some(delay) = state.delay {
                                sleep(delay).await;
                            }
                        }
                        state.texts_emitted += 1;
                        chunk_event(&state.model, &text)
                    }
                    OutFrame::Delta(ChatDelta::Block(block)) => chunk_event(&state.model, &block),
                    OutFrame::Done => Event::default().data(DONE_MARKER),
                };
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => {
                    if event.turn_complete {
                        state.finished = true;
                        state.pending.push_back(OutFrame::Done);
                    } else {
                        for delta in deltas_for_event(&event) {
                            state.pending.push_back(OutFrame::Delta(delta));
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "turn stream interrupted");
                    state.finished = true;
                    state.pending.push_back(OutFrame::Delta(ChatDelta::Block(format!(
                        "\n**Stream error:** {err}\n"
                    ))));
                    state.pending.push_back(OutFrame::Done);
                }
                None => {
                    state.finished = true;
                    state.pending.push_back(OutFrame::Done);
                }
            }
        }
    })
}

fn chunk_event(model: &str, content: &str) -> Event {
    Event::default().data(completion_chunk(model, content).to_string())
}

fn problem_response(err: &PipeError) -> Response {
    let problem = err.to_problem_details();
    let status =
        StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(problem)).into_response()
}
