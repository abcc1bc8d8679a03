use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adk_pipe::app::{build_router, AppState};
use adk_pipe::config::PipeConfig;
use adk_pipe_identity::{TokenChain, TokenSource};
use axum::body::{Body, Bytes};
use axum::extract::Path;
use axum::http::{header, Method, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

const STREAM_BODY: &str = concat!(
    "data: {\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"},\"partial\":true}\n\n",
    "data: {\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"search\",\"args\":{\"q\":\"rust\"}}}]}}\n\n",
    "data: {\"content\":{\"parts\":[{\"functionResponse\":{\"name\":\"search\",\"response\":{\"result\":\"ok\"}}}]}}\n\n",
    "data: {\"turnComplete\":true}\n\n",
);

const UNKNOWN_EVENT_BODY: &str = concat!(
    "data: {\"content\":{\"parts\":[{\"inlineData\":{\"mimeType\":\"image/png\"}}]},\"partial\":true}\n\n",
    "data: {\"turnComplete\":true}\n\n",
);

const LONG_TEXT_BODY: &str = concat!(
    "data: {\"content\":{\"parts\":[{\"text\":\"abcdefghijklmnopqrstuvwxy\"}]},\"partial\":true}\n\n",
    "data: {\"turnComplete\":true}\n\n",
);

struct StaticToken;

impl TokenSource for StaticToken {
    fn name(&self) -> &'static str {
        "static"
    }

    fn fetch(
        &self,
        _audience: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + '_>> {
        Box::pin(async { Ok("tok-test".to_string()) })
    }
}

struct FailingToken(&'static str);

impl TokenSource for FailingToken {
    fn name(&self) -> &'static str {
        self.0
    }

    fn fetch(
        &self,
        _audience: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send + '_>> {
        Box::pin(async { Err("unavailable".to_string()) })
    }
}

struct Fixture {
    addr: SocketAddr,
    sessions_created: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
}

async fn start_fixture(stream_body: &'static str) -> Fixture {
    let sessions_created = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let session_counter = sessions_created.clone();
    let run_counter = runs.clone();
    let app = Router::new()
        .route(
            "/apps/demo/users/:user/sessions/:session",
            post(move |Path((_, session)): Path<(String, String)>| {
                let session_counter = session_counter.clone();
                async move {
                    session_counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"id": session}))
                }
            }),
        )
        .route(
            "/run_sse",
            post(move || {
                let run_counter = run_counter.clone();
                async move {
                    run_counter.fetch_add(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "text/event-stream")], stream_body)
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve fixture");
    });

    Fixture {
        addr,
        sessions_created,
        runs,
    }
}

/// Fixture whose run endpoint streams one event and then drops the connection
/// without the terminating chunk, so the client sees a transport error mid-turn.
async fn start_disconnecting_fixture() -> Fixture {
    let sessions_created = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let session_counter = sessions_created.clone();
    let run_counter = runs.clone();
    let app = Router::new()
        .route(
            "/apps/demo/users/:user/sessions/:session",
            post(move |Path((_, session)): Path<(String, String)>| {
                let session_counter = session_counter.clone();
                async move {
                    session_counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"id": session}))
                }
            }),
        )
        .route(
            "/run_sse",
            post(move || {
                let run_counter = run_counter.clone();
                async move {
                    run_counter.fetch_add(1, Ordering::SeqCst);
                    let frames = futures::stream::iter([
                        Ok(Bytes::from_static(
                            b"data: {\"content\":{\"parts\":[{\"text\":\"Hi\"}],\"role\":\"model\"},\"partial\":true}\n\n",
                        )),
                        Err(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "upstream dropped",
                        )),
                    ])
                    .then(|frame| async move {
                        if frame.is_err() {
                            // Let the first frame flush before the connection dies.
                            tokio::time::sleep(Duration::from_millis(20)).await;
                        }
                        frame
                    });
                    (
                        [(header::CONTENT_TYPE, "text/event-stream")],
                        Body::from_stream(frames),
                    )
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture");
    let addr = listener.local_addr().expect("fixture addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve fixture");
    });

    Fixture {
        addr,
        sessions_created,
        runs,
    }
}

fn pipe_app(fixture: &Fixture, chain: TokenChain, stream_delay: Option<Duration>) -> Router {
    let config = PipeConfig {
        app_url: format!("http://{}", fixture.addr),
        app_name: "demo".to_string(),
        model_name: "demo-agent".to_string(),
        preferred_language: "English".to_string(),
        stream_delay,
    };
    build_router(Arc::new(AppState::new(config, chain)))
}

fn static_chain() -> TokenChain {
    TokenChain::new(vec![Box::new(StaticToken)])
}

async fn post_chat(app: &Router, body: Value) -> (StatusCode, String) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

fn chat_request(chat_id: &str) -> Value {
    json!({
        "model": "demo-agent",
        "messages": [{"role": "user", "content": "hello"}],
        "stream": true,
        "user": "u1",
        "chat_id": chat_id,
    })
}

fn sse_payloads(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

fn delta_contents(body: &str) -> Vec<String> {
    sse_payloads(body)
        .into_iter()
        .filter(|payload| payload != "[DONE]")
        .map(|payload| {
            let chunk: Value = serde_json::from_str(&payload).expect("chunk json");
            chunk["choices"][0]["delta"]["content"]
                .as_str()
                .expect("delta content")
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn translates_agent_stream_into_chat_chunks() {
    let fixture = start_fixture(STREAM_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let (status, body) = post_chat(&app, chat_request("chat-1")).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let contents = delta_contents(&body);
    assert_eq!(contents.len(), 3, "{contents:?}");
    assert_eq!(contents[0], "Hi");
    assert!(contents[1].contains("Function Call:"), "{}", contents[1]);
    assert!(contents[1].contains("\"search\""), "{}", contents[1]);
    assert!(contents[2].contains("Function Response:"), "{}", contents[2]);
    assert!(contents[2].contains("\"ok\""), "{}", contents[2]);
}

#[tokio::test]
async fn session_is_created_once_and_reused_across_turns() {
    let fixture = start_fixture(STREAM_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let (status, _) = post_chat(&app, chat_request("chat-reuse")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_chat(&app, chat_request("chat-reuse")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(fixture.sessions_created.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.runs.load(Ordering::SeqCst), 2);

    // A different conversation gets its own session.
    let (status, _) = post_chat(&app, chat_request("chat-other")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fixture.sessions_created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn auth_failure_never_reaches_the_run_endpoint() {
    let fixture = start_fixture(STREAM_BODY).await;
    let chain = TokenChain::new(vec![
        Box::new(FailingToken("metadata")),
        Box::new(FailingToken("credential-helper")),
    ]);
    let app = pipe_app(&fixture, chain, None);

    let (status, body) = post_chat(&app, chat_request("chat-auth")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("auth_failed"), "{body}");
    assert!(body.contains("metadata: unavailable"), "{body}");

    assert_eq!(fixture.sessions_created.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_streaming_requests_are_rejected() {
    let fixture = start_fixture(STREAM_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let (status, body) = post_chat(
        &app,
        json!({
            "model": "demo-agent",
            "messages": [{"role": "user", "content": "hello"}],
            "stream": false,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid_request"), "{body}");
    assert_eq!(fixture.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unrecognized_event_is_skipped_without_aborting_the_turn() {
    let fixture = start_fixture(UNKNOWN_EVENT_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let (status, body) = post_chat(&app, chat_request("chat-unknown")).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
    assert!(delta_contents(&body).is_empty(), "{body}");
}

#[tokio::test]
async fn midstream_disconnect_emits_visible_error_chunk_then_done() {
    let fixture = start_disconnecting_fixture().await;
    let app = pipe_app(&fixture, static_chain(), None);

    let (status, body) = post_chat(&app, chat_request("chat-drop")).await;
    assert_eq!(status, StatusCode::OK);

    let payloads = sse_payloads(&body);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let contents = delta_contents(&body);
    assert_eq!(
        contents.first().map(String::as_str),
        Some("Hi"),
        "{contents:?}"
    );
    let error_delta = contents.last().expect("error delta");
    assert!(error_delta.contains("Stream error"), "{error_delta}");
    assert!(
        error_delta.contains("run stream interrupted"),
        "{error_delta}"
    );
    assert_eq!(fixture.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn configured_delay_paces_text_deltas() {
    let fixture = start_fixture(LONG_TEXT_BODY).await;
    let app = pipe_app(&fixture, static_chain(), Some(Duration::from_millis(40)));

    let started = Instant::now();
    let (status, body) = post_chat(&app, chat_request("chat-delay")).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    let contents = delta_contents(&body);
    assert_eq!(contents.len(), 3, "{contents:?}");
    // Three fragments mean two inter-delta gaps.
    assert!(elapsed >= Duration::from_millis(80), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn unset_delay_inserts_no_artificial_wait() {
    let fixture = start_fixture(LONG_TEXT_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let started = Instant::now();
    let (status, _) = post_chat(&app, chat_request("chat-nodelay")).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    assert!(elapsed < Duration::from_secs(1), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn models_endpoint_advertises_the_configured_model() {
    let fixture = start_fixture(STREAM_BODY).await;
    let app = pipe_app(&fixture, static_chain(), None);

    let request = Request::builder()
        .method(Method::GET)
        .uri("/v1/models")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body: Value = serde_json::from_slice(&bytes).expect("models json");
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "demo-agent");
}
