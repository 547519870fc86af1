use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode, header};
use axum::routing::post;
use futures_util::TryStreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

mod error;

pub use self::error::RelayError;

use crate::config::{BackendKind, Config};
use crate::rewrite::{rewrite_chat, rewrite_codex};

/// Artificial minimum latency imposed on code-completion requests.
const COMPLETION_DELAY: Duration = Duration::from_millis(100);

/// End-of-stream sentinel emitted to SSE consumers when the code endpoint
/// fails; callers of that endpoint expect a streaming terminator even when
/// no content was produced.
const SSE_DONE: &str = "data: [DONE]\n";

/// Upper bound on inbound request bodies.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Rewrite-and-forward relay shared by both completion endpoints.
#[derive(Clone)]
pub struct ProxyService {
    client: Client,
    config: Arc<Config>,
}

impl ProxyService {
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// POST the rewritten document to `<base>/chat/completions`. The await
    /// runs inside the handler future, so a caller disconnect drops it and
    /// aborts the outbound call with it.
    async fn dispatch(
        &self,
        kind: BackendKind,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, RelayError> {
        let backend = self.config.backend(kind);
        let url = format!("{}/chat/completions", backend.api_base.trim_end_matches('/'));
        debug!("forwarding {:?} completion to {}", kind, url);

        let mut builder = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .bearer_auth(backend.api_key)
            .body(body);
        if let Some(org) = backend.organization.filter(|s| !s.is_empty()) {
            builder = builder.header("OpenAI-Organization", org);
        }
        if let Some(project) = backend.project.filter(|s| !s.is_empty()) {
            builder = builder.header("OpenAI-Project", project);
        }

        builder.send().await.map_err(RelayError::from_send)
    }
}

/// Chat completion relay: rewrite, forward, and mirror the upstream response
/// verbatim. Local failures surface as bare status codes.
pub async fn completions(
    proxy: ProxyService,
    req: Request<Body>,
) -> Result<Response<Body>, StatusCode> {
    let mut doc = read_json_body(req.into_body())
        .await
        .map_err(|err| err.status())?;
    rewrite_chat(&mut doc, &proxy.config);
    let body = serde_json::to_vec(&doc).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let resp = match proxy.dispatch(BackendKind::Chat, body).await {
        Ok(r) => r,
        Err(err) => {
            if err.should_log() {
                warn!("chat completion dispatch failed: {err}");
            }
            return Err(err.status());
        }
    };

    if resp.status() != StatusCode::OK {
        // 上游错误体原样透传给调用方，仅额外记录一份便于排查。
        return Ok(relay_buffered(resp, "chat completion").await);
    }
    Ok(relay_stream(resp))
}

/// Code completion relay: same rewrite-and-forward shape, but every failure
/// is converted to the SSE sentinel abort instead of a bare error body.
pub async fn code_completions(proxy: ProxyService, req: Request<Body>) -> Response<Body> {
    // Deliberate completion throttle; a caller that disconnects during the
    // delay cancels this handler future outright.
    tokio::time::sleep(COMPLETION_DELAY).await;

    let mut doc = match read_json_body(req.into_body()).await {
        Ok(d) => d,
        Err(err) => return abort_codex(err.status()),
    };
    rewrite_codex(&mut doc);
    let body = match serde_json::to_vec(&doc) {
        Ok(b) => b,
        Err(_) => return abort_codex(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let resp = match proxy.dispatch(BackendKind::Codex, body).await {
        Ok(r) => r,
        Err(err) => {
            if err.should_log() {
                warn!("code completion dispatch failed: {err}");
            }
            return abort_codex(err.status());
        }
    };

    if resp.status() != StatusCode::OK {
        let status = resp.status();
        let bytes = resp.bytes().await.unwrap_or_default();
        warn!(
            "code completion upstream returned status {status}: {}",
            String::from_utf8_lossy(&bytes)
        );
        // 与 chat 端点不同：状态码透传，但错误体替换为 SSE 终止哨兵。
        return abort_codex(status);
    }
    relay_stream(resp)
}

/// Read the whole inbound body and parse it as a JSON document.
async fn read_json_body(body: Body) -> Result<Value, RelayError> {
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| RelayError::ClientRead(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| RelayError::ClientRead(e.to_string()))
}

/// Mirror status, content-type, and body of a success response without
/// buffering: the upstream byte stream becomes the response body directly.
fn relay_stream(resp: reqwest::Response) -> Response<Body> {
    let status = resp.status();
    let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
    let stream = resp
        .bytes_stream()
        .inspect_err(|err| warn!("upstream stream error: {err}"));

    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder.body(Body::from_stream(stream)).unwrap()
}

/// Mirror a non-success response after buffering it, so the upstream body
/// can be logged for diagnostics while still reaching the caller unchanged.
async fn relay_buffered(resp: reqwest::Response, what: &str) -> Response<Body> {
    let status = resp.status();
    let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = resp.bytes().await.unwrap_or_default();
    warn!(
        "{what} upstream returned status {status}: {}",
        String::from_utf8_lossy(&bytes)
    );

    let mut builder = Response::builder().status(status);
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder.body(Body::from(bytes)).unwrap()
}

/// SSE-style abort: `text/event-stream` with the literal `data: [DONE]`
/// payload, signalling end-of-stream at the given status.
fn abort_codex(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from(SSE_DONE))
        .unwrap()
}

pub fn router(proxy: ProxyService) -> Router {
    let chat = proxy.clone();
    let codex = proxy;
    Router::new()
        .route(
            "/v1/chat/completions",
            post(move |req| completions(chat.clone(), req)),
        )
        .route(
            "/v1/engines/copilot-codex/completions",
            post(move |req| code_completions(codex.clone(), req)),
        )
}
