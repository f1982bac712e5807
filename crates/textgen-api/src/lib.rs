//! HTTP API: JSON generation, SSE streaming, stop and tokenizer helpers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use textgen_backend::mock::{MockBatchBackend, MockCustomBackend, MockTokenizer};
use textgen_backend::{BackendKind, LoadedModel};
use textgen_common::config::ServerConfig;
use textgen_common::{GenError, GenerationState, Result};
use textgen_core::{ReplyRequest, SessionManager, TextGenerator};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Capacity of the channel between the generation thread and an SSE response.
const SSE_BUFFER: usize = 16;

#[derive(Clone)]
pub struct AppState {
    generator: Arc<TextGenerator>,
    defaults: GenerationState,
}

/// Router built from [`ServerConfig::load`].
pub fn app() -> Result<Router> {
    let cfg = ServerConfig::load()?;
    Ok(router(&cfg))
}

pub fn router(cfg: &ServerConfig) -> Router {
    let generator = TextGenerator::new(SessionManager::new()).with_model(select_model(cfg));
    app_with(Arc::new(generator), cfg.defaults.clone())
}

pub fn app_with(generator: Arc<TextGenerator>, defaults: GenerationState) -> Router {
    textgen_obs::init();
    let state = AppState { generator, defaults };

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/generate", post(generate))
        .route("/v1/generate/stream", post(generate_stream))
        .route("/v1/stop", post(stop))
        .route("/v1/token-count", post(token_count))
        .route("/v1/tokens", post(tokens))
        .route("/openapi.json", get(openapi))
        .with_state(state)
}

/// The in-process model served when no real backend is wired in.
pub fn select_model(cfg: &ServerConfig) -> LoadedModel {
    let delay = Duration::from_millis(cfg.token_delay_ms);
    let tokenizer = Arc::new(MockTokenizer::new());
    tracing::info!(target: "api", "serving mock model `{}` on the {} backend", cfg.model_name, cfg.backend);
    match cfg.backend {
        BackendKind::Batch => LoadedModel::batch(
            cfg.model_name.clone(),
            Arc::new(MockBatchBackend::fixed(cfg.mock_reply.clone()).with_token_delay(delay)),
            tokenizer,
        ),
        BackendKind::Custom => LoadedModel::custom(
            cfg.model_name.clone(),
            Arc::new(MockCustomBackend::fixed(cfg.mock_reply.clone()).with_token_delay(delay)),
            tokenizer,
        ),
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<GenError> for ApiError {
    fn from(e: GenError) -> Self {
        let status = match &e {
            e if e.is_caller_error() => StatusCode::BAD_REQUEST,
            GenError::NoModelLoaded | GenError::NoTokenizer => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!(target: "api", "generation task failed: {}", e);
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: "generation task failed".into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

async fn metrics() -> impl IntoResponse {
    ([("content-type", textgen_obs::content_type())], textgen_obs::gather_text())
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.generator.model() {
        Some(_) => (StatusCode::OK, "ready"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no-model"),
    }
}

#[derive(serde::Deserialize)]
struct GenerateRequest {
    prompt: String,
    #[serde(default)]
    state: GenerationState,
    #[serde(default)]
    stopping_strings: Vec<String>,
    #[serde(default)]
    chat: bool,
}

impl GenerateRequest {
    fn into_reply_request(self, defaults: &GenerationState, stream: bool) -> ReplyRequest {
        let mut state = defaults.merged(&self.state);
        state.set_stream(stream);
        let request = ReplyRequest::new(self.prompt, state).with_stopping_strings(self.stopping_strings);
        if self.chat {
            request.chat()
        } else {
            request
        }
    }
}

#[derive(serde::Serialize)]
struct ReplyBody {
    text: String,
    new_tokens: usize,
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> std::result::Result<Json<ReplyBody>, ApiError> {
    textgen_obs::record_request("generate");
    tracing::info!(target: "api", "generate request");
    let request = req.into_reply_request(&state.defaults, false);
    let generator = state.generator.clone();
    let last = tokio::task::spawn_blocking(move || {
        generator.generate_reply_token(request).map(|replies| replies.last())
    })
    .await??;
    let (text, new_tokens) = last.unwrap_or_default();
    Ok(Json(ReplyBody { text, new_tokens }))
}

async fn generate_stream(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> std::result::Result<Sse<ReceiverStream<std::result::Result<Event, Infallible>>>, ApiError> {
    textgen_obs::record_request("generate_stream");
    tracing::info!(target: "api", "streaming generate request");
    let request = req.into_reply_request(&state.defaults, true);
    let generator = state.generator.clone();
    let (tx, rx) = mpsc::channel(SSE_BUFFER);
    let (started_tx, started_rx) = oneshot::channel();

    tokio::task::spawn_blocking(move || {
        let replies = match generator.generate_reply_token(request) {
            Ok(replies) => {
                let _ = started_tx.send(Ok(()));
                replies
            }
            Err(e) => {
                let _ = started_tx.send(Err(e));
                return;
            }
        };
        for (text, new_tokens) in replies {
            let event = match Event::default().json_data(ReplyBody { text, new_tokens }) {
                Ok(event) => event,
                Err(e) => {
                    tracing::error!(target: "api", "failed to encode event: {}", e);
                    break;
                }
            };
            // A closed channel means the client went away; dropping the
            // iterator ends generation and frees the slot.
            if tx.blocking_send(Ok(event)).is_err() {
                tracing::debug!(target: "api", "stream client disconnected");
                break;
            }
        }
    });

    match started_rx.await {
        Ok(Ok(())) => Ok(Sse::new(ReceiverStream::new(rx))),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: "generation task failed".into() }),
    }
}

async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    textgen_obs::record_request("stop");
    state.generator.stop_everything();
    "ok"
}

#[derive(serde::Deserialize)]
struct PromptRequest {
    prompt: String,
}

async fn token_count(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    textgen_obs::record_request("token_count");
    let length = state.generator.get_encoded_length(&req.prompt)?;
    Ok(Json(serde_json::json!({ "length": length })))
}

async fn tokens(
    State(state): State<AppState>,
    Json(req): Json<PromptRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    textgen_obs::record_request("tokens");
    let listing = state.generator.get_token_ids(&req.prompt)?;
    Ok(Json(serde_json::json!({ "tokens": listing })))
}

async fn openapi() -> impl IntoResponse {
    let spec = serde_json::json!({
        "openapi": "3.0.0",
        "info": {"title": "textgen API", "version": env!("CARGO_PKG_VERSION")},
        "paths": {
            "/v1/generate": {"post": {"summary": "Generate a complete reply"}},
            "/v1/generate/stream": {"post": {"summary": "Stream partial replies as server-sent events"}},
            "/v1/stop": {"post": {"summary": "Stop the running generation"}},
            "/v1/token-count": {"post": {"summary": "Count prompt tokens"}},
            "/v1/tokens": {"post": {"summary": "List prompt token ids"}},
            "/metrics": {"get": {"summary": "Prometheus metrics"}},
            "/healthz": {"get": {"summary": "health"}},
            "/readyz": {"get": {"summary": "readiness"}}
        }
    });
    Json(spec)
}
