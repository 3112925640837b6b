use crate::backend::Backend;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedPromptLog;
use crate::proxy::{self, SseEvent};
use crate::translate::params::ReasoningSettings;
use crate::translate::Protocol;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ProxyConfig,
    pub backend: Arc<dyn Backend>,
    pub reasoning: ReasoningSettings,
    pub prompt_log: Option<SharedPromptLog>,
}

impl AppState {
    pub fn new(config: ProxyConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let reasoning = config.reasoning_settings()?;
        Ok(Self {
            config,
            backend,
            reasoning,
            prompt_log: None,
        })
    }

    #[must_use]
    pub fn with_prompt_log(mut self, log: SharedPromptLog) -> Self {
        self.prompt_log = Some(log);
        self
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1beta/models/:model_action", post(handle_gemini_generate))
        .route("/v1/models", get(handle_models))
        .route("/v1beta/models", get(handle_gemini_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(protocol: Protocol, err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_server_error() {
        tracing::error!(client = %protocol, error = %err, "request failed");
    } else {
        tracing::warn!(client = %protocol, error = %err, "request rejected");
    }
    (status, Json(proxy::error_payload(protocol, err))).into_response()
}

fn parse_body(body: &Bytes) -> Result<Value> {
    let value: Value = serde_json::from_slice(body)?;
    if !value.is_object() {
        return Err(ProxyError::translation("Request body must be a JSON object"));
    }
    Ok(value)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_generate(state, Protocol::OpenAi, None, None, body).await
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_generate(state, Protocol::Claude, None, None, body).await
}

/// `POST /v1beta/models/{model}:{generateContent|streamGenerateContent}`
async fn handle_gemini_generate(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, action)) = model_action.rsplit_once(':') else {
        let err = ProxyError::translation(format!("Missing method in '{model_action}'"));
        return error_response(Protocol::Gemini, &err);
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            let err = ProxyError::translation(format!("Unsupported method '{other}'"));
            return error_response(Protocol::Gemini, &err);
        }
    };
    handle_generate(
        state,
        Protocol::Gemini,
        Some(model.to_string()),
        Some(stream),
        body,
    )
    .await
}

async fn handle_generate(
    state: Arc<AppState>,
    client: Protocol,
    path_model: Option<String>,
    path_stream: Option<bool>,
    body: Bytes,
) -> Response {
    let body = match parse_body(&body) {
        Ok(body) => body,
        Err(e) => return error_response(client, &e),
    };

    let model = path_model.unwrap_or_else(|| {
        body.get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    });
    let stream = path_stream
        .unwrap_or_else(|| body.get("stream").and_then(Value::as_bool).unwrap_or(false));

    tracing::info!(client = %client, model = %model, stream, "request");

    if stream {
        match proxy::generate_stream(state, client, model, body).await {
            Ok(events) => sse_response(events),
            Err(e) => error_response(client, &e),
        }
    } else {
        match proxy::generate(&state, client, &model, body).await {
            Ok(answer) => Json(answer).into_response(),
            Err(e) => error_response(client, &e),
        }
    }
}

fn sse_response(events: proxy::SseStream) -> Response {
    let events = events.map(|SseEvent { event, data }| -> std::result::Result<Event, Infallible> {
        let sse = Event::default().data(data);
        Ok(match event {
            Some(name) => sse.event(name),
            None => sse,
        })
    });
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// OpenAI listing, or Claude listing when the caller sends `anthropic-version`.
async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let client = if headers.contains_key("anthropic-version") {
        Protocol::Claude
    } else {
        Protocol::OpenAi
    };
    list_models(&state, client).await
}

async fn handle_gemini_models(State(state): State<Arc<AppState>>) -> Response {
    list_models(&state, Protocol::Gemini).await
}

async fn list_models(state: &AppState, client: Protocol) -> Response {
    match proxy::list_models(state, client).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error_response(client, &e),
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.config.backend.name,
        "protocol": state.backend.protocol(),
    }))
}
