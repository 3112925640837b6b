//! Exchange orchestration: convert the client request, call the backend,
//! convert the answer back, and record the exchange in the prompt log.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::ChunkStream;
use crate::continuation::{self, base_model_for, is_anti_truncation_model};
use crate::error::{ProxyError, Result};
use crate::logging::{self, PromptRecord};
use crate::server::AppState;
use crate::translate::anthropic_types::{self as claude, StreamEvent};
use crate::translate::gemini_types::{self as gemini, GenerateContentResponse};
use crate::translate::openai_types::{ChatCompletionChunk, ChatErrorResponse};
use crate::translate::registry::{self, convert};
use crate::translate::streaming::{self, ClaudeEventSequencer, OpenAiChunkSequencer};
use crate::translate::{ConversionContext, ConversionKind, Protocol};

/// One server-sent event for the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    fn json<T: Serialize>(event: Option<&str>, value: &T) -> Option<Self> {
        match serde_json::to_string(value) {
            Ok(data) => Some(Self {
                event: event.map(str::to_string),
                data,
            }),
            Err(e) => {
                warn!(error = %e, "failed to encode stream event");
                None
            }
        }
    }

    fn claude(event: &StreamEvent) -> Option<Self> {
        Self::json(Some(event.event_name()), event)
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = SseEvent> + Send>>;

const DONE: &str = "[DONE]";

/// Who talks to whom, and under which model names.
#[derive(Debug, Clone)]
struct Route {
    client: Protocol,
    backend: Protocol,
    client_model: String,
    backend_model: String,
}

impl Route {
    fn new(state: &AppState, client: Protocol, client_model: &str) -> Self {
        let backend = state.backend.protocol();
        let mapped = state.config.map_model(client_model);
        let backend_model = match backend {
            Protocol::Gemini => mapped.strip_prefix("models/").unwrap_or(mapped),
            Protocol::OpenAi | Protocol::Claude => mapped,
        };
        Self {
            client,
            backend,
            client_model: client_model.to_string(),
            backend_model: backend_model.to_string(),
        }
    }

    fn passthrough(&self) -> bool {
        self.client == self.backend
    }

    fn prepare_request(&self, body: Value, ctx: &mut ConversionContext) -> Result<Value> {
        if self.passthrough() {
            return Ok(body);
        }
        registry::ensure_supported(ConversionKind::Response, self.backend, self.client)?;
        convert(
            body,
            ConversionKind::Request,
            self.client,
            self.backend,
            None,
            ctx,
        )
    }

    fn record(&self, state: &AppState, stream: bool, prompt: String, output: String) {
        if let Some(log) = &state.prompt_log {
            let mut record =
                PromptRecord::new(&self.client_model, self.client, self.backend, stream)
                    .with_prompt(prompt);
            record.output = output;
            log.record(record);
        }
    }
}

/// Report the client's model name on passthrough answers.
fn with_client_model(mut payload: Value, protocol: Protocol, model: &str) -> Value {
    if protocol == Protocol::Gemini {
        return payload;
    }
    if let Some(slot) = payload.get_mut("model") {
        *slot = Value::String(model.to_string());
    } else if let Some(slot) = payload
        .get_mut("message")
        .and_then(|message| message.get_mut("model"))
    {
        *slot = Value::String(model.to_string());
    }
    payload
}

/// Dialect-shaped error body.
pub fn error_payload(protocol: Protocol, err: &ProxyError) -> Value {
    let status = err.status_code();
    let message = err.to_string();
    let error_type = if status < 500 {
        "invalid_request_error"
    } else {
        "api_error"
    };
    let encoded = match protocol {
        Protocol::OpenAi => serde_json::to_value(ChatErrorResponse::new(error_type, message)),
        Protocol::Claude => serde_json::to_value(claude::ErrorResponse::new(error_type, message)),
        Protocol::Gemini => serde_json::to_value(gemini::ErrorResponse::new(status, message)),
    };
    encoded.unwrap_or(Value::Null)
}

fn error_event(protocol: Protocol, err: &ProxyError) -> SseEvent {
    let event = (protocol == Protocol::Claude).then(|| "error".to_string());
    SseEvent {
        event,
        data: error_payload(protocol, err).to_string(),
    }
}

// ---------------------------------------------------------------------------
// Non-streaming
// ---------------------------------------------------------------------------

pub async fn generate(
    state: &AppState,
    client: Protocol,
    client_model: &str,
    body: Value,
) -> Result<Value> {
    let route = Route::new(state, client, client_model);
    let mut ctx = ConversionContext::new(state.reasoning.clone());
    let prompt = logging::prompt_text(client, &body);
    let request = route.prepare_request(body, &mut ctx)?;

    let model = base_model_for(&route.backend_model);
    info!(
        client = %route.client,
        backend = %route.backend,
        model,
        "generate"
    );
    let native = state.backend.generate_content(model, request).await?;
    let output = logging::output_text(route.backend, &native);

    let answer = if route.passthrough() {
        with_client_model(native, client, client_model)
    } else {
        convert(
            native,
            ConversionKind::Response,
            route.backend,
            route.client,
            Some(client_model),
            &mut ctx,
        )?
    };

    route.record(state, false, prompt, output);
    Ok(answer)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Open a streaming exchange. Errors before the first upstream byte are
/// returned directly; later failures become a dialect-shaped error event.
pub async fn generate_stream(
    state: Arc<AppState>,
    client: Protocol,
    client_model: String,
    body: Value,
) -> Result<SseStream> {
    let route = Route::new(&state, client, &client_model);
    let mut ctx = ConversionContext::new(state.reasoning.clone());
    let prompt = logging::prompt_text(client, &body);
    let request = route.prepare_request(body, &mut ctx)?;

    let cancel = CancellationToken::new();
    let mut upstream = open_upstream(&state, &route, request, cancel.clone()).await?;

    let stream = async_stream::stream! {
        let _cancel_on_drop = cancel.drop_guard();
        let mut encoder = StreamEncoder::new(&route, ctx);
        let mut output = String::new();
        let mut failed = false;

        while let Some(item) = upstream.next().await {
            match item {
                Ok(chunk) => {
                    output.push_str(&logging::output_text(route.backend, &chunk));
                    for event in encoder.encode(chunk) {
                        yield event;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "upstream stream failed");
                    yield error_event(route.client, &e);
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            for event in encoder.finish() {
                yield event;
            }
        }
        debug!(chars = output.len(), "stream completed");
        route.record(&state, true, prompt, output);
    };

    Ok(Box::pin(stream))
}

async fn open_upstream(
    state: &AppState,
    route: &Route,
    request: Value,
    cancel: CancellationToken,
) -> Result<ChunkStream> {
    if route.backend == Protocol::Gemini && is_anti_truncation_model(&route.backend_model) {
        let base = base_model_for(&route.backend_model).to_string();
        info!(alias = %route.backend_model, model = %base, "anti-truncation stream");
        return Ok(continuation::continuation_stream(
            state.backend.clone(),
            base,
            request,
            cancel,
        ));
    }
    info!(
        client = %route.client,
        backend = %route.backend,
        model = %route.backend_model,
        "generate (streaming)"
    );
    state
        .backend
        .generate_content_stream(&route.backend_model, request)
        .await
}

/// Turns native backend chunks into client SSE events.
enum StreamEncoder {
    Passthrough {
        protocol: Protocol,
        model: String,
    },
    ToClaude {
        backend: Protocol,
        sequencer: ClaudeEventSequencer,
        ctx: ConversionContext,
    },
    ToOpenAi {
        backend: Protocol,
        model: String,
        sequencer: OpenAiChunkSequencer,
        ctx: ConversionContext,
    },
}

impl StreamEncoder {
    /// Routes with neither a Claude nor an OpenAI client are passthrough;
    /// `prepare_request` rejects the rest before any stream opens.
    fn new(route: &Route, ctx: ConversionContext) -> Self {
        if route.passthrough() || route.client == Protocol::Gemini {
            return StreamEncoder::Passthrough {
                protocol: route.client,
                model: route.client_model.clone(),
            };
        }
        match route.client {
            Protocol::Claude => StreamEncoder::ToClaude {
                backend: route.backend,
                sequencer: ClaudeEventSequencer::new(&route.client_model),
                ctx,
            },
            _ => StreamEncoder::ToOpenAi {
                backend: route.backend,
                model: route.client_model.clone(),
                sequencer: OpenAiChunkSequencer::new(&route.client_model),
                ctx,
            },
        }
    }

    fn encode(&mut self, chunk: Value) -> Vec<SseEvent> {
        match self {
            StreamEncoder::Passthrough { protocol, model } => {
                let event = match protocol {
                    Protocol::Claude => chunk
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    Protocol::OpenAi | Protocol::Gemini => None,
                };
                let chunk = with_client_model(chunk, *protocol, model);
                vec![SseEvent {
                    event,
                    data: chunk.to_string(),
                }]
            }
            StreamEncoder::ToClaude {
                backend,
                sequencer,
                ctx,
            } => {
                let events = match backend {
                    Protocol::OpenAi => decode::<ChatCompletionChunk>(chunk)
                        .map(|c| streaming::openai_chunk_to_claude_events(&c))
                        .unwrap_or_default(),
                    Protocol::Gemini => decode::<GenerateContentResponse>(chunk)
                        .map(|c| streaming::gemini_chunk_to_claude_events(&c, &mut ctx.bindings))
                        .unwrap_or_default(),
                    Protocol::Claude => decode::<StreamEvent>(chunk).into_iter().collect(),
                };
                events
                    .into_iter()
                    .flat_map(|event| sequencer.push(event))
                    .filter_map(|event| SseEvent::claude(&event))
                    .collect()
            }
            StreamEncoder::ToOpenAi {
                backend,
                model,
                sequencer,
                ctx,
            } => {
                let converted = match convert(
                    chunk,
                    ConversionKind::StreamChunk,
                    *backend,
                    Protocol::OpenAi,
                    Some(model.as_str()),
                    ctx,
                ) {
                    Ok(converted) => converted,
                    Err(e) => {
                        debug!(error = %e, "dropping unconvertible chunk");
                        return Vec::new();
                    }
                };
                decode::<ChatCompletionChunk>(converted)
                    .and_then(|c| sequencer.push(c))
                    .and_then(|c| SseEvent::json(None, &c))
                    .into_iter()
                    .collect()
            }
        }
    }

    fn finish(&mut self) -> Vec<SseEvent> {
        match self {
            StreamEncoder::Passthrough { protocol, .. } => match protocol {
                Protocol::OpenAi => vec![SseEvent::data(DONE)],
                Protocol::Claude | Protocol::Gemini => Vec::new(),
            },
            StreamEncoder::ToClaude { sequencer, .. } => sequencer
                .finish()
                .iter()
                .filter_map(SseEvent::claude)
                .collect(),
            StreamEncoder::ToOpenAi { sequencer, .. } => {
                let mut events: Vec<SseEvent> = sequencer
                    .finish()
                    .and_then(|stop| SseEvent::json(None, &stop))
                    .into_iter()
                    .collect();
                events.push(SseEvent::data(DONE));
                events
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value)
        .map_err(|e| debug!(error = %e, "skipping undecodable chunk"))
        .ok()
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

pub async fn list_models(state: &AppState, client: Protocol) -> Result<Value> {
    let backend = state.backend.protocol();
    if backend != client {
        registry::ensure_supported(ConversionKind::ModelList, backend, client)?;
    }
    let native = state.backend.list_models().await?;
    if backend == client {
        return Ok(native);
    }
    let mut ctx = ConversionContext::default();
    convert(native, ConversionKind::ModelList, backend, client, None, &mut ctx)
}
