//! Conversion dispatch.
//!
//! Converters are looked up first by [`ConversionKind`], then by target
//! protocol, then by source protocol. Each level reports its own miss so a
//! caller can tell an unknown operation from an unsupported dialect pair.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::anthropic_types::{self as claude, StreamEvent};
use super::context::ConversionContext;
use super::gemini_types as gemini;
use super::lenient;
use super::openai_types as openai;
use super::protocol::{ConversionKind, Protocol};
use super::{models, request, response, streaming};
use crate::error::{ProxyError, Result};

type Converter =
    Box<dyn Fn(Value, Option<&str>, &mut ConversionContext) -> Result<Value> + Send + Sync>;

type Routes = HashMap<ConversionKind, HashMap<Protocol, HashMap<Protocol, Converter>>>;

/// Convert `payload` from `source` dialect to `target` dialect.
///
/// `model` names the model reported back to the client; request converters
/// ignore it. A stream chunk that carries nothing for the client converts
/// to `Value::Null`.
pub fn convert(
    payload: Value,
    kind: ConversionKind,
    source: Protocol,
    target: Protocol,
    model: Option<&str>,
    ctx: &mut ConversionContext,
) -> Result<Value> {
    let converter = lookup(kind, source, target)?;
    converter(payload, model, ctx)
}

/// [`convert`] with string identifiers, as they arrive from configuration
/// or over the wire.
pub fn convert_named(
    payload: Value,
    kind: &str,
    source: &str,
    target: &str,
    model: Option<&str>,
    ctx: &mut ConversionContext,
) -> Result<Value> {
    let kind: ConversionKind = kind.parse()?;
    let target = target
        .parse::<Protocol>()
        .map_err(|_| unsupported_target(kind, target))?;
    let source = source
        .parse::<Protocol>()
        .map_err(|_| unsupported_source(kind, source, target))?;
    convert(payload, kind, source, target, model, ctx)
}

/// Whether a converter exists for this path.
pub fn supports(kind: ConversionKind, source: Protocol, target: Protocol) -> bool {
    lookup(kind, source, target).is_ok()
}

/// Fail with the lookup error if no converter exists for this path.
pub fn ensure_supported(kind: ConversionKind, source: Protocol, target: Protocol) -> Result<()> {
    lookup(kind, source, target).map(|_| ())
}

fn lookup(kind: ConversionKind, source: Protocol, target: Protocol) -> Result<&'static Converter> {
    let by_target = routes().get(&kind).ok_or_else(|| ProxyError::UnsupportedKind {
        kind: kind.to_string(),
    })?;
    let by_source = by_target
        .get(&target)
        .ok_or_else(|| unsupported_target(kind, target.prefix()))?;
    by_source
        .get(&source)
        .ok_or_else(|| unsupported_source(kind, source.prefix(), target))
}

fn unsupported_target(kind: ConversionKind, target: &str) -> ProxyError {
    ProxyError::UnsupportedTarget {
        kind: kind.to_string(),
        target: target.to_string(),
    }
}

fn unsupported_source(kind: ConversionKind, source: &str, target: Protocol) -> ProxyError {
    ProxyError::UnsupportedSource {
        kind: kind.to_string(),
        source_protocol: source.to_string(),
        target: target.to_string(),
    }
}

fn routes() -> &'static Routes {
    static ROUTES: OnceLock<Routes> = OnceLock::new();
    ROUTES.get_or_init(build_routes)
}

fn build_routes() -> Routes {
    use ConversionKind::*;
    use Protocol::*;

    let mut routes = Routes::new();
    let mut add = |kind, target, source, converter: Converter| {
        routes
            .entry(kind)
            .or_default()
            .entry(target)
            .or_default()
            .insert(source, converter);
    };

    // Requests: (target, source)
    add(Request, OpenAi, Claude, request_route(request::claude_to_openai));
    add(Request, OpenAi, Gemini, request_route(request::gemini_to_openai));
    add(Request, Claude, OpenAi, request_route(request::openai_to_claude));
    add(Request, Gemini, OpenAi, request_route(request::openai_to_gemini));
    add(Request, Gemini, Claude, request_route(request::claude_to_gemini));

    // Responses
    add(
        Response,
        OpenAi,
        Gemini,
        route(|payload, model, ctx| {
            let resp: gemini::GenerateContentResponse = lenient::decode_payload(payload);
            let model = model_or(model, resp.model_version.as_deref());
            encode(&response::gemini_to_openai(&resp, &model, &mut ctx.bindings))
        }),
    );
    add(
        Response,
        OpenAi,
        Claude,
        with_model(|resp: &claude::MessagesResponse, model| {
            response::claude_to_openai(resp, model)
        }),
    );
    add(
        Response,
        Claude,
        OpenAi,
        with_model(|resp: &openai::ChatCompletionResponse, model| {
            response::openai_to_claude(resp, model)
        }),
    );
    add(
        Response,
        Claude,
        Gemini,
        route(|payload, model, ctx| {
            let resp: gemini::GenerateContentResponse = lenient::decode_payload(payload);
            let model = model_or(model, resp.model_version.as_deref());
            encode(&response::gemini_to_claude(&resp, &model, &mut ctx.bindings))
        }),
    );

    // Stream chunks
    add(
        StreamChunk,
        OpenAi,
        Gemini,
        route(|payload, model, ctx| {
            let Some(chunk) = decode_chunk::<gemini::GenerateContentResponse>(payload) else {
                return Ok(Value::Null);
            };
            let model = model_or(model, chunk.model_version.as_deref());
            encode_opt(streaming::gemini_chunk_to_openai(&chunk, &model, &mut ctx.bindings))
        }),
    );
    add(
        StreamChunk,
        OpenAi,
        Claude,
        route(|payload, model, _ctx| {
            let Some(event) = decode_chunk::<StreamEvent>(payload) else {
                return Ok(Value::Null);
            };
            encode_opt(streaming::claude_event_to_openai(&event, model.unwrap_or_default()))
        }),
    );
    add(
        StreamChunk,
        Claude,
        OpenAi,
        route(|payload, _model, _ctx| {
            let Some(chunk) = decode_chunk::<openai::ChatCompletionChunk>(payload) else {
                return Ok(Value::Null);
            };
            encode_opt(streaming::openai_chunk_to_claude(&chunk))
        }),
    );
    add(
        StreamChunk,
        Claude,
        Gemini,
        route(|payload, _model, ctx| {
            let Some(chunk) = decode_chunk::<gemini::GenerateContentResponse>(payload) else {
                return Ok(Value::Null);
            };
            encode_opt(streaming::gemini_chunk_to_claude(&chunk, &mut ctx.bindings))
        }),
    );

    // Model lists
    add(ModelList, OpenAi, Gemini, model_list_route(models::gemini_to_openai));
    add(ModelList, OpenAi, Claude, model_list_route(models::claude_to_openai));
    add(ModelList, Claude, OpenAi, model_list_route(models::openai_to_claude));
    add(ModelList, Claude, Gemini, model_list_route(models::gemini_to_claude));

    routes
}

fn route<F>(convert: F) -> Converter
where
    F: Fn(Value, Option<&str>, &mut ConversionContext) -> Result<Value> + Send + Sync + 'static,
{
    Box::new(convert)
}

fn request_route<S, D>(convert: fn(&S, &mut ConversionContext) -> Result<D>) -> Converter
where
    S: DeserializeOwned + Default + 'static,
    D: Serialize + 'static,
{
    route(move |payload, _model, ctx| {
        let req: S = lenient::decode_payload(payload);
        encode(&convert(&req, ctx)?)
    })
}

fn with_model<S, D, F>(convert: F) -> Converter
where
    S: DeserializeOwned + Default + 'static,
    D: Serialize + 'static,
    F: Fn(&S, &str) -> D + Send + Sync + 'static,
{
    route(move |payload, model, _ctx| {
        let reported = payload
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);
        let resp: S = lenient::decode_payload(payload);
        encode(&convert(&resp, &model_or(model, reported.as_deref())))
    })
}

fn model_list_route<S, D>(convert: fn(&S) -> D) -> Converter
where
    S: DeserializeOwned + Default + 'static,
    D: Serialize + 'static,
{
    route(move |payload, _model, _ctx| {
        let list: S = lenient::decode_payload(payload);
        encode(&convert(&list))
    })
}

fn model_or(model: Option<&str>, reported: Option<&str>) -> String {
    model
        .filter(|m| !m.is_empty())
        .or(reported)
        .unwrap_or_default()
        .to_string()
}

fn decode_chunk<T: DeserializeOwned>(payload: Value) -> Option<T> {
    if payload.is_null() {
        return None;
    }
    serde_json::from_value(payload)
        .map_err(|err| debug!(error = %err, "skipping undecodable stream chunk"))
        .ok()
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn encode_opt<T: Serialize>(value: Option<T>) -> Result<Value> {
    match value {
        Some(value) => encode(&value),
        None => Ok(Value::Null),
    }
}
