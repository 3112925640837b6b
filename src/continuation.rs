//! Anti-truncation streaming for Gemini.
//!
//! Requests for an `anti-<model>` alias are streamed from `<model>`. When a
//! round's last chunk stops on `MAX_TOKENS` with text of its own, the text
//! so far is replayed as a model turn followed by a continuation prompt, and
//! the next round's chunks are appended to the same client stream.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{Backend, ChunkStream};
use crate::translate::gemini_types::GenerateContentResponse;
use crate::translate::lenient;

pub const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.5-pro",
    "gemini-2.5-pro-preview-06-05",
];

pub const ANTI_TRUNCATION_PREFIX: &str = "anti-";

pub const CONTINUE_PROMPT: &str = "Please continue from where you left off.";

const TRUNCATED: &str = "MAX_TOKENS";

/// `anti-` aliases for every known Gemini model.
pub fn anti_truncation_models() -> Vec<String> {
    GEMINI_MODELS
        .iter()
        .map(|m| format!("{ANTI_TRUNCATION_PREFIX}{m}"))
        .collect()
}

/// Whether `model` names an anti-truncation alias, possibly qualified
/// (`models/anti-gemini-2.5-pro`).
pub fn is_anti_truncation_model(model: &str) -> bool {
    anti_truncation_models()
        .iter()
        .any(|alias| model.contains(alias.as_str()))
}

/// Real model behind an alias. Names that are not aliases of a known model
/// come back unchanged.
pub fn base_model_for(model: &str) -> &str {
    match model.strip_prefix(ANTI_TRUNCATION_PREFIX) {
        Some(base) if GEMINI_MODELS.contains(&base) => base,
        _ => model,
    }
}

/// What one round left behind.
#[derive(Debug, Default)]
struct RoundOutcome {
    text: String,
    last_text: String,
    last_finish: Option<String>,
}

impl RoundOutcome {
    fn observe(&mut self, chunk: &Value) {
        let resp: GenerateContentResponse = lenient::decode_payload(chunk.clone());
        if let Some(candidate) = resp.first_candidate() {
            self.last_text = candidate.content.text();
            self.text.push_str(&self.last_text);
            self.last_finish.clone_from(&candidate.finish_reason);
        }
    }

    /// The last chunk stopped on `MAX_TOKENS` and itself carried text.
    fn truncated(&self) -> bool {
        self.last_finish.as_deref() == Some(TRUNCATED) && !self.last_text.is_empty()
    }
}

/// Original request with the text generated so far replayed as a model turn
/// and a continuation prompt appended.
fn continuation_request(original: &Value, generated: &str) -> Value {
    let mut next = original.clone();
    let mut contents = original
        .get("contents")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    contents.push(json!({"role": "model", "parts": [{"text": generated}]}));
    contents.push(json!({"role": "user", "parts": [{"text": CONTINUE_PROMPT}]}));
    if let Value::Object(map) = &mut next {
        map.insert("contents".to_string(), Value::Array(contents));
    }
    next
}

/// Stream `request` from `model`, continuing across `MAX_TOKENS` stops.
///
/// Every upstream chunk is re-emitted as-is. No new round starts once
/// `cancel` fires; an in-flight round is abandoned at the next chunk.
pub fn continuation_stream(
    backend: Arc<dyn Backend>,
    model: String,
    request: Value,
    cancel: CancellationToken,
) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut generated = String::new();
        let mut current = request.clone();
        let mut round = 0u32;

        'rounds: loop {
            if cancel.is_cancelled() {
                break;
            }
            round += 1;

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = backend.generate_content_stream(&model, current.clone()) => Some(opened),
            };
            let mut upstream = match opened {
                None => break,
                Some(Ok(upstream)) => upstream,
                Some(Err(e)) => {
                    yield Err(e);
                    break;
                }
            };

            let mut outcome = RoundOutcome::default();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = upstream.next() => Some(next),
                };
                match next {
                    None => {
                        debug!(round, "continuation cancelled mid-round");
                        break 'rounds;
                    }
                    Some(None) => break,
                    Some(Some(Err(e))) => {
                        yield Err(e);
                        break 'rounds;
                    }
                    Some(Some(Ok(chunk))) => {
                        outcome.observe(&chunk);
                        yield Ok(chunk);
                    }
                }
            }

            if !outcome.truncated() {
                break;
            }
            generated.push_str(&outcome.text);
            info!(round, generated_chars = generated.len(), "output truncated, continuing");
            current = continuation_request(&request, &generated);
        }
    };
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProxyError, Result};
    use crate::translate::Protocol;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays one scripted list of chunks per round and records requests.
    struct ScriptedBackend {
        rounds: Mutex<VecDeque<Vec<Value>>>,
        requests: Mutex<Vec<Value>>,
    }

    impl ScriptedBackend {
        fn new(rounds: Vec<Vec<Value>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Value> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn protocol(&self) -> Protocol {
            Protocol::Gemini
        }

        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn generate_content(&self, _model: &str, _body: Value) -> Result<Value> {
            Err(ProxyError::provider("not scripted"))
        }

        async fn generate_content_stream(&self, _model: &str, body: Value) -> Result<ChunkStream> {
            self.requests.lock().unwrap().push(body);
            let chunks = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(tokio_stream::iter(chunks.into_iter().map(Ok))))
        }

        async fn list_models(&self) -> Result<Value> {
            Ok(json!({"models": []}))
        }
    }

    fn chunk(text: &str, finish: Option<&str>) -> Value {
        let mut candidate = json!({"content": {"role": "model", "parts": [{"text": text}]}});
        if let Some(finish) = finish {
            candidate["finishReason"] = json!(finish);
        }
        json!({ "candidates": [candidate] })
    }

    fn request() -> Value {
        json!({"contents": [{"role": "user", "parts": [{"text": "write a story"}]}]})
    }

    async fn collect(stream: ChunkStream) -> Vec<Value> {
        stream.map(|c| c.unwrap()).collect().await
    }

    #[test]
    fn test_alias_detection() {
        assert!(is_anti_truncation_model("anti-gemini-2.5-pro"));
        assert!(is_anti_truncation_model("models/anti-gemini-2.5-flash"));
        assert!(!is_anti_truncation_model("gemini-2.5-pro"));
        assert_eq!(base_model_for("anti-gemini-2.5-pro"), "gemini-2.5-pro");
        assert_eq!(base_model_for("anti-unknown"), "anti-unknown");
        assert_eq!(base_model_for("gemini-2.5-flash"), "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_single_round_passthrough() {
        let backend = ScriptedBackend::new(vec![vec![chunk("Hello", None), chunk(" world", Some("STOP"))]]);
        let out = collect(continuation_stream(
            backend.clone(),
            "gemini-2.5-pro".into(),
            request(),
            CancellationToken::new(),
        ))
        .await;
        assert_eq!(out, vec![chunk("Hello", None), chunk(" world", Some("STOP"))]);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_continues_after_max_tokens() {
        let backend = ScriptedBackend::new(vec![
            vec![chunk("Once upon", None), chunk(" a time", Some("MAX_TOKENS"))],
            vec![chunk(" there was", Some("MAX_TOKENS"))],
            vec![chunk(" a crab.", Some("STOP"))],
        ]);
        let out = collect(continuation_stream(
            backend.clone(),
            "gemini-2.5-pro".into(),
            request(),
            CancellationToken::new(),
        ))
        .await;
        assert_eq!(out.len(), 4);

        let requests = backend.requests();
        assert_eq!(requests.len(), 3);

        let second = requests[1]["contents"].as_array().unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(second[1]["role"], "model");
        assert_eq!(second[1]["parts"][0]["text"], "Once upon a time");
        assert_eq!(second[2]["parts"][0]["text"], CONTINUE_PROMPT);

        let third = requests[2]["contents"].as_array().unwrap();
        assert_eq!(third.len(), 3);
        assert_eq!(third[1]["parts"][0]["text"], "Once upon a time there was");
    }

    #[tokio::test]
    async fn test_stops_when_truncating_chunk_has_no_text() {
        let backend = ScriptedBackend::new(vec![
            vec![
                chunk("abc", None),
                json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]}),
            ],
            vec![chunk("unreachable", Some("STOP"))],
        ]);
        let out = collect(continuation_stream(
            backend.clone(),
            "gemini-2.5-pro".into(),
            request(),
            CancellationToken::new(),
        ))
        .await;
        assert_eq!(out.len(), 2);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_round_starts_after_cancellation() {
        let backend = ScriptedBackend::new(vec![
            vec![chunk("Once upon", Some("MAX_TOKENS"))],
            vec![chunk(" a time", Some("STOP"))],
        ]);
        let cancel = CancellationToken::new();
        let mut stream = continuation_stream(
            backend.clone(),
            "gemini-2.5-pro".into(),
            request(),
            cancel.clone(),
        );

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, chunk("Once upon", Some("MAX_TOKENS")));
        cancel.cancel();

        assert!(stream.next().await.is_none());
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_truncated_round_has_no_text() {
        let backend = ScriptedBackend::new(vec![
            vec![json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]})],
            vec![chunk("unreachable", Some("STOP"))],
        ]);
        let out = collect(continuation_stream(
            backend.clone(),
            "gemini-2.5-pro".into(),
            request(),
            CancellationToken::new(),
        ))
        .await;
        assert_eq!(out.len(), 1);
        assert_eq!(backend.requests().len(), 1);
    }

    #[test]
    fn test_cancelled_before_start_yields_nothing() {
        let backend = ScriptedBackend::new(vec![vec![chunk("x", Some("STOP"))]]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = tokio_test::block_on(collect(continuation_stream(
            backend.clone(),
            "m".into(),
            request(),
            cancel,
        )));
        assert!(out.is_empty());
        assert!(backend.requests().is_empty());
    }
}
