use async_trait::async_trait;
use dialect_proxy::backend::{Backend, ChunkStream};
use dialect_proxy::translate::registry::convert_named;
use dialect_proxy::{
    build_router, convert, AppState, ConversionContext, ConversionKind, HttpBackend, Protocol,
    ProxyConfig, ProxyError, Result, SharedPromptLog,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn to(kind: ConversionKind, source: Protocol, target: Protocol, payload: Value) -> Value {
    let mut ctx = ConversionContext::default();
    convert(payload, kind, source, target, Some("client-model"), &mut ctx).unwrap()
}

// ────────────────────────────────────────────────────────────────
// Conversion scenarios (no network)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_claude_request_gets_openai_defaults() {
    let out = to(
        ConversionKind::Request,
        Protocol::Claude,
        Protocol::OpenAi,
        json!({"model": "x", "messages": [{"role": "user", "content": "hi"}]}),
    );
    assert_eq!(out["model"], "x");
    assert_eq!(out["messages"], json!([{"role": "user", "content": "hi"}]));
    assert_eq!(out["max_tokens"], 8192);
    assert_eq!(out["temperature"].as_f64(), Some(1.0));
    assert_eq!(out["top_p"].as_f64(), Some(0.9));
}

#[test]
fn test_gemini_model_list_to_openai() {
    let out = to(
        ConversionKind::ModelList,
        Protocol::Gemini,
        Protocol::OpenAi,
        json!({"models": [{"name": "models/gemini-2.5-pro"}]}),
    );
    assert_eq!(out["object"], "list");
    assert_eq!(out["data"][0]["id"], "gemini-2.5-pro");
    assert_eq!(out["data"][0]["object"], "model");
    assert_eq!(out["data"][0]["owned_by"], "google");
}

#[test]
fn test_unanswered_tool_call_becomes_plain_text() {
    let out = to(
        ConversionKind::Request,
        Protocol::OpenAi,
        Protocol::Claude,
        json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": "Let me check.", "tool_calls": [
                    {"id": "call_42", "type": "function",
                     "function": {"name": "get_weather", "arguments": "{}"}}
                ]}
            ]
        }),
    );
    let messages = out["messages"].as_array().unwrap();
    let assistant = messages.iter().find(|m| m["role"] == "assistant").unwrap();
    assert!(!assistant.to_string().contains("tool_use"));
    assert!(assistant.to_string().contains("Let me check."));
}

#[test]
fn test_text_survives_round_trip() {
    let original = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "exactly this text"}]
    });
    let claude = to(ConversionKind::Request, Protocol::OpenAi, Protocol::Claude, original);
    let back = to(ConversionKind::Request, Protocol::Claude, Protocol::OpenAi, claude);
    assert_eq!(back["messages"][0]["content"], "exactly this text");

    let gemini = to(
        ConversionKind::Request,
        Protocol::OpenAi,
        Protocol::Gemini,
        json!({"model": "m", "messages": [{"role": "user", "content": "same words"}]}),
    );
    let back = to(ConversionKind::Request, Protocol::Gemini, Protocol::OpenAi, gemini);
    assert_eq!(back["messages"][0]["content"], "same words");
}

#[test]
fn test_claude_tool_exchange_to_gemini_uses_function_names() {
    let out = to(
        ConversionKind::Request,
        Protocol::Claude,
        Protocol::Gemini,
        json!({
            "model": "claude",
            "max_tokens": 100,
            "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}],
            "messages": [
                {"role": "user", "content": "weather in Oslo?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Oslo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"}
                ]}
            ]
        }),
    );
    let contents = out["contents"].as_array().unwrap();
    assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "get_weather");
    assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "get_weather");
    assert_eq!(out["generationConfig"]["maxOutputTokens"], 100);
}

#[test]
fn test_unregistered_paths_report_the_missing_level() {
    let mut ctx = ConversionContext::default();
    assert!(matches!(
        convert_named(json!({}), "audio", "openai", "claude", None, &mut ctx),
        Err(ProxyError::UnsupportedKind { .. })
    ));
    assert!(matches!(
        convert_named(json!({}), "response", "claude", "gemini", None, &mut ctx),
        Err(ProxyError::UnsupportedTarget { .. })
    ));
    assert!(matches!(
        convert_named(json!({}), "request", "gemini", "claude", None, &mut ctx),
        Err(ProxyError::UnsupportedSource { .. })
    ));
}

#[test]
fn test_unknown_finish_reason_still_maps() {
    let out = to(
        ConversionKind::Response,
        Protocol::Gemini,
        Protocol::Claude,
        json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}, "finishReason": "SOMETHING_NEW"}]}),
    );
    assert_eq!(out["stop_reason"], "end_turn");
    assert_eq!(out["content"][0]["text"], "ok");
}

// ────────────────────────────────────────────────────────────────
// Server round trips against a canned Gemini backend
// ────────────────────────────────────────────────────────────────

struct CannedGemini;

#[async_trait]
impl Backend for CannedGemini {
    fn protocol(&self) -> Protocol {
        Protocol::Gemini
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<Value> {
        if model != "gemini-2.5-pro" {
            return Err(ProxyError::upstream(404, format!("unknown model {model}")));
        }
        assert!(body.get("contents").is_some());
        Ok(json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "pong"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
        }))
    }

    async fn generate_content_stream(&self, _model: &str, _body: Value) -> Result<ChunkStream> {
        let chunks = vec![
            Ok(json!({"candidates": [{"content": {"parts": [{"text": "po"}]}}]})),
            Ok(json!({"candidates": [{"content": {"parts": [{"text": "ng"}]}, "finishReason": "STOP"}]})),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list_models(&self) -> Result<Value> {
        Ok(json!({"models": [{"name": "models/gemini-2.5-pro"}, {"name": "models/gemini-2.5-flash"}]}))
    }
}

async fn spawn_server(log: Option<SharedPromptLog>) -> (String, reqwest::Client) {
    let mut config = ProxyConfig::for_backend("gemini");
    config
        .models
        .insert("gpt-4o".to_string(), "gemini-2.5-pro".to_string());
    config
        .models
        .insert("claude-sonnet".to_string(), "gemini-2.5-pro".to_string());

    let mut state = AppState::new(config, Arc::new(CannedGemini)).unwrap();
    if let Some(log) = log {
        state = state.with_prompt_log(log);
    }
    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), reqwest::Client::new())
}

#[tokio::test]
async fn test_openai_client_non_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let log = SharedPromptLog::new(dir.path().join("prompts.jsonl")).unwrap();
    let (base, client) = spawn_server(Some(log.clone())).await;

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "ping"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["choices"][0]["message"]["content"], "pong");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 4);

    let records = log.recent(1);
    assert_eq!(records[0].prompt, "ping");
    assert_eq!(records[0].output, "pong");
    assert_eq!(records[0].backend_protocol, Protocol::Gemini);
}

#[tokio::test]
async fn test_claude_client_streaming() {
    let (base, client) = spawn_server(None).await;

    let resp = client
        .post(format!("{base}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet",
            "max_tokens": 64,
            "stream": true,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let start = body.find("event: message_start").unwrap();
    let delta = body.find("event: content_block_delta").unwrap();
    let stop = body.find("event: message_stop").unwrap();
    assert!(start < delta && delta < stop);
    assert!(body.contains("\"end_turn\""));
    assert_eq!(body.matches("event: message_stop").count(), 1);
}

#[tokio::test]
async fn test_openai_client_streaming_ends_with_done() {
    let (base, client) = spawn_server(None).await;

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o",
            "stream": true,
            "messages": [{"role": "user", "content": "ping"}]
        }))
        .send()
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("\"content\":\"po\""));
    assert!(body.contains("\"finish_reason\":\"stop\""));
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn test_gemini_client_passthrough() {
    let (base, client) = spawn_server(None).await;

    let resp = client
        .post(format!("{base}/v1beta/models/gemini-2.5-pro:generateContent"))
        .json(&json!({"contents": [{"role": "user", "parts": [{"text": "ping"}]}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "pong");

    let models: Value = client
        .get(format!("{base}/v1beta/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["models"][0]["name"], "models/gemini-2.5-pro");
}

#[tokio::test]
async fn test_model_listing_per_client_dialect() {
    let (base, client) = spawn_server(None).await;

    let openai: Value = client
        .get(format!("{base}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(openai["data"][1]["id"], "gemini-2.5-flash");
    assert_eq!(openai["data"][1]["owned_by"], "google");

    let claude: Value = client
        .get(format!("{base}/v1/models"))
        .header("anthropic-version", "2023-06-01")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(claude["models"][0]["name"], "gemini-2.5-pro");
}

#[tokio::test]
async fn test_errors_use_client_dialect() {
    let (base, client) = spawn_server(None).await;

    let resp = client
        .post(format!("{base}/v1/messages"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = client
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"model": "unmapped", "messages": [{"role": "user", "content": "x"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("unknown model"));
}

// ────────────────────────────────────────────────────────────────
// Live backend (needs GEMINI_API_KEY)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires GEMINI_API_KEY"]
async fn test_live_gemini_from_openai_client() {
    let config = ProxyConfig::for_backend("gemini");
    let backend = HttpBackend::from_config(&config, reqwest::Client::new()).unwrap();
    backend.initialize().await.unwrap();
    let state = AppState::new(config, Arc::new(backend)).unwrap();

    let answer = dialect_proxy::proxy::generate(
        &state,
        Protocol::OpenAi,
        "gemini-2.5-flash",
        json!({"model": "gemini-2.5-flash", "messages": [{"role": "user", "content": "Say 'pong'"}]}),
    )
    .await
    .unwrap();
    println!("Live response: {answer}");
    assert_eq!(answer["object"], "chat.completion");
    assert!(answer["choices"][0]["message"]["content"].is_string());
}
