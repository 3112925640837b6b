//! Non-streaming response translation.
//!
//! Four directions: Gemini and Claude into OpenAI, OpenAI and Gemini into
//! Claude. The model name passed in is the one the client asked for, so the
//! client sees its own alias rather than the backend's.

use chrono::Utc;
use uuid::Uuid;

use super::anthropic_types::{ContentBlock, MessagesResponse, Usage};
use super::content;
use super::finish_reason;
use super::gemini_types::{Candidate, GenerateContentResponse, Part};
use super::openai_types::{
    ChatCompletionResponse, ChatContent, ChatToolCall, ChatUsage, Choice, ChoiceMessage,
    ContentPart,
};
use super::tools::{self, ToolCallBindings};

pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub(crate) fn message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn completion(model: &str, message: ChoiceMessage, finish_reason: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: None,
    }
}

/// Content for an OpenAI message: collapsed parts, `""` when nothing at all
/// was produced, absent when the turn is only tool calls.
fn message_content(parts: Vec<ContentPart>, has_tool_calls: bool) -> Option<ChatContent> {
    if parts.is_empty() && has_tool_calls {
        None
    } else {
        Some(content::collapse_parts(parts))
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

// ---------------------------------------------------------------------------
// Gemini -> OpenAI
// ---------------------------------------------------------------------------

/// Text from every candidate is newline-joined; tool calls and media come
/// from the first candidate only.
pub fn gemini_to_openai(
    resp: &GenerateContentResponse,
    model: &str,
    bindings: &mut ToolCallBindings,
) -> ChatCompletionResponse {
    let text = joined_candidate_text(&resp.candidates);
    let first = resp.first_candidate();
    let first_parts: &[Part] = first.map(|c| c.content.parts.as_slice()).unwrap_or_default();

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(ContentPart::Text { text });
    }
    parts.extend(
        first_parts
            .iter()
            .filter(|p| p.text.is_none())
            .filter_map(content::gemini_part_to_openai),
    );

    let tool_calls: Vec<ChatToolCall> = first_parts
        .iter()
        .filter_map(|p| p.function_call.as_ref())
        .map(|call| {
            let id = bindings.issue(&call.name);
            ChatToolCall::new(id, call.name.clone(), call.args.to_string())
        })
        .collect();

    let finish = if tool_calls.is_empty() {
        finish_reason::gemini_to_openai(first.and_then(|c| c.finish_reason.as_deref()))
    } else {
        "tool_calls"
    };

    let message = ChoiceMessage {
        role: "assistant".to_string(),
        content: message_content(parts, !tool_calls.is_empty()),
        reasoning_content: non_empty(thought_text(first_parts)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    };

    let mut out = completion(model, message, finish);
    out.usage = resp.usage_metadata.as_ref().map(|u| ChatUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total(),
    });
    out
}

fn joined_candidate_text(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| c.content.text())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn thought_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter(|p| p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect()
}

// ---------------------------------------------------------------------------
// Claude -> OpenAI
// ---------------------------------------------------------------------------

pub fn claude_to_openai(resp: &MessagesResponse, model: &str) -> ChatCompletionResponse {
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut reasoning = String::new();

    for block in &resp.content {
        match block {
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall::new(id.clone(), name.clone(), input.to_string()));
            }
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            other => parts.extend(content::claude_block_to_openai(other)),
        }
    }
    let parts = content::merge_adjacent_text(parts, "");

    let message = ChoiceMessage {
        role: "assistant".to_string(),
        content: message_content(parts, !tool_calls.is_empty()),
        reasoning_content: non_empty(reasoning),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    };

    let mut out = completion(
        model,
        message,
        finish_reason::claude_to_openai(resp.stop_reason.as_deref()),
    );
    if let Some(id) = resp.id.strip_prefix("msg_").filter(|id| !id.is_empty()) {
        out.id = format!("chatcmpl-{id}");
    }
    out.usage = Some(ChatUsage::new(resp.usage.input_tokens, resp.usage.output_tokens));
    out
}

// ---------------------------------------------------------------------------
// OpenAI -> Claude
// ---------------------------------------------------------------------------

/// `<thinking>` sections in the text and `reasoning_content` both become
/// thinking blocks.
pub fn openai_to_claude(resp: &ChatCompletionResponse, model: &str) -> MessagesResponse {
    let choice = resp.choices.first();
    let mut blocks: Vec<ContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(reasoning) = c.message.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
            blocks.push(ContentBlock::Thinking {
                thinking: reasoning.clone(),
                signature: None,
            });
        }

        match &c.message.content {
            Some(ChatContent::Text(text)) => blocks.extend(content::extract_thinking(text)),
            Some(ChatContent::Parts(parts)) => {
                // Adjacent text parts form one run so a split tag still matches.
                let mut run = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        run.push_str(text);
                        continue;
                    }
                    blocks.extend(content::extract_thinking(&std::mem::take(&mut run)));
                    blocks.extend(content::openai_part_to_claude(part));
                }
                blocks.extend(content::extract_thinking(&run));
            }
            None => {}
        }

        for call in c.message.tool_calls.iter().flatten() {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: tools::parse_arguments(&call.function.arguments),
            });
        }
    }

    let stop_reason = finish_reason::openai_to_claude(choice.and_then(|c| c.finish_reason.as_deref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        ..Usage::default()
    });

    let id = match resp.id.trim_start_matches("chatcmpl-") {
        "" => message_id(),
        rest => format!("msg_{rest}"),
    };

    MessagesResponse {
        id,
        content: blocks,
        model: model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        usage,
        ..MessagesResponse::default()
    }
}

// ---------------------------------------------------------------------------
// Gemini -> Claude
// ---------------------------------------------------------------------------

pub fn gemini_to_claude(
    resp: &GenerateContentResponse,
    model: &str,
    bindings: &mut ToolCallBindings,
) -> MessagesResponse {
    let first = resp.first_candidate();
    let first_parts: &[Part] = first.map(|c| c.content.parts.as_slice()).unwrap_or_default();
    let mut blocks: Vec<ContentBlock> = Vec::new();

    let thoughts = thought_text(first_parts);
    if !thoughts.is_empty() {
        blocks.push(ContentBlock::Thinking {
            thinking: thoughts,
            signature: None,
        });
    }

    let text = joined_candidate_text(&resp.candidates);
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }

    let mut has_tool_use = false;
    for part in first_parts.iter().filter(|p| p.text.is_none()) {
        if let Some(call) = &part.function_call {
            has_tool_use = true;
            blocks.push(ContentBlock::ToolUse {
                id: bindings.issue(&call.name),
                name: call.name.clone(),
                input: call.args.clone(),
            });
        } else {
            blocks.extend(content::gemini_part_to_claude(part));
        }
    }

    let stop_reason = if has_tool_use {
        "tool_use"
    } else {
        finish_reason::gemini_to_claude(first.and_then(|c| c.finish_reason.as_deref()))
    };

    let usage = resp.usage_metadata.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
        ..Usage::default()
    });

    MessagesResponse {
        id: message_id(),
        content: blocks,
        model: model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        usage,
        ..MessagesResponse::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::ChatToolCallFunction;
    use serde_json::json;

    fn make_response(content: Option<&str>, finish_reason: Option<&str>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: content.map(|c| ChatContent::Text(c.to_string())),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: Some(ChatUsage::new(10, 20)),
        }
    }

    fn gemini(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_openai_text_response_to_claude() {
        let resp = make_response(Some("Hello!"), Some("stop"));
        let result = openai_to_claude(&resp, "claude-sonnet-4-20250514");

        assert_eq!(result.id, "msg_abc123");
        assert_eq!(result.model, "claude-sonnet-4-20250514");
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(result.content.len(), 1);
        assert!(matches!(&result.content[0], ContentBlock::Text { text } if text == "Hello!"));
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_openai_tool_call_response_to_claude() {
        let mut resp = make_response(Some("Let me check."), Some("tool_calls"));
        resp.choices[0].message.tool_calls = Some(vec![ChatToolCall {
            id: "call_abc".to_string(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: "get_weather".to_string(),
                arguments: "{\"city\":\"London\"}".to_string(),
            },
        }]);

        let result = openai_to_claude(&resp, "test-model");
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.stop_reason.as_deref(), Some("tool_use"));
        if let ContentBlock::ToolUse { id, name, input } = &result.content[1] {
            assert_eq!(id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(input["city"], "London");
        } else {
            panic!("Expected tool_use content block");
        }
    }

    #[test]
    fn test_openai_thinking_tags_become_blocks() {
        let resp = make_response(
            Some("<thinking>weigh options</thinking>Pick B."),
            Some("length"),
        );
        let result = openai_to_claude(&resp, "m");
        assert_eq!(result.content.len(), 2);
        assert!(matches!(&result.content[0], ContentBlock::Thinking { thinking, .. } if thinking == "weigh options"));
        assert_eq!(result.stop_reason.as_deref(), Some("max_tokens"));
    }

    #[test]
    fn test_openai_parts_keep_their_order() {
        let mut resp = make_response(None, Some("stop"));
        resp.choices[0].message.content = Some(
            serde_json::from_value(json!([
                {"type": "text", "text": "<thinking>look first</thinking>Here:"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}},
                {"type": "text", "text": "Done."}
            ]))
            .unwrap(),
        );

        let result = openai_to_claude(&resp, "m");
        assert_eq!(result.content.len(), 4);
        assert!(matches!(&result.content[0], ContentBlock::Thinking { thinking, .. } if thinking == "look first"));
        assert!(matches!(&result.content[1], ContentBlock::Text { text } if text == "Here:"));
        assert!(matches!(&result.content[2], ContentBlock::Image { .. }));
        assert!(matches!(&result.content[3], ContentBlock::Text { text } if text == "Done."));
    }

    #[test]
    fn test_openai_empty_response_has_empty_content() {
        let resp = ChatCompletionResponse::default();
        let result = openai_to_claude(&resp, "m");
        assert!(result.content.is_empty());
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert!(result.id.starts_with("msg_"));
    }

    #[test]
    fn test_claude_to_openai_collapses_text() {
        let resp: MessagesResponse = serde_json::from_value(json!({
            "id": "msg_01",
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "text", "text": "Hello, "},
                {"type": "text", "text": "world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }))
        .unwrap();
        let out = claude_to_openai(&resp, "gpt-x");
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["id"], "chatcmpl-01");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello, world");
        assert_eq!(value["choices"][0]["message"]["reasoning_content"], "hmm");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 7);
    }

    #[test]
    fn test_claude_empty_response_to_openai() {
        let out = claude_to_openai(&MessagesResponse::default(), "gpt-x");
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_gemini_to_openai_joins_candidates_and_maps_calls() {
        let resp = gemini(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [
                    {"text": "first"},
                    {"functionCall": {"name": "lookup", "args": {"q": 1}}}
                ]}, "finishReason": "STOP"},
                {"content": {"role": "model", "parts": [{"text": "second"}]}}
            ],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 6}
        }));
        let mut bindings = ToolCallBindings::new();
        let out = gemini_to_openai(&resp, "gpt-x", &mut bindings);
        let message = &out.choices[0].message;
        assert!(matches!(&message.content, Some(ChatContent::Text(t)) if t == "first\nsecond"));
        let call = &message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(bindings.name_for(&call.id), Some("lookup"));
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(out.usage.as_ref().unwrap().total_tokens, 11);
    }

    #[test]
    fn test_gemini_to_claude_maps_parts() {
        let resp = gemini(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "pondering", "thought": true},
                {"text": "Here you go"},
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}}
            ]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2, "totalTokenCount": 3}
        }));
        let out = gemini_to_claude(&resp, "claude-x", &mut ToolCallBindings::new());
        assert_eq!(out.content.len(), 3);
        assert!(matches!(&out.content[0], ContentBlock::Thinking { .. }));
        assert!(matches!(&out.content[1], ContentBlock::Text { text } if text == "Here you go"));
        assert!(matches!(&out.content[2], ContentBlock::Image { .. }));
        assert_eq!(out.stop_reason.as_deref(), Some("max_tokens"));
        assert_eq!(out.usage.output_tokens, 2);
    }

    #[test]
    fn test_gemini_empty_response() {
        let out = gemini_to_claude(&GenerateContentResponse::default(), "m", &mut ToolCallBindings::new());
        assert!(out.content.is_empty());
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        let out = gemini_to_openai(&GenerateContentResponse::default(), "m", &mut ToolCallBindings::new());
        assert!(matches!(&out.choices[0].message.content, Some(ChatContent::Text(t)) if t.is_empty()));
    }
}
