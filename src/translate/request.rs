//! Request translation between the three dialects.
//!
//! Five directions are supported: Claude and Gemini into OpenAI, OpenAI into
//! Claude, and OpenAI and Claude into Gemini. A single source message can
//! expand into several target messages (a Claude user turn holding
//! `tool_result` blocks becomes separate OpenAI `tool` messages) and the
//! reverse (consecutive OpenAI tool results fold into one Claude user turn).

use serde_json::{json, Value};

use super::anthropic_types::{
    self as claude, ContentBlock, Message, MessageContent, MessagesRequest, Role, SystemContent,
    ToolResultContent,
};
use super::content;
use super::context::ConversionContext;
use super::gemini_types::{self as gemini, Content, GenerateContentRequest, GenerationConfig, Part};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolChoice, StopSequences, StreamOptions,
};
use super::params::{
    or_default, DEFAULT_GEMINI_MAX_TOKENS, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P,
};
use super::tools::{self, ToolCallBindings};
use crate::error::Result;

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn is_system_role(role: &str) -> bool {
    matches!(role, "system" | "developer")
}

// ---------------------------------------------------------------------------
// Claude -> OpenAI
// ---------------------------------------------------------------------------

/// Translate a Claude Messages request into an OpenAI Chat Completions request.
pub fn claude_to_openai(
    req: &MessagesRequest,
    ctx: &mut ConversionContext,
) -> Result<ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::new("system", ChatContent::Text(text)));
        }
    }

    for msg in &req.messages {
        messages.extend(claude_message_to_openai(msg, &mut ctx.bindings));
    }
    tools::reconcile_tool_calls(&mut messages);

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        tools
            .iter()
            .map(|t| {
                ctx.bindings.declare(&t.name);
                ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: if t.input_schema.is_null() {
                            empty_object_schema()
                        } else {
                            t.input_schema.clone()
                        },
                    },
                }
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().map(claude_tool_choice_to_openai)
    } else {
        None
    };

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req
        .metadata
        .as_ref()
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut out = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: Some(or_default(req.max_tokens, DEFAULT_MAX_TOKENS)),
        temperature: Some(or_default(req.temperature, DEFAULT_TEMPERATURE)),
        top_p: Some(or_default(req.top_p, DEFAULT_TOP_P)),
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req
            .stop_sequences
            .clone()
            .filter(|s| !s.is_empty())
            .map(StopSequences::Many),
        user,
        ..ChatCompletionRequest::default()
    };

    if let Some(thinking) = req.thinking.as_ref().filter(|t| t.is_enabled()) {
        out.reasoning_effort = Some(ctx.reasoning.effort_for(thinking.budget_tokens)?.to_string());
        out.max_completion_tokens = Some(ctx.reasoning.completion_limit(req.max_tokens)?);
        out.max_tokens = None;
    }

    Ok(out)
}

fn claude_message_to_openai(msg: &Message, bindings: &mut ToolCallBindings) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();
    match msg.role {
        Role::User => claude_user_to_openai(&blocks),
        Role::Assistant => claude_assistant_to_openai(&blocks, bindings),
    }
}

fn claude_user_to_openai(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } => {
                // Flush accumulated content first so ordering survives.
                if !parts.is_empty() {
                    messages.push(ChatMessage::new(
                        "user",
                        content::collapse_parts(std::mem::take(&mut parts)),
                    ));
                }
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_call_id: Some(tool_use_id.clone()),
                    ..ChatMessage::default()
                });
            }
            other => parts.extend(content::claude_block_to_openai(other)),
        }
    }

    if !parts.is_empty() {
        messages.push(ChatMessage::new("user", content::collapse_parts(parts)));
    }
    messages
}

fn claude_assistant_to_openai(
    blocks: &[ContentBlock],
    bindings: &mut ToolCallBindings,
) -> Vec<ChatMessage> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                bindings.record(name, id);
                tool_calls.push(ChatToolCall::new(id.clone(), name.clone(), input.to_string()));
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let text = text_parts.concat();
    if text.is_empty() && tool_calls.is_empty() {
        return Vec::new();
    }

    vec![ChatMessage {
        role: "assistant".to_string(),
        content: (!text.is_empty()).then_some(ChatContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..ChatMessage::default()
    }]
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };
    match content {
        Some(content) => format!("{prefix}{}", content.joined_text("\n")),
        None => format!("{prefix}(no content)"),
    }
}

fn claude_tool_choice_to_openai(choice: &claude::ToolChoice) -> ChatToolChoice {
    match choice {
        claude::ToolChoice::Auto => ChatToolChoice::Mode("auto".to_string()),
        claude::ToolChoice::Any => ChatToolChoice::Mode("required".to_string()),
        claude::ToolChoice::None => ChatToolChoice::Mode("none".to_string()),
        claude::ToolChoice::Tool { name } => ChatToolChoice::function(name.clone()),
    }
}

// ---------------------------------------------------------------------------
// Gemini -> OpenAI
// ---------------------------------------------------------------------------

/// Translate a Gemini `generateContent` request into an OpenAI request.
///
/// Gemini pairs calls and results by function name; ids are issued for each
/// `functionCall` and reused for the matching `functionResponse`.
pub fn gemini_to_openai(
    req: &GenerateContentRequest,
    ctx: &mut ConversionContext,
) -> Result<ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(system) = &req.system_instruction {
        let text = system
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(ChatMessage::new("system", ChatContent::Text(text)));
        }
    }

    for content in &req.contents {
        messages.extend(gemini_content_to_openai(content, &mut ctx.bindings));
    }
    tools::reconcile_tool_calls(&mut messages);

    let tools: Vec<ChatTool> = req
        .tools
        .iter()
        .flatten()
        .flat_map(|tool| tool.function_declarations.iter())
        .map(|decl| {
            ctx.bindings.declare(&decl.name);
            ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    parameters: decl.parameters.clone().unwrap_or_else(empty_object_schema),
                },
            }
        })
        .collect();

    let tool_choice = if tools.is_empty() {
        None
    } else {
        req.tool_config.as_ref().map(gemini_tool_config_to_openai)
    };

    let config = req.generation_config.clone().unwrap_or_default();
    Ok(ChatCompletionRequest {
        model: req.model.clone().unwrap_or_default(),
        messages,
        max_tokens: Some(or_default(config.max_output_tokens, DEFAULT_MAX_TOKENS)),
        temperature: Some(or_default(config.temperature, DEFAULT_TEMPERATURE)),
        top_p: Some(or_default(config.top_p, DEFAULT_TOP_P)),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
        stop: config
            .stop_sequences
            .filter(|s| !s.is_empty())
            .map(StopSequences::Many),
        ..ChatCompletionRequest::default()
    })
}

fn gemini_content_to_openai(content: &Content, bindings: &mut ToolCallBindings) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in &content.parts {
        if let Some(call) = &part.function_call {
            let id = bindings.issue(&call.name);
            tool_calls.push(ChatToolCall::new(id, call.name.clone(), call.args.to_string()));
        } else if let Some(response) = &part.function_response {
            messages.push(ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text(function_response_text(&response.response))),
                tool_call_id: Some(bindings.id_or_issue(&response.name)),
                ..ChatMessage::default()
            });
        } else {
            parts.extend(content::gemini_part_to_openai(part));
        }
    }

    let role = if content.role() == "model" {
        "assistant"
    } else {
        "user"
    };

    if !parts.is_empty() || !tool_calls.is_empty() {
        messages.push(ChatMessage {
            role: role.to_string(),
            content: (!parts.is_empty()).then(|| content::collapse_parts(parts)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..ChatMessage::default()
        });
    }
    messages
}

/// A `{"content": "..."}` response unwraps to its string, anything else is
/// sent as JSON text.
fn function_response_text(response: &Value) -> String {
    match response {
        Value::Object(map) if map.len() == 1 => match map.get("content") {
            Some(Value::String(s)) => s.clone(),
            _ => response.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn gemini_tool_config_to_openai(config: &gemini::ToolConfig) -> ChatToolChoice {
    let calling = &config.function_calling_config;
    match calling.mode.to_ascii_uppercase().as_str() {
        "NONE" => ChatToolChoice::Mode("none".to_string()),
        "ANY" => match calling.allowed_function_names.as_deref() {
            Some([only]) => ChatToolChoice::function(only.clone()),
            _ => ChatToolChoice::Mode("required".to_string()),
        },
        _ => ChatToolChoice::Mode("auto".to_string()),
    }
}

// ---------------------------------------------------------------------------
// OpenAI -> Claude
// ---------------------------------------------------------------------------

/// Translate an OpenAI Chat Completions request into a Claude Messages request.
pub fn openai_to_claude(
    req: &ChatCompletionRequest,
    ctx: &mut ConversionContext,
) -> Result<MessagesRequest> {
    let mut source = req.messages.clone();
    tools::reconcile_tool_calls(&mut source);

    let system = source
        .iter()
        .filter(|m| is_system_role(&m.role))
        .map(ChatMessage::text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages: Vec<Message> = Vec::new();
    for msg in source.iter().filter(|m| !is_system_role(&m.role)) {
        match msg.role.as_str() {
            "tool" => push_tool_result(&mut messages, msg),
            "assistant" => messages.extend(openai_assistant_to_claude(msg, &mut ctx.bindings)),
            _ => messages.extend(openai_user_to_claude(msg)),
        }
    }

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        tools
            .iter()
            .map(|t| {
                ctx.bindings.declare(&t.function.name);
                claude::Tool {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: if t.function.parameters.is_null() {
                        empty_object_schema()
                    } else {
                        t.function.parameters.clone()
                    },
                }
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().map(openai_tool_choice_to_claude)
    } else {
        None
    };

    Ok(MessagesRequest {
        model: req.model.clone(),
        max_tokens: Some(or_default(
            req.max_tokens.or(req.max_completion_tokens),
            DEFAULT_MAX_TOKENS,
        )),
        messages,
        system: (!system.is_empty()).then_some(SystemContent::Text(system)),
        stream: req.stream,
        temperature: Some(or_default(req.temperature, DEFAULT_TEMPERATURE)),
        top_p: Some(or_default(req.top_p, DEFAULT_TOP_P)),
        tools,
        tool_choice,
        stop_sequences: req
            .stop
            .clone()
            .map(StopSequences::into_vec)
            .filter(|s| !s.is_empty()),
        ..MessagesRequest::default()
    })
}

fn openai_user_to_claude(msg: &ChatMessage) -> Option<Message> {
    let content = match &msg.content {
        Some(ChatContent::Text(text)) if !text.is_empty() => MessageContent::Text(text.clone()),
        Some(ChatContent::Parts(parts)) => {
            let blocks: Vec<_> = parts.iter().filter_map(content::openai_part_to_claude).collect();
            if blocks.is_empty() {
                return None;
            }
            MessageContent::Blocks(blocks)
        }
        _ => return None,
    };
    Some(Message {
        role: Role::User,
        content,
    })
}

fn openai_assistant_to_claude(msg: &ChatMessage, bindings: &mut ToolCallBindings) -> Option<Message> {
    let mut blocks: Vec<ContentBlock> = msg
        .content
        .clone()
        .map(ChatContent::into_parts)
        .unwrap_or_default()
        .iter()
        .filter_map(content::openai_part_to_claude)
        .collect();

    for call in msg.tool_calls.iter().flatten() {
        bindings.record(&call.function.name, &call.id);
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: tools::parse_arguments(&call.function.arguments),
        });
    }

    if blocks.is_empty() {
        return None;
    }
    Some(Message {
        role: Role::Assistant,
        content: MessageContent::Blocks(blocks),
    })
}

/// Tool results answering one assistant turn must share a single user turn.
fn push_tool_result(messages: &mut Vec<Message>, msg: &ChatMessage) {
    let Some(tool_use_id) = msg.tool_call_id.clone() else {
        return;
    };
    let block = ContentBlock::ToolResult {
        tool_use_id,
        content: Some(ToolResultContent::Text(msg.text())),
        is_error: None,
        name: None,
    };

    if let Some(Message {
        role: Role::User,
        content: MessageContent::Blocks(blocks),
    }) = messages.last_mut()
    {
        if matches!(blocks.last(), Some(ContentBlock::ToolResult { .. })) {
            blocks.push(block);
            return;
        }
    }
    messages.push(Message {
        role: Role::User,
        content: MessageContent::Blocks(vec![block]),
    });
}

fn openai_tool_choice_to_claude(choice: &ChatToolChoice) -> claude::ToolChoice {
    match choice {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "none" => claude::ToolChoice::None,
            "required" => claude::ToolChoice::Any,
            _ => claude::ToolChoice::Auto,
        },
        ChatToolChoice::Specific(specific) => claude::ToolChoice::Tool {
            name: specific.function.name.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// OpenAI -> Gemini
// ---------------------------------------------------------------------------

/// Translate an OpenAI Chat Completions request into a Gemini request.
pub fn openai_to_gemini(
    req: &ChatCompletionRequest,
    ctx: &mut ConversionContext,
) -> Result<GenerateContentRequest> {
    let system = req
        .messages
        .iter()
        .filter(|m| is_system_role(&m.role))
        .map(ChatMessage::text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    for tool in req.tools.iter().flatten() {
        ctx.bindings.declare(&tool.function.name);
    }

    let mut contents: Vec<Content> = Vec::new();
    for msg in req.messages.iter().filter(|m| !is_system_role(&m.role)) {
        let content = match msg.role.as_str() {
            "assistant" => {
                let mut parts: Vec<Part> = openai_parts_to_gemini(msg);
                for call in msg.tool_calls.iter().flatten() {
                    ctx.bindings.record(&call.function.name, &call.id);
                    parts.push(Part::function_call(
                        call.function.name.clone(),
                        tools::parse_arguments(&call.function.arguments),
                    ));
                }
                Content::new("model", parts)
            }
            "tool" => {
                let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
                let Some(name) =
                    tools::recover_function_name(&ctx.bindings, call_id, msg.name.as_deref())
                else {
                    tracing::debug!(call_id, "dropping tool result with unrecoverable function name");
                    continue;
                };
                let payload = tools::function_response_payload(tools::safe_parse_json(&msg.text()));
                Content::new("function", vec![Part::function_response(name, payload)])
            }
            _ => Content::new("user", openai_parts_to_gemini(msg)),
        };
        push_merged(&mut contents, content);
    }

    let config = GenerationConfig {
        temperature: Some(or_default(req.temperature, DEFAULT_TEMPERATURE)),
        top_p: Some(or_default(req.top_p, DEFAULT_TOP_P)),
        max_output_tokens: Some(or_default(
            req.max_tokens.or(req.max_completion_tokens),
            DEFAULT_GEMINI_MAX_TOKENS,
        )),
        stop_sequences: req
            .stop
            .clone()
            .map(StopSequences::into_vec)
            .filter(|s| !s.is_empty()),
        ..GenerationConfig::default()
    };

    let declarations: Vec<gemini::FunctionDeclaration> = req
        .tools
        .iter()
        .flatten()
        .map(|t| gemini::FunctionDeclaration {
            name: t.function.name.clone(),
            description: t.function.description.clone(),
            parameters: schema_for_gemini(&t.function.parameters),
        })
        .collect();

    let tool_config = if declarations.is_empty() {
        None
    } else {
        req.tool_choice.as_ref().map(openai_tool_choice_to_gemini)
    };

    Ok(GenerateContentRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system)],
        }),
        generation_config: Some(config),
        tools: wrap_declarations(declarations),
        tool_config,
        ..GenerateContentRequest::default()
    })
}

fn openai_parts_to_gemini(msg: &ChatMessage) -> Vec<Part> {
    msg.content
        .clone()
        .map(ChatContent::into_parts)
        .unwrap_or_default()
        .iter()
        .filter_map(content::openai_part_to_gemini)
        .collect()
}

fn openai_tool_choice_to_gemini(choice: &ChatToolChoice) -> gemini::ToolConfig {
    match choice {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "none" => gemini::ToolConfig::mode("NONE", None),
            "required" => gemini::ToolConfig::mode("ANY", None),
            _ => gemini::ToolConfig::mode("AUTO", None),
        },
        ChatToolChoice::Specific(specific) => {
            gemini::ToolConfig::mode("ANY", Some(vec![specific.function.name.clone()]))
        }
    }
}

// ---------------------------------------------------------------------------
// Claude -> Gemini
// ---------------------------------------------------------------------------

/// Translate a Claude Messages request into a Gemini request.
pub fn claude_to_gemini(
    req: &MessagesRequest,
    ctx: &mut ConversionContext,
) -> Result<GenerateContentRequest> {
    for tool in req.tools.iter().flatten() {
        ctx.bindings.declare(&tool.name);
    }

    let mut contents: Vec<Content> = Vec::new();
    for msg in &req.messages {
        let role = match msg.role {
            Role::Assistant => "model",
            Role::User => "user",
        };
        let mut parts = Vec::new();
        let mut responses = Vec::new();

        for block in msg.content.blocks() {
            match block {
                ContentBlock::ToolUse { id, name, input } => {
                    ctx.bindings.record(&name, &id);
                    flush(&mut contents, "function", &mut responses);
                    parts.push(Part::function_call(name, input));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    name,
                    ..
                } => {
                    let Some(name) =
                        tools::recover_function_name(&ctx.bindings, &tool_use_id, name.as_deref())
                    else {
                        tracing::debug!(
                            tool_use_id = %tool_use_id,
                            "dropping tool result with unrecoverable function name"
                        );
                        continue;
                    };
                    let value = match content {
                        Some(ToolResultContent::Text(s)) => Value::String(s),
                        Some(ToolResultContent::Blocks(blocks)) => {
                            serde_json::to_value(blocks).unwrap_or(Value::Null)
                        }
                        Some(ToolResultContent::Json(v)) => v,
                        None => Value::Null,
                    };
                    flush(&mut contents, role, &mut parts);
                    responses.push(Part::function_response(
                        name,
                        tools::function_response_payload(value),
                    ));
                }
                other => {
                    flush(&mut contents, "function", &mut responses);
                    parts.extend(content::claude_block_to_gemini(&other));
                }
            }
        }

        flush(&mut contents, "function", &mut responses);
        flush(&mut contents, role, &mut parts);
    }

    let system = req.system.as_ref().map(SystemContent::as_text).unwrap_or_default();

    let config = GenerationConfig {
        temperature: Some(or_default(req.temperature, DEFAULT_TEMPERATURE)),
        top_p: Some(or_default(req.top_p, DEFAULT_TOP_P)),
        top_k: req.top_k,
        max_output_tokens: Some(or_default(req.max_tokens, DEFAULT_GEMINI_MAX_TOKENS)),
        stop_sequences: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        ..GenerationConfig::default()
    };

    let declarations: Vec<gemini::FunctionDeclaration> = req
        .tools
        .iter()
        .flatten()
        .map(|t| gemini::FunctionDeclaration {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: schema_for_gemini(&t.input_schema),
        })
        .collect();

    let tool_config = if declarations.is_empty() {
        None
    } else {
        req.tool_choice.as_ref().map(claude_tool_choice_to_gemini)
    };

    Ok(GenerateContentRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system)],
        }),
        generation_config: Some(config),
        tools: wrap_declarations(declarations),
        tool_config,
        ..GenerateContentRequest::default()
    })
}

fn claude_tool_choice_to_gemini(choice: &claude::ToolChoice) -> gemini::ToolConfig {
    match choice {
        claude::ToolChoice::Auto => gemini::ToolConfig::mode("AUTO", None),
        claude::ToolChoice::None => gemini::ToolConfig::mode("NONE", None),
        claude::ToolChoice::Any => gemini::ToolConfig::mode("ANY", None),
        claude::ToolChoice::Tool { name } => {
            gemini::ToolConfig::mode("ANY", Some(vec![name.clone()]))
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini helpers
// ---------------------------------------------------------------------------

fn schema_for_gemini(schema: &Value) -> Option<Value> {
    (!schema.is_null()).then(|| tools::sanitize_schema(schema))
}

fn wrap_declarations(declarations: Vec<gemini::FunctionDeclaration>) -> Option<Vec<gemini::Tool>> {
    (!declarations.is_empty()).then(|| {
        vec![gemini::Tool {
            function_declarations: declarations,
        }]
    })
}

/// Moves a pending run of parts into `contents` under `role`.
fn flush(contents: &mut Vec<Content>, role: &str, parts: &mut Vec<Part>) {
    if !parts.is_empty() {
        push_merged(contents, Content::new(role, std::mem::take(parts)));
    }
}

/// Appends a content, merging it into the previous one when both share a
/// role and hold only text, or when both are function results. Contents
/// without parts are dropped.
fn push_merged(contents: &mut Vec<Content>, content: Content) {
    if content.parts.is_empty() {
        return;
    }
    if let Some(last) = contents.last_mut() {
        let same_role = last.role() == content.role();
        let text_only = last.is_text_only() && content.is_text_only();
        let function_results = content.role() == "function";
        if same_role && (text_only || function_results) {
            last.parts.extend(content.parts);
            return;
        }
    }
    contents.push(content);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::params::ReasoningSettings;
    use serde_json::json;

    fn ctx() -> ConversionContext {
        ConversionContext::default()
    }

    fn claude_req(value: Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    fn openai_req(value: Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_claude_to_openai_basic_defaults() {
        let req = claude_req(json!({"model": "x", "messages": [{"role": "user", "content": "hi"}]}));
        let out = serde_json::to_value(claude_to_openai(&req, &mut ctx()).unwrap()).unwrap();
        assert_eq!(
            out,
            json!({
                "model": "x",
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 8192,
                "temperature": 1.0,
                "top_p": 0.9
            })
        );
    }

    #[test]
    fn test_claude_to_openai_system_and_tool_results() {
        let req = claude_req(json!({
            "model": "x",
            "system": [{"type": "text", "text": "be brief"}, "and kind"],
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "checking"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"},
                    {"type": "text", "text": "thanks"}
                ]}
            ]
        }));
        let out = claude_to_openai(&req, &mut ctx()).unwrap();
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[0].text(), "be brief\nand kind");
        let assistant = &out.messages[2];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].function.arguments, r#"{"city":"Paris"}"#);
        assert_eq!(out.messages[3].role, "tool");
        assert_eq!(out.messages[3].text(), "sunny");
        assert_eq!(out.messages[4].text(), "thanks");
    }

    #[test]
    fn test_claude_to_openai_thinking_maps_to_effort() {
        let req = claude_req(json!({
            "model": "x",
            "max_tokens": 4000,
            "thinking": {"type": "enabled", "budget_tokens": 2000},
            "messages": [{"role": "user", "content": "think"}]
        }));
        let mut ctx = ConversionContext::new(ReasoningSettings {
            low_threshold: Some(1024),
            high_threshold: Some(8192),
            max_tokens: None,
        });
        let out = claude_to_openai(&req, &mut ctx).unwrap();
        assert_eq!(out.reasoning_effort.as_deref(), Some("medium"));
        assert_eq!(out.max_completion_tokens, Some(4000));
        assert!(out.max_tokens.is_none());
    }

    #[test]
    fn test_claude_to_openai_thinking_without_thresholds_fails() {
        let req = claude_req(json!({
            "model": "x",
            "thinking": {"type": "enabled", "budget_tokens": 2000},
            "messages": [{"role": "user", "content": "think"}]
        }));
        assert!(claude_to_openai(&req, &mut ctx()).is_err());
    }

    #[test]
    fn test_gemini_to_openai_pairs_calls_by_name() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "weather?"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Oslo"}}}]},
                {"role": "function", "parts": [{"functionResponse": {"name": "get_weather", "response": {"content": "cold"}}}]}
            ],
            "generationConfig": {"maxOutputTokens": 100, "temperature": 0}
        }))
        .unwrap();
        let out = gemini_to_openai(&req, &mut ctx()).unwrap();
        assert_eq!(out.messages[0].role, "system");
        let call_id = out.messages[2].tool_calls.as_ref().unwrap()[0].id.clone();
        assert_eq!(out.messages[3].role, "tool");
        assert_eq!(out.messages[3].tool_call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(out.messages[3].text(), "cold");
        assert_eq!(out.max_tokens, Some(100));
        assert_eq!(out.temperature, Some(1.0));
    }

    #[test]
    fn test_openai_to_claude_unmatched_call_becomes_text() {
        let req = openai_req(json!({
            "model": "x",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "let me look", "tool_calls": [
                    {"id": "call_42", "type": "function", "function": {"name": "search", "arguments": "{}"}}
                ]}
            ]
        }));
        let out = openai_to_claude(&req, &mut ctx()).unwrap();
        let blocks = out.messages[1].content.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "let me look"));
    }

    #[test]
    fn test_openai_to_claude_folds_tool_results() {
        let req = openai_req(json!({
            "model": "x",
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_a", "type": "function", "function": {"name": "a", "arguments": "{\"x\":1}"}},
                    {"id": "call_b", "type": "function", "function": {"name": "b", "arguments": "not json"}}
                ]},
                {"role": "tool", "tool_call_id": "call_a", "content": "ra"},
                {"role": "tool", "tool_call_id": "call_b", "content": "rb"}
            ],
            "max_tokens": 0,
            "stop": "END"
        }));
        let out = openai_to_claude(&req, &mut ctx()).unwrap();
        assert!(matches!(out.system, Some(SystemContent::Text(ref s)) if s == "sys"));
        assert_eq!(out.messages.len(), 3);
        let assistant = out.messages[1].content.blocks();
        assert!(matches!(&assistant[1], ContentBlock::ToolUse { input, .. } if *input == json!({})));
        let results = out.messages[2].content.blocks();
        assert_eq!(results.len(), 2);
        assert_eq!(out.max_tokens, Some(8192));
        assert_eq!(out.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn test_openai_to_gemini_merges_and_recovers_names() {
        let req = openai_req(json!({
            "model": "x",
            "messages": [
                {"role": "system", "content": "a"},
                {"role": "system", "content": "b"},
                {"role": "user", "content": "one"},
                {"role": "user", "content": [{"type": "text", "text": "two"}]},
                {"role": "assistant", "tool_calls": [
                    {"id": "toolu_x", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"z\"}"}}
                ]},
                {"role": "tool", "tool_call_id": "toolu_x", "content": "{\"hits\": 3}"},
                {"role": "tool", "tool_call_id": "toolu_unknown", "content": "lost"}
            ],
            "tools": [{"type": "function", "function": {"name": "lookup", "parameters": {
                "type": "object", "additionalProperties": false,
                "properties": {"q": {"type": "string"}}
            }}}],
            "tool_choice": {"type": "function", "function": {"name": "lookup"}},
            "stop": ["x"]
        }));
        let out = openai_to_gemini(&req, &mut ctx()).unwrap();
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "a\nb");
        assert_eq!(out.contents.len(), 3);
        assert_eq!(out.contents[0].parts.len(), 2);
        assert_eq!(value["contents"][1]["parts"][0]["functionCall"]["args"], json!({"q": "z"}));
        assert_eq!(value["contents"][2]["role"], "function");
        assert_eq!(
            value["contents"][2]["parts"][0]["functionResponse"],
            json!({"name": "lookup", "response": {"hits": 3}})
        );
        assert_eq!(
            value["tools"][0]["functionDeclarations"][0]["parameters"],
            json!({"type": "object", "properties": {"q": {"type": "string"}}})
        );
        assert_eq!(
            value["toolConfig"],
            json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["lookup"]}})
        );
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 65536);
        assert_eq!(value["generationConfig"]["stopSequences"], json!(["x"]));
    }

    #[test]
    fn test_openai_to_gemini_decodes_names_from_call_ids() {
        let req = openai_req(json!({
            "model": "x",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "tool", "tool_call_id": "call_get_weather_1", "content": "sunny"},
                {"role": "tool", "tool_call_id": "call_abc123XYZ", "content": "lost"}
            ]
        }));
        let out = openai_to_gemini(&req, &mut ctx()).unwrap();
        let value = serde_json::to_value(&out).unwrap();
        let names: Vec<&str> = value["contents"]
            .as_array()
            .unwrap()
            .iter()
            .flat_map(|c| c["parts"].as_array().unwrap())
            .filter_map(|p| p["functionResponse"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["get_weather"]);
    }

    #[test]
    fn test_claude_to_gemini_tool_round() {
        let req = claude_req(json!({
            "model": "x",
            "system": "sys",
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
                ]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "tool_use", "id": "toolu_9", "name": "describe", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_9", "content": [{"type": "text", "text": "a cat"}]}
                ]}
            ],
            "tools": [{"name": "describe", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "any"}
        }));
        let out = claude_to_gemini(&req, &mut ctx()).unwrap();
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(value["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"][1]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(value["contents"][2]["role"], "function");
        assert_eq!(
            value["contents"][2]["parts"][0]["functionResponse"]["response"],
            json!({"content": "a cat"})
        );
        assert_eq!(value["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 65536);
    }

    #[test]
    fn test_zero_is_unset_only_for_sampling_and_limits() {
        let req = claude_req(json!({
            "model": "x",
            "max_tokens": 0,
            "temperature": 0,
            "top_k": 0,
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let value = serde_json::to_value(claude_to_gemini(&req, &mut ctx()).unwrap()).unwrap();
        assert_eq!(value["generationConfig"]["temperature"].as_f64(), Some(1.0));
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 65536);
        assert_eq!(value["generationConfig"]["topK"], 0);
    }

    #[test]
    fn test_claude_to_gemini_keeps_block_order() {
        let req = claude_req(json!({
            "model": "x",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "text", "text": "before"},
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "found"},
                    {"type": "text", "text": "after"}
                ]}
            ]
        }));
        let out = claude_to_gemini(&req, &mut ctx()).unwrap();
        let value = serde_json::to_value(&out).unwrap();
        let roles: Vec<&str> = value["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["model", "user", "function", "user"]);
        assert_eq!(value["contents"][1]["parts"][0]["text"], "before");
        assert_eq!(value["contents"][2]["parts"][0]["functionResponse"]["name"], "lookup");
        assert_eq!(value["contents"][3]["parts"][0]["text"], "after");
    }
}
