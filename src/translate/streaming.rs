//! Streaming translation.
//!
//! Chunk converters are stateless: each maps one upstream chunk or event to
//! at most one client chunk or event, and `None` means "nothing to send".
//! Gemini and OpenAI chunks can carry several things at once (text plus a
//! finish reason), so the Claude-bound converters also come in an `_events`
//! form that returns everything in order.
//!
//! Claude clients need a well-formed event sequence (`message_start`, paired
//! block start/stop, one `message_delta` and `message_stop`), which the
//! stateless converters cannot guarantee. [`ClaudeEventSequencer`] wraps their
//! output to provide it; [`OpenAiChunkSequencer`] does the lighter equivalent
//! for OpenAI clients.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};

use super::anthropic_types::{
    ContentBlock, Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, StreamEvent, Usage,
};
use super::finish_reason;
use super::gemini_types::GenerateContentResponse;
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::{completion_id, message_id};
use super::tools::ToolCallBindings;

const CHUNK_OBJECT: &str = "chat.completion.chunk";

fn chunk(model: &str, delta: ChunkDelta, finish_reason: Option<&str>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: completion_id(),
        object: CHUNK_OBJECT.to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish_reason.map(str::to_string),
        }],
        usage: None,
    }
}

/// Final chunk that closes an OpenAI stream whose upstream never reported a
/// finish reason.
pub fn openai_stop_chunk(model: &str) -> ChatCompletionChunk {
    chunk(model, ChunkDelta::default(), Some("stop"))
}

fn empty_input() -> Value {
    Value::Object(Map::new())
}

// ---------------------------------------------------------------------------
// Gemini -> OpenAI
// ---------------------------------------------------------------------------

pub fn gemini_chunk_to_openai(
    resp: &GenerateContentResponse,
    model: &str,
    bindings: &mut ToolCallBindings,
) -> Option<ChatCompletionChunk> {
    let candidate = resp.first_candidate()?;
    let parts = &candidate.content.parts;

    let text = candidate.content.text();
    let thoughts: String = parts
        .iter()
        .filter(|p| p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect();
    let tool_calls: Vec<ChunkToolCall> = parts
        .iter()
        .filter_map(|p| p.function_call.as_ref())
        .enumerate()
        .map(|(i, call)| ChunkToolCall {
            index: i as u64,
            id: Some(bindings.issue(&call.name)),
            call_type: Some("function".to_string()),
            function: Some(ChunkToolCallFunction {
                name: Some(call.name.clone()),
                arguments: Some(call.args.to_string()),
            }),
        })
        .collect();

    let finish = candidate.finish_reason.as_deref().map(|reason| {
        if tool_calls.is_empty() {
            finish_reason::gemini_to_openai(Some(reason))
        } else {
            "tool_calls"
        }
    });

    if text.is_empty() && thoughts.is_empty() && tool_calls.is_empty() && finish.is_none() {
        return None;
    }

    let delta = ChunkDelta {
        role: None,
        content: (!text.is_empty()).then_some(text),
        reasoning_content: (!thoughts.is_empty()).then_some(thoughts),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    };
    let mut out = chunk(model, delta, finish);
    if finish.is_some() {
        out.usage = resp.usage_metadata.as_ref().map(|u| ChatUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total(),
        });
    }
    Some(out)
}

// ---------------------------------------------------------------------------
// Claude -> OpenAI
// ---------------------------------------------------------------------------

pub fn claude_event_to_openai(event: &StreamEvent, model: &str) -> Option<ChatCompletionChunk> {
    match event {
        StreamEvent::MessageStart { .. } => Some(chunk(
            model,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
                ..ChunkDelta::default()
            },
            None,
        )),
        StreamEvent::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            ContentBlock::ToolUse { id, name, .. } => Some(chunk(
                model,
                ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index: *index as u64,
                        id: Some(id.clone()),
                        call_type: Some("function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: Some(name.clone()),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..ChunkDelta::default()
                },
                None,
            )),
            ContentBlock::Text { text } if !text.is_empty() => Some(text_chunk(model, text)),
            _ => None,
        },
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            Delta::TextDelta { text } => Some(text_chunk(model, text)),
            Delta::ThinkingDelta { thinking } => Some(chunk(
                model,
                ChunkDelta {
                    reasoning_content: Some(thinking.clone()),
                    ..ChunkDelta::default()
                },
                None,
            )),
            Delta::InputJsonDelta { partial_json } => Some(chunk(
                model,
                ChunkDelta {
                    tool_calls: Some(vec![ChunkToolCall {
                        index: *index as u64,
                        id: None,
                        call_type: None,
                        function: Some(ChunkToolCallFunction {
                            name: None,
                            arguments: Some(partial_json.clone()),
                        }),
                    }]),
                    ..ChunkDelta::default()
                },
                None,
            )),
            Delta::SignatureDelta { .. } => None,
        },
        StreamEvent::MessageDelta { delta, usage } => {
            let mut out = chunk(
                model,
                ChunkDelta::default(),
                Some(finish_reason::claude_to_openai(delta.stop_reason.as_deref())),
            );
            out.usage = Some(ChatUsage::new(0, usage.output_tokens));
            Some(out)
        }
        StreamEvent::ContentBlockStop { .. }
        | StreamEvent::MessageStop
        | StreamEvent::Ping
        | StreamEvent::Error { .. } => None,
    }
}

fn text_chunk(model: &str, text: &str) -> ChatCompletionChunk {
    chunk(
        model,
        ChunkDelta {
            content: Some(text.to_string()),
            ..ChunkDelta::default()
        },
        None,
    )
}

// ---------------------------------------------------------------------------
// OpenAI -> Claude
// ---------------------------------------------------------------------------

/// Claude events for one OpenAI chunk, in order. Text and reasoning use
/// block index 0; tool call `n` uses `n + 1`. [`ClaudeEventSequencer`]
/// rewrites these into real block indices.
pub fn openai_chunk_to_claude_events(chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    let Some(choice) = chunk.choices.first() else {
        if let Some(usage) = &chunk.usage {
            events.push(usage_delta(None, usage.completion_tokens));
        }
        return events;
    };

    if let Some(reasoning) = choice.delta.reasoning_content.as_ref().filter(|r| !r.is_empty()) {
        events.push(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::ThinkingDelta {
                thinking: reasoning.clone(),
            },
        });
    }

    if let Some(text) = choice.delta.content.as_ref().filter(|t| !t.is_empty()) {
        events.push(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta { text: text.clone() },
        });
    }

    for tc in choice.delta.tool_calls.iter().flatten() {
        let index = tc.index as usize + 1;
        if let Some(id) = &tc.id {
            let name = tc
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse {
                    id: id.clone(),
                    name,
                    input: empty_input(),
                },
            });
        }
        if let Some(args) = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_ref())
            .filter(|a| !a.is_empty())
        {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta {
                    partial_json: args.clone(),
                },
            });
        }
    }

    if let Some(reason) = &choice.finish_reason {
        let output_tokens = chunk.usage.as_ref().map_or(0, |u| u.completion_tokens);
        events.push(usage_delta(
            Some(finish_reason::openai_to_claude(Some(reason))),
            output_tokens,
        ));
    }

    events
}

pub fn openai_chunk_to_claude(chunk: &ChatCompletionChunk) -> Option<StreamEvent> {
    openai_chunk_to_claude_events(chunk).into_iter().next()
}

fn usage_delta(stop_reason: Option<&str>, output_tokens: u64) -> StreamEvent {
    StreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: stop_reason.map(str::to_string),
            stop_sequence: None,
        },
        usage: DeltaUsage { output_tokens },
    }
}

// ---------------------------------------------------------------------------
// Gemini -> Claude
// ---------------------------------------------------------------------------

/// Claude events for one Gemini chunk, in part order, followed by a
/// `message_delta` when the chunk carries a finish reason.
pub fn gemini_chunk_to_claude_events(
    resp: &GenerateContentResponse,
    bindings: &mut ToolCallBindings,
) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let Some(candidate) = resp.first_candidate() else {
        return events;
    };

    let mut tool_index = 0;
    for part in &candidate.content.parts {
        if let Some(text) = part.text.as_ref().filter(|t| !t.is_empty()) {
            let delta = if part.is_thought() {
                Delta::ThinkingDelta {
                    thinking: text.clone(),
                }
            } else {
                Delta::TextDelta { text: text.clone() }
            };
            events.push(StreamEvent::ContentBlockDelta { index: 0, delta });
        } else if let Some(call) = &part.function_call {
            tool_index += 1;
            events.push(StreamEvent::ContentBlockStart {
                index: tool_index,
                content_block: ContentBlock::ToolUse {
                    id: bindings.issue(&call.name),
                    name: call.name.clone(),
                    input: empty_input(),
                },
            });
            events.push(StreamEvent::ContentBlockDelta {
                index: tool_index,
                delta: Delta::InputJsonDelta {
                    partial_json: call.args.to_string(),
                },
            });
        }
    }

    if let Some(reason) = candidate.finish_reason.as_deref() {
        let stop = if tool_index > 0 {
            "tool_use"
        } else {
            finish_reason::gemini_to_claude(Some(reason))
        };
        let output_tokens = resp
            .usage_metadata
            .as_ref()
            .map_or(0, |u| u.candidates_token_count);
        events.push(usage_delta(Some(stop), output_tokens));
    }

    events
}

/// Single most significant event for a Gemini chunk: a tool call (with its
/// full input), then reasoning text, then answer text, then the finish
/// reason.
pub fn gemini_chunk_to_claude(
    resp: &GenerateContentResponse,
    bindings: &mut ToolCallBindings,
) -> Option<StreamEvent> {
    let candidate = resp.first_candidate()?;
    let parts = &candidate.content.parts;

    if let Some(call) = parts.iter().find_map(|p| p.function_call.as_ref()) {
        return Some(StreamEvent::ContentBlockStart {
            index: 1,
            content_block: ContentBlock::ToolUse {
                id: bindings.issue(&call.name),
                name: call.name.clone(),
                input: call.args.clone(),
            },
        });
    }

    let thoughts: String = parts
        .iter()
        .filter(|p| p.is_thought())
        .filter_map(|p| p.text.as_deref())
        .collect();
    if !thoughts.is_empty() {
        return Some(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::ThinkingDelta { thinking: thoughts },
        });
    }

    let text = candidate.content.text();
    if !text.is_empty() {
        return Some(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: Delta::TextDelta { text },
        });
    }

    candidate.finish_reason.as_deref().map(|reason| {
        let output_tokens = resp
            .usage_metadata
            .as_ref()
            .map_or(0, |u| u.candidates_token_count);
        usage_delta(Some(finish_reason::gemini_to_claude(Some(reason))), output_tokens)
    })
}

// ---------------------------------------------------------------------------
// Claude event sequencing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    kind: BlockKind,
    index: usize,
}

/// Turns loosely ordered Claude events into a well-formed stream.
///
/// Usage:
///   let mut sequencer = ClaudeEventSequencer::new("claude-sonnet-4-20250514");
///   for event in events {
///       for out in sequencer.push(event) {
///           // send each event as SSE
///       }
///   }
///   let final_events = sequencer.finish();
///
/// Guarantees: `message_start` (followed by `ping`) comes first; every block
/// is started before its deltas and stopped before the next block starts;
/// block indices are contiguous from zero; `message_delta` and
/// `message_stop` are emitted exactly once, by [`finish`](Self::finish).
#[derive(Debug)]
pub struct ClaudeEventSequencer {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    next_index: usize,
    open: Option<OpenBlock>,
    tool_blocks: HashMap<usize, usize>,
    saw_tool_use: bool,
    stop_reason: Option<String>,
    input_tokens: u64,
    output_tokens: u64,
}

impl ClaudeEventSequencer {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: message_id(),
            started: false,
            finished: false,
            next_index: 0,
            open: None,
            tool_blocks: HashMap::new(),
            saw_tool_use: false,
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one event, returning the events to forward to the client.
    pub fn push(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        if let StreamEvent::MessageStart { message } = &event {
            self.input_tokens = message.usage.input_tokens;
        }

        let mut events = Vec::new();
        self.ensure_started(&mut events);

        match event {
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, input } => {
                    self.close_open(&mut events);
                    let real = self.open_block(BlockKind::ToolUse);
                    self.tool_blocks.insert(index, real);
                    self.saw_tool_use = true;
                    events.push(StreamEvent::ContentBlockStart {
                        index: real,
                        content_block: ContentBlock::ToolUse { id, name, input },
                    });
                }
                ContentBlock::Text { text } => {
                    self.text_delta(&mut events, BlockKind::Text, text);
                }
                ContentBlock::Thinking { thinking, .. } => {
                    self.text_delta(&mut events, BlockKind::Thinking, thinking);
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } => self.text_delta(&mut events, BlockKind::Text, text),
                Delta::ThinkingDelta { thinking } => {
                    self.text_delta(&mut events, BlockKind::Thinking, thinking);
                }
                Delta::SignatureDelta { signature } => {
                    if let Some(open) = self.open.filter(|o| o.kind == BlockKind::Thinking) {
                        events.push(StreamEvent::ContentBlockDelta {
                            index: open.index,
                            delta: Delta::SignatureDelta { signature },
                        });
                    }
                }
                Delta::InputJsonDelta { partial_json } => {
                    let target = self.tool_blocks.get(&index).copied().or_else(|| {
                        self.open
                            .filter(|o| o.kind == BlockKind::ToolUse)
                            .map(|o| o.index)
                    });
                    if let Some(target) = target {
                        events.push(StreamEvent::ContentBlockDelta {
                            index: target,
                            delta: Delta::InputJsonDelta { partial_json },
                        });
                    }
                }
            },
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if usage.output_tokens > 0 {
                    self.output_tokens = usage.output_tokens;
                }
            }
            error @ StreamEvent::Error { .. } => events.push(error),
            StreamEvent::MessageStart { .. }
            | StreamEvent::ContentBlockStop { .. }
            | StreamEvent::MessageStop
            | StreamEvent::Ping => {}
        }

        events
    }

    /// Call when the upstream stream ends to close the message.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.close_open(&mut events);
        self.finished = true;

        let stop_reason = match self.stop_reason.take() {
            Some(reason) if reason == "end_turn" && self.saw_tool_use => "tool_use".to_string(),
            Some(reason) => reason,
            None if self.saw_tool_use => "tool_use".to_string(),
            None => "end_turn".to_string(),
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push(StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                model: self.model.clone(),
                usage: Usage {
                    input_tokens: self.input_tokens,
                    ..Usage::default()
                },
                ..MessagesResponse::default()
            },
        });
        events.push(StreamEvent::Ping);
    }

    fn open_block(&mut self, kind: BlockKind) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.open = Some(OpenBlock { kind, index });
        index
    }

    fn close_open(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(open) = self.open.take() {
            events.push(StreamEvent::ContentBlockStop { index: open.index });
        }
    }

    fn text_delta(&mut self, events: &mut Vec<StreamEvent>, kind: BlockKind, text: String) {
        let index = match self.open {
            Some(open) if open.kind == kind => open.index,
            _ => {
                self.close_open(events);
                let index = self.open_block(kind);
                let content_block = match kind {
                    BlockKind::Thinking => ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                    _ => ContentBlock::text(String::new()),
                };
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block,
                });
                index
            }
        };
        if text.is_empty() {
            return;
        }
        let delta = match kind {
            BlockKind::Thinking => Delta::ThinkingDelta { thinking: text },
            _ => Delta::TextDelta { text },
        };
        events.push(StreamEvent::ContentBlockDelta { index, delta });
    }
}

// ---------------------------------------------------------------------------
// OpenAI chunk sequencing
// ---------------------------------------------------------------------------

/// Gives converted OpenAI chunks one stable id, announces the assistant role
/// once and numbers tool calls contiguously.
///
/// Finish reasons and usage are held back and sent once, in the chunk
/// returned by [`finish`](Self::finish), so the `MAX_TOKENS` ending each
/// continuation round never reaches the client.
#[derive(Debug)]
pub struct OpenAiChunkSequencer {
    id: String,
    model: String,
    created: i64,
    started: bool,
    finished: bool,
    tool_slots: HashMap<u64, u64>,
    next_tool: u64,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
}

impl OpenAiChunkSequencer {
    pub fn new(model: &str) -> Self {
        Self {
            id: completion_id(),
            model: model.to_string(),
            created: Utc::now().timestamp(),
            started: false,
            finished: false,
            tool_slots: HashMap::new(),
            next_tool: 0,
            finish_reason: None,
            usage: None,
        }
    }

    /// The chunk to forward, or `None` when nothing is left once its finish
    /// reason and usage are taken out.
    pub fn push(&mut self, mut chunk: ChatCompletionChunk) -> Option<ChatCompletionChunk> {
        if let Some(usage) = chunk.usage.take() {
            self.usage = Some(usage);
        }
        for choice in &mut chunk.choices {
            if let Some(reason) = choice.finish_reason.take() {
                self.finish_reason = Some(reason);
            }
        }
        chunk.choices.retain(|choice| !delta_is_empty(&choice.delta));
        if chunk.choices.is_empty() {
            return None;
        }
        Some(self.stamp(chunk))
    }

    /// The closing chunk with the last finish reason and usage seen. A stream
    /// that carried tool calls but ended on a plain stop reports `tool_calls`.
    pub fn finish(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let reason = match self.finish_reason.take() {
            Some(reason) if reason != "stop" => reason,
            _ if self.next_tool > 0 => "tool_calls".to_string(),
            _ => "stop".to_string(),
        };
        let mut stop = openai_stop_chunk(&self.model);
        for choice in &mut stop.choices {
            choice.finish_reason = Some(reason.clone());
        }
        stop.usage = self.usage.take();
        Some(self.stamp(stop))
    }

    fn stamp(&mut self, mut chunk: ChatCompletionChunk) -> ChatCompletionChunk {
        chunk.id.clone_from(&self.id);
        chunk.model.clone_from(&self.model);
        chunk.created = self.created;
        chunk.object = CHUNK_OBJECT.to_string();

        for choice in &mut chunk.choices {
            if !self.started {
                choice.delta.role = Some("assistant".to_string());
                self.started = true;
            }
            for tc in choice.delta.tool_calls.iter_mut().flatten() {
                if tc.id.is_some() {
                    self.tool_slots.insert(tc.index, self.next_tool);
                    self.next_tool += 1;
                }
                if let Some(slot) = self.tool_slots.get(&tc.index) {
                    tc.index = *slot;
                }
            }
        }
        chunk
    }
}

fn delta_is_empty(delta: &ChunkDelta) -> bool {
    delta.role.is_none()
        && delta.content.as_deref().map_or(true, str::is_empty)
        && delta.reasoning_content.as_deref().map_or(true, str::is_empty)
        && delta.tool_calls.as_ref().map_or(true, Vec::is_empty)
}
