//! Tool-call plumbing shared by the converters: call-id bindings, function
//! name recovery, result payload shaping, schema sanitizing and call/result
//! pairing.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::openai_types::{ChatContent, ChatMessage};

const CALL_ID_PREFIX: &str = "call_";
const CALL_ID_SUFFIX_LEN: usize = 8;

/// Request-scoped memory of the call id last issued for each function name,
/// and of the function names the request declared.
///
/// Gemini correlates calls and results by function name, the other two
/// dialects by opaque id. The bindings bridge the two within one exchange.
#[derive(Debug, Clone, Default)]
pub struct ToolCallBindings {
    by_name: HashMap<String, String>,
    declared: HashSet<String>,
}

impl ToolCallBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, id: &str) {
        self.by_name.insert(name.to_string(), id.to_string());
    }

    pub fn declare(&mut self, name: &str) {
        self.declared.insert(name.to_string());
    }

    /// Id last issued for `name`.
    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Name whose last issued id is `id`.
    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, bound)| bound.as_str() == id)
            .map(|(name, _)| name.as_str())
    }

    /// Issue a fresh id for `name` and remember it.
    pub fn issue(&mut self, name: &str) -> String {
        let id = new_call_id(name);
        self.record(name, &id);
        id
    }

    /// Id for a result that only carries a function name: the bound id, or a
    /// fresh one when the call was never seen.
    pub fn id_or_issue(&mut self, name: &str) -> String {
        match self.id_for(name) {
            Some(id) => id.to_string(),
            None => self.issue(name),
        }
    }

    fn accepts_decoded(&self, name: &str) -> bool {
        !name.is_empty() && (self.declared.is_empty() || self.declared.contains(name))
    }
}

/// `call_<name>_<8 hex>`, decodable back to the name.
pub fn new_call_id(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{CALL_ID_PREFIX}{name}_{}",
        &suffix[..CALL_ID_SUFFIX_LEN]
    )
}

/// Function name structurally encoded in a call id, if any.
///
/// Everything between `call_` and the last underscore is taken as the name.
/// This is a heuristic: an id from elsewhere can decode to a wrong name.
pub fn decode_call_id(id: &str) -> Option<&str> {
    let (name, _suffix) = id.strip_prefix(CALL_ID_PREFIX)?.rsplit_once('_')?;
    (!name.is_empty()).then_some(name)
}

/// Function name for a tool result, tried in order: the request's bindings,
/// the name encoded in the call id, then a name carried on the result itself.
pub fn recover_function_name(
    bindings: &ToolCallBindings,
    call_id: &str,
    explicit: Option<&str>,
) -> Option<String> {
    if let Some(name) = bindings.name_for(call_id) {
        return Some(name.to_string());
    }
    if let Some(name) = decode_call_id(call_id).filter(|name| bindings.accepts_decoded(name)) {
        return Some(name.to_string());
    }
    explicit
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Shapes a tool result into a Gemini `functionResponse.response` object.
///
/// Arrays of text blocks are concatenated, null becomes an empty string, and
/// anything that is not already an object is wrapped as `{"content": ...}`.
pub fn function_response_payload(value: Value) -> Value {
    let value = match value {
        Value::Array(items) if items.iter().all(|item| item.get("text").is_some()) => {
            Value::String(
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect(),
            )
        }
        Value::Null => Value::String(String::new()),
        other => other,
    };
    match value {
        Value::Object(_) => value,
        Value::String(s) => json!({ "content": s }),
        other => json!({ "content": other.to_string() }),
    }
}

/// Parses tool arguments. Empty or malformed input yields an empty object.
pub fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|err| {
        debug!(error = %err, "malformed tool arguments, using empty object");
        Value::Object(Map::new())
    })
}

/// Parses JSON that may have been cut off mid-escape, returning the original
/// string when it still is not JSON.
pub fn safe_parse_json(text: &str) -> Value {
    if let Ok(value) = serde_json::from_str(text) {
        return value;
    }
    let cleaned = strip_dangling_escape(text);
    serde_json::from_str(cleaned).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn strip_dangling_escape(text: &str) -> &str {
    if let Some(pos) = text.rfind("\\u") {
        let tail = &text[pos + 2..];
        if tail.len() < 4 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return &text[..pos];
        }
    }
    text.strip_suffix('\\').unwrap_or(text)
}

const SCHEMA_KEYS: [&str; 6] = ["type", "description", "properties", "required", "enum", "items"];

/// Reduces a JSON schema to the subset Gemini accepts: `type`,
/// `description`, `properties`, `required`, `enum` and `items`, recursively.
pub fn sanitize_schema(schema: &Value) -> Value {
    let Value::Object(map) = schema else {
        return schema.clone();
    };
    let mut cleaned = Map::new();
    for key in SCHEMA_KEYS {
        let Some(value) = map.get(key) else {
            continue;
        };
        let value = match (key, value) {
            ("properties", Value::Object(props)) => Value::Object(
                props
                    .iter()
                    .map(|(name, prop)| (name.clone(), sanitize_schema(prop)))
                    .collect(),
            ),
            ("items", items) => sanitize_schema(items),
            (_, other) => other.clone(),
        };
        cleaned.insert(key.to_string(), value);
    }
    Value::Object(cleaned)
}

/// Enforces call/result pairing on an OpenAI-shaped conversation.
///
/// Tool calls without a later result are removed; an assistant message left
/// without calls keeps its text (or an empty string). Tool results that
/// answer no surviving earlier call are dropped.
pub fn reconcile_tool_calls(messages: &mut Vec<ChatMessage>) {
    let result_positions: Vec<(usize, String)> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == "tool")
        .filter_map(|(i, m)| m.tool_call_id.clone().map(|id| (i, id)))
        .collect();

    for (i, message) in messages.iter_mut().enumerate() {
        let Some(calls) = message.tool_calls.take() else {
            continue;
        };
        let before = calls.len();
        let kept: Vec<_> = calls
            .into_iter()
            .filter(|call| {
                result_positions
                    .iter()
                    .any(|(j, id)| *j > i && *id == call.id)
            })
            .collect();
        if kept.len() < before {
            debug!(
                dropped = before - kept.len(),
                "removing tool calls without results"
            );
        }
        if kept.is_empty() {
            if message.content.is_none() {
                message.content = Some(ChatContent::Text(String::new()));
            }
        } else {
            message.tool_calls = Some(kept);
        }
    }

    let mut issued: HashSet<String> = HashSet::new();
    messages.retain(|message| {
        if let Some(calls) = &message.tool_calls {
            issued.extend(calls.iter().map(|call| call.id.clone()));
        }
        if message.role != "tool" {
            return true;
        }
        let answered = message
            .tool_call_id
            .as_ref()
            .is_some_and(|id| issued.contains(id));
        if !answered {
            debug!(id = ?message.tool_call_id, "dropping orphan tool result");
        }
        answered
    });
}
