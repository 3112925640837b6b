//! Prompt log: the last [`MAX_PROMPT_RECORDS`] proxied exchanges, kept in
//! memory and persisted as JSONL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::translate::Protocol;

pub const MAX_PROMPT_RECORDS: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub timestamp: DateTime<Utc>,
    /// Model name as the client sent it.
    pub model: String,
    pub client_protocol: Protocol,
    pub backend_protocol: Protocol,
    pub stream: bool,
    pub prompt: String,
    pub output: String,
}

impl PromptRecord {
    pub fn new(
        model: impl Into<String>,
        client_protocol: Protocol,
        backend_protocol: Protocol,
        stream: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            model: model.into(),
            client_protocol,
            backend_protocol,
            stream,
            prompt: String::new(),
            output: String::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

pub struct PromptLog {
    records: VecDeque<PromptRecord>,
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl PromptLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = VecDeque::with_capacity(MAX_PROMPT_RECORDS);

        if file_path.exists() {
            let reader = BufReader::new(File::open(&file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(record) = serde_json::from_str::<PromptRecord>(&line) {
                    if records.len() >= MAX_PROMPT_RECORDS {
                        records.pop_front();
                    }
                    records.push_back(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            records,
            file_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn record(&mut self, record: PromptRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                if let Err(e) = writeln!(writer, "{json}").and_then(|()| writer.flush()) {
                    tracing::warn!(error = %e, path = %self.file_path.display(), "prompt log write failed");
                }
            }
        }
        if self.records.len() >= MAX_PROMPT_RECORDS {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<PromptRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rewrite the file so it holds only the retained records.
    pub fn compact(&mut self) -> std::io::Result<()> {
        self.writer = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            if let Ok(json) = serde_json::to_string(record) {
                writeln!(writer, "{json}")?;
            }
        }
        writer.flush()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }
}

#[derive(Clone)]
pub struct SharedPromptLog(Arc<Mutex<PromptLog>>);

impl SharedPromptLog {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut log = PromptLog::new(file_path)?;
        log.compact()?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    pub fn record(&self, record: PromptRecord) {
        if let Ok(mut log) = self.0.lock() {
            log.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<PromptRecord> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Text extraction
// ---------------------------------------------------------------------------

fn joined_text(items: &[Value]) -> String {
    items
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect()
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => joined_text(items),
        _ => String::new(),
    }
}

/// Text of the last message (or content turn) of a native request.
pub fn prompt_text(protocol: Protocol, request: &Value) -> String {
    let key = match protocol {
        Protocol::Gemini => "contents",
        Protocol::OpenAi | Protocol::Claude => "messages",
    };
    let Some(last) = request.get(key).and_then(Value::as_array).and_then(|m| m.last()) else {
        return String::new();
    };
    match protocol {
        Protocol::Gemini => last
            .get("parts")
            .and_then(Value::as_array)
            .map(|parts| joined_text(parts))
            .unwrap_or_default(),
        Protocol::OpenAi | Protocol::Claude => {
            last.get("content").map(content_text).unwrap_or_default()
        }
    }
}

/// Answer text carried by a native response or stream chunk.
pub fn output_text(protocol: Protocol, payload: &Value) -> String {
    match protocol {
        Protocol::OpenAi => {
            let choice = &payload["choices"][0];
            let content = if choice["message"].is_object() {
                &choice["message"]["content"]
            } else {
                &choice["delta"]["content"]
            };
            content_text(content)
        }
        Protocol::Claude => {
            if payload["type"] == "content_block_delta" {
                let delta = &payload["delta"];
                return delta["text"]
                    .as_str()
                    .or_else(|| delta["partial_json"].as_str())
                    .unwrap_or_default()
                    .to_string();
            }
            payload["content"]
                .as_array()
                .map(|blocks| joined_text(blocks))
                .unwrap_or_default()
        }
        Protocol::Gemini => payload["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| p["thought"] != true)
                    .filter_map(|p| p["text"].as_str())
                    .collect()
            })
            .unwrap_or_default(),
    }
}
