//! Model-list converters. Pure field renaming, with the vendor `models/`
//! prefix stripped and absent descriptions or timestamps filled in.

use chrono::{DateTime, Utc};

use super::anthropic_types::{ModelInfo as ClaudeModel, ModelList as ClaudeModelList};
use super::gemini_types::ModelList as GeminiModelList;
use super::openai_types::{Model, ModelList};

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

fn openai_list(data: Vec<Model>) -> ModelList {
    ModelList {
        object: "list".to_string(),
        data,
    }
}

pub fn gemini_to_openai(list: &GeminiModelList) -> ModelList {
    let now = unix_now();
    openai_list(
        list.models
            .iter()
            .map(|m| Model::new(m.id(), now, "google"))
            .collect(),
    )
}

pub fn claude_to_openai(list: &ClaudeModelList) -> ModelList {
    let now = unix_now();
    openai_list(
        list.models
            .iter()
            .filter_map(|m| {
                let id = m.id.as_deref().or(m.name.as_deref())?;
                let created = m
                    .created_at
                    .as_deref()
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map_or(now, |dt| dt.timestamp());
                Some(Model::new(id, created, "anthropic"))
            })
            .collect(),
    )
}

pub fn gemini_to_claude(list: &GeminiModelList) -> ClaudeModelList {
    ClaudeModelList {
        models: list
            .models
            .iter()
            .map(|m| ClaudeModel::named(m.id(), m.description.clone().unwrap_or_default()))
            .collect(),
    }
}

pub fn openai_to_claude(list: &ModelList) -> ClaudeModelList {
    ClaudeModelList {
        models: list
            .data
            .iter()
            .map(|m| ClaudeModel::named(m.id.as_str(), ""))
            .collect(),
    }
}
