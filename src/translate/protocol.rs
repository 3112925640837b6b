//! Dialect and conversion-kind identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// One of the three wire dialects the gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[serde(rename = "openai")]
    OpenAi,
    Claude,
    Gemini,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::OpenAi, Protocol::Claude, Protocol::Gemini];

    pub fn prefix(self) -> &'static str {
        match self {
            Protocol::OpenAi => "openai",
            Protocol::Claude => "claude",
            Protocol::Gemini => "gemini",
        }
    }

    /// Resolve a provider name such as `gemini-cli-oauth` or `openai-custom`
    /// by its protocol prefix.
    pub fn from_provider(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.starts_with("anthropic") {
            return Some(Protocol::Claude);
        }
        Self::ALL
            .into_iter()
            .find(|protocol| lower.starts_with(protocol.prefix()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for Protocol {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_provider(s).ok_or_else(|| ProxyError::config(format!("unknown protocol: {s}")))
    }
}

/// The four payload families the registry knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionKind {
    Request,
    Response,
    StreamChunk,
    ModelList,
}

impl ConversionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversionKind::Request => "request",
            ConversionKind::Response => "response",
            ConversionKind::StreamChunk => "streamChunk",
            ConversionKind::ModelList => "modelList",
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(ConversionKind::Request),
            "response" => Ok(ConversionKind::Response),
            "streamChunk" | "stream_chunk" => Ok(ConversionKind::StreamChunk),
            "modelList" | "model_list" => Ok(ConversionKind::ModelList),
            other => Err(ProxyError::UnsupportedKind {
                kind: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_prefix_resolution() {
        assert_eq!(Protocol::from_provider("openai"), Some(Protocol::OpenAi));
        assert_eq!(
            Protocol::from_provider("gemini-cli-oauth"),
            Some(Protocol::Gemini)
        );
        assert_eq!(
            Protocol::from_provider("claude-custom"),
            Some(Protocol::Claude)
        );
        assert_eq!(Protocol::from_provider("anthropic"), Some(Protocol::Claude));
        assert_eq!(Protocol::from_provider("kiro"), None);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "streamChunk".parse::<ConversionKind>().unwrap(),
            ConversionKind::StreamChunk
        );
        let err = "embedding".parse::<ConversionKind>().unwrap_err();
        assert!(matches!(err, ProxyError::UnsupportedKind { .. }));
    }
}
