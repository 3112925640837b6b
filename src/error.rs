//! Error types for the gateway.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported conversion type: {kind}")]
    UnsupportedKind { kind: String },

    #[error("Unsupported target provider for {kind}: {target}")]
    UnsupportedTarget { kind: String, target: String },

    #[error("Unsupported source provider for {kind} to {target}: {source_protocol}")]
    UnsupportedSource {
        kind: String,
        source_protocol: String,
        target: String,
    },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// HTTP status a client should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedKind { .. }
            | Self::UnsupportedTarget { .. }
            | Self::UnsupportedSource { .. }
            | Self::Translation { .. }
            | Self::Json(_) => 400,
            Self::Upstream { status, .. } => *status,
            Self::Cancelled => 499,
            Self::Provider { .. } | Self::Http(_) => 502,
            Self::Config { .. } | Self::Io(_) | Self::Toml(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_are_distinguishable() {
        let kind = ProxyError::UnsupportedKind {
            kind: "embedding".into(),
        };
        let target = ProxyError::UnsupportedTarget {
            kind: "response".into(),
            target: "gemini".into(),
        };
        let source = ProxyError::UnsupportedSource {
            kind: "request".into(),
            source_protocol: "gemini".into(),
            target: "claude".into(),
        };
        assert!(kind.to_string().contains("embedding"));
        assert!(target.to_string().contains("target provider"));
        assert!(source.to_string().contains("source provider"));
        assert_eq!(source.status_code(), 400);
    }

    #[test]
    fn test_upstream_status_passes_through() {
        assert_eq!(ProxyError::upstream(429, "slow down").status_code(), 429);
        assert_eq!(ProxyError::provider("boom").status_code(), 502);
    }
}
