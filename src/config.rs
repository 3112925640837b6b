use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use crate::translate::params::ReasoningSettings;
use crate::translate::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const LOW_THRESHOLD_ENV: &str = "ANTHROPIC_TO_OPENAI_LOW_REASONING_THRESHOLD";
pub const HIGH_THRESHOLD_ENV: &str = "ANTHROPIC_TO_OPENAI_HIGH_REASONING_THRESHOLD";
pub const REASONING_MAX_TOKENS_ENV: &str = "OPENAI_REASONING_MAX_TOKENS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// JSONL file recording prompts and outputs of proxied calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_log: Option<PathBuf>,
    pub backend: BackendConfig,
    /// Client model name -> backend model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

/// Thresholds mapping a Claude thinking budget to an OpenAI reasoning effort,
/// and the completion limit used when the client sent none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
}

fn default_port() -> u16 {
    4222
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl ProxyConfig {
    /// Minimal config for a preset backend.
    pub fn for_backend(name: &str) -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            prompt_log: None,
            backend: BackendConfig {
                name: name.to_string(),
                base_url: None,
                api_key_env: None,
                protocol: None,
            },
            models: HashMap::new(),
            reasoning: ReasoningConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.backend.base_url {
            return Ok(url.clone());
        }

        let preset = self.preset().ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown backend '{}' and no base_url configured. Known backends: {}",
                self.backend.name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Environment variable holding the API key: configured, else the
    /// preset's, else `API_KEY`.
    pub fn api_key_env(&self) -> String {
        self.backend
            .api_key_env
            .clone()
            .or_else(|| self.preset().map(|p| p.default_api_key_env.to_string()))
            .unwrap_or_else(|| "API_KEY".to_string())
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        let var = self.api_key_env();
        std::env::var(&var).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{var}' not set. Set it with your backend API key."
            ))
        })
    }

    /// Dialect of the backend: configured, else the preset's, else inferred
    /// from the backend name prefix.
    pub fn protocol(&self) -> Result<Protocol> {
        if let Some(protocol) = self.backend.protocol {
            return Ok(protocol);
        }
        self.preset()
            .map(|p| p.protocol)
            .or_else(|| Protocol::from_provider(&self.backend.name))
            .ok_or_else(|| {
                ProxyError::config(format!(
                    "Cannot tell the protocol of backend '{}'; set backend.protocol",
                    self.backend.name
                ))
            })
    }

    /// Backend model for a client model name. Unmapped names pass through.
    pub fn map_model<'a>(&'a self, client_model: &'a str) -> &'a str {
        self.models
            .get(client_model)
            .map(String::as_str)
            .unwrap_or(client_model)
    }

    /// Reasoning settings with environment fallbacks applied.
    pub fn reasoning_settings(&self) -> Result<ReasoningSettings> {
        Ok(ReasoningSettings {
            low_threshold: with_env_fallback(self.reasoning.low_threshold, LOW_THRESHOLD_ENV)?,
            high_threshold: with_env_fallback(self.reasoning.high_threshold, HIGH_THRESHOLD_ENV)?,
            max_tokens: with_env_fallback(self.reasoning.max_tokens, REASONING_MAX_TOKENS_ENV)?,
        })
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        ProviderPreset::from_name(&self.backend.name)
    }
}

fn with_env_fallback(configured: Option<u64>, var: &str) -> Result<Option<u64>> {
    match configured {
        Some(value) => Ok(Some(value)),
        None => parse_integer_setting(std::env::var(var).ok().as_deref(), var),
    }
}

fn parse_integer_setting(raw: Option<&str>, var: &str) -> Result<Option<u64>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            ProxyError::config(format!("Invalid {var} value '{value}', must be an integer"))
        }),
    }
}

/// Config file locations, in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("dialect-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("dialect-proxy").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("dialect-proxy").join("config.toml"));
        paths.push(home.join(".dialect-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
