//! Built-in backend presets.
//!
//! A preset supplies the base URL, dialect and API-key variable for a known
//! provider, so a config only needs `name = "..."`.

use crate::translate::Protocol;

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub protocol: Protocol,
    pub default_api_key_env: &'static str,
}

const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        protocol: Protocol::OpenAi,
        default_api_key_env: "OPENAI_API_KEY",
    },
    ProviderPreset {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        protocol: Protocol::OpenAi,
        default_api_key_env: "OPENROUTER_API_KEY",
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        protocol: Protocol::OpenAi,
        default_api_key_env: "DEEPSEEK_API_KEY",
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        protocol: Protocol::OpenAi,
        default_api_key_env: "GROQ_API_KEY",
    },
    ProviderPreset {
        name: "anthropic",
        base_url: "https://api.anthropic.com",
        protocol: Protocol::Claude,
        default_api_key_env: "ANTHROPIC_API_KEY",
    },
    ProviderPreset {
        name: "gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta",
        protocol: Protocol::Gemini,
        default_api_key_env: "GEMINI_API_KEY",
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        let name = name.to_lowercase();
        PRESETS.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    pub fn names() -> Vec<&'static str> {
        PRESETS.iter().map(|p| p.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_providers() {
        assert!(ProviderPreset::from_name("openai").is_some());
        assert!(ProviderPreset::from_name("Gemini").is_some());
        assert!(ProviderPreset::from_name("OpenRouter").is_some());
        assert!(ProviderPreset::from_name("fireworks").is_none());
    }

    #[test]
    fn test_preset_protocols() {
        for preset in ProviderPreset::all() {
            let expected = match preset.name {
                "anthropic" => Protocol::Claude,
                "gemini" => Protocol::Gemini,
                _ => Protocol::OpenAi,
            };
            assert_eq!(preset.protocol, expected, "preset {}", preset.name);
        }
    }
}
