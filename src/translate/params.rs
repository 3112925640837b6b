//! Generation parameter defaults and reasoning-effort derivation.

use crate::error::{ProxyError, Result};

pub const DEFAULT_MAX_TOKENS: u64 = 8192;
pub const DEFAULT_GEMINI_MAX_TOKENS: u64 = 65536;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 0.9;

/// Picks the client value unless it is absent or zero.
///
/// Only temperature, top-p and max tokens go through here, so only those
/// treat zero as "unset": an explicit `temperature: 0` is replaced by the
/// default, while top-k and thinking budgets keep a zero as given.
pub fn or_default<T>(value: Option<T>, default: T) -> T
where
    T: PartialEq + Default,
{
    match value {
        Some(v) if v != T::default() => v,
        _ => default,
    }
}

/// Thresholds used to bucket a thinking budget into an OpenAI
/// `reasoning_effort`, plus the fallback completion limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningSettings {
    pub low_threshold: Option<u64>,
    pub high_threshold: Option<u64>,
    pub max_tokens: Option<u64>,
}

impl ReasoningSettings {
    /// Effort for a thinking budget: at or below the low threshold is `low`,
    /// at or below the high threshold is `medium`, anything above is `high`.
    /// A missing budget means `high`.
    pub fn effort_for(&self, budget: Option<u64>) -> Result<&'static str> {
        let Some(budget) = budget else {
            return Ok("high");
        };
        let low = self.low_threshold.ok_or_else(|| {
            ProxyError::config("low reasoning threshold is not configured")
        })?;
        let high = self.high_threshold.ok_or_else(|| {
            ProxyError::config("high reasoning threshold is not configured")
        })?;
        Ok(if budget <= low {
            "low"
        } else if budget <= high {
            "medium"
        } else {
            "high"
        })
    }

    /// Completion limit for a reasoning request: the client's `max_tokens`
    /// wins, then the configured limit.
    pub fn completion_limit(&self, client_max_tokens: Option<u64>) -> Result<u64> {
        client_max_tokens.or(self.max_tokens).ok_or_else(|| {
            ProxyError::config("reasoning max tokens is not configured and the request set none")
        })
    }
}
