//! Per-exchange state threaded through the converters.

use super::params::ReasoningSettings;
use super::tools::ToolCallBindings;

/// Lives for one client exchange: created before the request is converted
/// and dropped after the response (or last stream chunk) is converted.
#[derive(Debug, Clone, Default)]
pub struct ConversionContext {
    pub bindings: ToolCallBindings,
    pub reasoning: ReasoningSettings,
}

impl ConversionContext {
    pub fn new(reasoning: ReasoningSettings) -> Self {
        Self {
            bindings: ToolCallBindings::new(),
            reasoning,
        }
    }
}
