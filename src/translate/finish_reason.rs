//! Finish-reason tables between dialects. Every mapping is total: unknown
//! reasons fall back to the target's plain "done" value.

/// OpenAI `finish_reason` to Claude `stop_reason`.
pub fn openai_to_claude(reason: Option<&str>) -> &'static str {
    match reason {
        Some("length") => "max_tokens",
        Some("content_filter") => "stop_sequence",
        Some("tool_calls" | "function_call") => "tool_use",
        _ => "end_turn",
    }
}

/// Gemini `finishReason` (either case) to Claude `stop_reason`.
pub fn gemini_to_claude(reason: Option<&str>) -> &'static str {
    let Some(reason) = reason else {
        return "end_turn";
    };
    match reason.to_ascii_uppercase().as_str() {
        "MAX_TOKENS" | "LENGTH" => "max_tokens",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Gemini `finishReason` to OpenAI `finish_reason`.
pub fn gemini_to_openai(reason: Option<&str>) -> &'static str {
    let Some(reason) = reason else {
        return "stop";
    };
    match reason.to_ascii_uppercase().as_str() {
        "MAX_TOKENS" | "LENGTH" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        _ => "stop",
    }
}

/// Claude `stop_reason` to OpenAI `finish_reason`.
pub fn claude_to_openai(reason: Option<&str>) -> &'static str {
    match reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some("refusal") => "content_filter",
        _ => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_to_claude() {
        assert_eq!(openai_to_claude(Some("stop")), "end_turn");
        assert_eq!(openai_to_claude(Some("length")), "max_tokens");
        assert_eq!(openai_to_claude(Some("content_filter")), "stop_sequence");
        assert_eq!(openai_to_claude(Some("tool_calls")), "tool_use");
        assert_eq!(openai_to_claude(Some("weird")), "end_turn");
        assert_eq!(openai_to_claude(None), "end_turn");
    }

    #[test]
    fn test_gemini_to_claude_is_case_insensitive() {
        assert_eq!(gemini_to_claude(Some("STOP")), "end_turn");
        assert_eq!(gemini_to_claude(Some("stop")), "end_turn");
        assert_eq!(gemini_to_claude(Some("MAX_TOKENS")), "max_tokens");
        assert_eq!(gemini_to_claude(Some("length")), "max_tokens");
        assert_eq!(gemini_to_claude(Some("SAFETY")), "stop_sequence");
        assert_eq!(gemini_to_claude(Some("recitation")), "stop_sequence");
        assert_eq!(gemini_to_claude(Some("OTHER")), "end_turn");
        assert_eq!(gemini_to_claude(Some("")), "end_turn");
    }

    #[test]
    fn test_gemini_and_claude_to_openai() {
        assert_eq!(gemini_to_openai(Some("MAX_TOKENS")), "length");
        assert_eq!(gemini_to_openai(Some("SAFETY")), "content_filter");
        assert_eq!(gemini_to_openai(Some("FINISH_REASON_UNSPECIFIED")), "stop");
        assert_eq!(claude_to_openai(Some("end_turn")), "stop");
        assert_eq!(claude_to_openai(Some("tool_use")), "tool_calls");
        assert_eq!(claude_to_openai(Some("max_tokens")), "length");
        assert_eq!(claude_to_openai(Some("pause_turn")), "stop");
    }
}
