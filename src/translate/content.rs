//! Multimodal content mapping between the three dialects, plus extraction of
//! `<thinking>` sections from plain assistant text.
//!
//! Tool calls and tool results are not handled here; see [`super::tools`].

use std::sync::OnceLock;

use regex::Regex;

use super::anthropic_types::{ContentBlock, ImageSource};
use super::gemini_types::Part;
use super::openai_types::{ChatContent, ContentPart, InputAudio, UrlRef};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
const DEFAULT_AUDIO_MIME: &str = "audio/wav";

/// Splits `data:<mime>;base64,<payload>` into mime type and payload.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or_default();
    Some((mime.to_string(), data.to_string()))
}

pub fn data_url(mime_type: &str, data: &str) -> String {
    format!("data:{mime_type};base64,{data}")
}

pub fn image_placeholder(uri: &str) -> String {
    format!("[Image: {uri}]")
}

pub fn audio_placeholder(uri: &str) -> String {
    format!("[Audio file: {uri}]")
}

pub fn file_placeholder(uri: &str) -> String {
    format!("[File: {uri}]")
}

fn is_audio(mime_type: &str) -> bool {
    mime_type.starts_with("audio/")
}

fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

fn audio_format(mime_type: &str) -> String {
    mime_type
        .strip_prefix("audio/")
        .unwrap_or("wav")
        .to_string()
}

// ---------------------------------------------------------------------------
// From OpenAI parts
// ---------------------------------------------------------------------------

pub fn openai_part_to_gemini(part: &ContentPart) -> Option<Part> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(Part::text(text.clone())),
        ContentPart::ImageUrl { image_url } => Some(url_to_gemini(image_url, DEFAULT_IMAGE_MIME)),
        ContentPart::Audio { audio_url } => Some(url_to_gemini(audio_url, DEFAULT_AUDIO_MIME)),
        ContentPart::InputAudio { input_audio } => Some(Part::inline(
            format!("audio/{}", non_empty_format(input_audio)),
            input_audio.data.clone(),
        )),
    }
}

fn url_to_gemini(url: &UrlRef, fallback_mime: &str) -> Part {
    match parse_data_url(url.url()) {
        Some((mime, data)) => Part::inline(mime, data),
        None => Part::file(fallback_mime, url.url()),
    }
}

fn non_empty_format(audio: &InputAudio) -> &str {
    if audio.format.is_empty() {
        "wav"
    } else {
        &audio.format
    }
}

pub fn openai_part_to_claude(part: &ContentPart) -> Option<ContentBlock> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(ContentBlock::text(text.clone())),
        ContentPart::ImageUrl { image_url } => Some(match parse_data_url(image_url.url()) {
            Some((media_type, data)) => ContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            },
            None => ContentBlock::text(image_placeholder(image_url.url())),
        }),
        ContentPart::Audio { audio_url } => {
            let label = match parse_data_url(audio_url.url()) {
                Some((mime, _)) => format!("inline {mime}"),
                None => audio_url.url().to_string(),
            };
            Some(ContentBlock::text(audio_placeholder(&label)))
        }
        ContentPart::InputAudio { input_audio } => Some(ContentBlock::text(audio_placeholder(
            &format!("inline audio/{}", non_empty_format(input_audio)),
        ))),
    }
}

// ---------------------------------------------------------------------------
// From Claude blocks
// ---------------------------------------------------------------------------

/// Non-tool Claude block to an OpenAI part. Thinking blocks are dropped.
pub fn claude_block_to_openai(block: &ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
        ContentBlock::Image { source } => Some(ContentPart::ImageUrl {
            image_url: UrlRef::from(match source {
                ImageSource::Base64 { media_type, data } => data_url(media_type, data),
                ImageSource::Url { url } => url.clone(),
            }),
        }),
        _ => None,
    }
}

/// Non-tool Claude block to a Gemini part. Thinking blocks are dropped.
pub fn claude_block_to_gemini(block: &ContentBlock) -> Option<Part> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(Part::text(text.clone())),
        ContentBlock::Image { source } => Some(match source {
            ImageSource::Base64 { media_type, data } => Part::inline(media_type.clone(), data.clone()),
            ImageSource::Url { url } => Part::file(DEFAULT_IMAGE_MIME, url.clone()),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// From Gemini parts
// ---------------------------------------------------------------------------

/// Non-function Gemini part to an OpenAI part. Thought parts are dropped.
pub fn gemini_part_to_openai(part: &Part) -> Option<ContentPart> {
    if part.is_thought() {
        return None;
    }
    if let Some(text) = &part.text {
        return (!text.is_empty()).then(|| ContentPart::Text { text: text.clone() });
    }
    if let Some(blob) = &part.inline_data {
        if is_audio(&blob.mime_type) {
            return Some(ContentPart::InputAudio {
                input_audio: InputAudio {
                    data: blob.data.clone(),
                    format: audio_format(&blob.mime_type),
                },
            });
        }
        return Some(ContentPart::ImageUrl {
            image_url: UrlRef::from(data_url(&blob.mime_type, &blob.data)),
        });
    }
    if let Some(file) = &part.file_data {
        return Some(if is_image(&file.mime_type) {
            ContentPart::ImageUrl {
                image_url: UrlRef::from(file.file_uri.clone()),
            }
        } else if is_audio(&file.mime_type) {
            ContentPart::Text {
                text: audio_placeholder(&file.file_uri),
            }
        } else {
            ContentPart::Text {
                text: file_placeholder(&file.file_uri),
            }
        });
    }
    None
}

/// Non-function Gemini part to a Claude block. Thought text becomes a
/// thinking block.
pub fn gemini_part_to_claude(part: &Part) -> Option<ContentBlock> {
    if let Some(text) = &part.text {
        if text.is_empty() {
            return None;
        }
        return Some(if part.is_thought() {
            ContentBlock::Thinking {
                thinking: text.clone(),
                signature: None,
            }
        } else {
            ContentBlock::text(text.clone())
        });
    }
    if let Some(blob) = &part.inline_data {
        return Some(if is_image(&blob.mime_type) {
            ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type: blob.mime_type.clone(),
                    data: blob.data.clone(),
                },
            }
        } else if is_audio(&blob.mime_type) {
            ContentBlock::text(audio_placeholder(&format!("inline {}", blob.mime_type)))
        } else {
            ContentBlock::text(file_placeholder(&format!("inline {}", blob.mime_type)))
        });
    }
    if let Some(file) = &part.file_data {
        let text = if is_image(&file.mime_type) {
            image_placeholder(&file.file_uri)
        } else if is_audio(&file.mime_type) {
            audio_placeholder(&file.file_uri)
        } else {
            file_placeholder(&file.file_uri)
        };
        return Some(ContentBlock::text(text));
    }
    None
}

// ---------------------------------------------------------------------------
// Shaping helpers
// ---------------------------------------------------------------------------

/// A single text part collapses to a plain string; anything else stays a
/// part list.
pub fn collapse_parts(mut parts: Vec<ContentPart>) -> ChatContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &mut parts[0] {
            return ChatContent::Text(std::mem::take(text));
        }
    }
    if parts.is_empty() {
        return ChatContent::Text(String::new());
    }
    ChatContent::Parts(parts)
}

/// Merges runs of adjacent text parts into one.
pub fn merge_adjacent_text(parts: Vec<ContentPart>, sep: &str) -> Vec<ContentPart> {
    let mut merged: Vec<ContentPart> = Vec::with_capacity(parts.len());
    for part in parts {
        if let ContentPart::Text { text } = &part {
            if let Some(ContentPart::Text { text: prev }) = merged.last_mut() {
                prev.push_str(sep);
                prev.push_str(text);
                continue;
            }
        }
        merged.push(part);
    }
    merged
}

fn thinking_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<thinking>\s*(.*?)\s*</thinking>").expect("must be valid regex")
    })
}

/// Splits assistant text around `<thinking>...</thinking>` sections into
/// text and thinking blocks. Text without tags comes back unchanged as a
/// single block; empty text yields no blocks.
pub fn extract_thinking(text: &str) -> Vec<ContentBlock> {
    if text.is_empty() {
        return Vec::new();
    }
    let pattern = thinking_pattern();
    if !pattern.is_match(text) {
        return vec![ContentBlock::text(text)];
    }

    let mut blocks = Vec::new();
    let mut cursor = 0;
    for captures in pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        push_trimmed_text(&mut blocks, &text[cursor..whole.start()]);
        let thinking = captures.get(1).map_or("", |m| m.as_str());
        if !thinking.is_empty() {
            blocks.push(ContentBlock::Thinking {
                thinking: thinking.to_string(),
                signature: None,
            });
        }
        cursor = whole.end();
    }
    push_trimmed_text(&mut blocks, &text[cursor..]);
    blocks
}

fn push_trimmed_text(blocks: &mut Vec<ContentBlock>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        blocks.push(ContentBlock::text(trimmed));
    }
}
