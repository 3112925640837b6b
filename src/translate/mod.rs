//! Translation between the OpenAI, Claude and Gemini dialects.
//!
//! Everything under this module is pure: converters take decoded payloads
//! and a per-exchange [`ConversionContext`] and never perform I/O.
//! [`registry::convert`] is the single entry point for untyped payloads.

pub mod anthropic_types;
pub mod content;
pub mod context;
pub mod finish_reason;
pub mod gemini_types;
pub mod lenient;
pub mod models;
pub mod openai_types;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tools;

pub use context::ConversionContext;
pub use protocol::{ConversionKind, Protocol};
pub use registry::{convert, convert_named};
