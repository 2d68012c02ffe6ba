//! Shared constants used across the application

/// Hard ceiling on generated answer length, in backend tokens.
pub const MAX_OUTPUT_TOKENS: u32 = 4096;

pub const TOP_P: f32 = 1.0;

/// Text of the message that stands in for an answer until the first edit.
pub const PLACEHOLDER_TEXT: &str = "generating…";
