//! Streaming completion client
//!
//! Opens a server-sent event stream against the model backend and yields
//! reply text fragments as they arrive.

pub mod client;
pub mod prompt;
pub mod sse;
pub mod types;

pub use client::{CompletionBackend, CompletionRequest, FragmentStream, GeminiClient, UserMessage};
pub use prompt::{LAASYA_SYSTEM_PROMPT, build_contents, truncate_history};
pub use sse::{SseDecoder, SseLine};
pub use types::{Attachment, GenerationConfig};
