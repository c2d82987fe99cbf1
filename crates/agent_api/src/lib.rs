//! Transport-only client primitives for the hosted agent backend.
//!
//! This crate owns request building, SSE frame decoding, and event
//! normalization for the chat-turn endpoints only. It intentionally contains
//! no conversation state and no UI coupling; the `agent_chat` core folds the
//! events emitted here into its own state.
//!
//! Frame decoding is line-granular: an `event:` line sets the type for the
//! `data:` lines that follow it, and each `data:` line yields one frame.
//! Malformed payloads are dropped without aborting the stream.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::{AgentApiClient, CancellationSignal, TerminalKind, TurnOutcome};
pub use config::AgentApiConfig;
pub use error::{classify_error, AgentApiError, ErrorCategory, ErrorClassification};
pub use events::{
    classify, AgentEvent, FileChangeKind, FileDiff, MessagePart, StepUsage, TodoItem,
    ToolSnapshot, ToolState,
};
pub use payload::{TurnMode, TurnRequest};
pub use sse::{FrameDecoder, SseFrame};
pub use url::normalize_base_url;
