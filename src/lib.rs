//! Conversation core for a hosted coding-assistant client.
//!
//! Consumes the backend's Server-Sent-Events turn stream and reassembles it,
//! incrementally and in order, into a consistent in-memory conversation:
//! text deltas, tool-call lifecycles, reasoning blocks, cost accounting,
//! todo/diff snapshots, and turn termination. The UI layer is an external
//! collaborator: it holds the shared [`Conversation`] handle from
//! [`SessionController::conversation`] and re-reads it on each notification.
//!
//! Layering, leaf first: `agent_api` decodes frames and classifies events;
//! [`Conversation::apply`] is the single pure fold from events to state;
//! [`SessionController`] drives one turn at a time, queueing inputs
//! submitted while a stream is active.

pub mod controller;
pub mod conversation;
pub mod message;
pub mod status;
pub mod transport;
pub mod turn;
pub mod usage;

pub use controller::{Notifier, SendOutcome, SessionController, TurnTransport};
pub use conversation::{Conversation, FileChange};
pub use message::{ConnectionState, ConversationMessage, ErrorInfo, Role, ToolInvocation};
pub use transport::HttpTurnTransport;
pub use turn::{QueuedInput, StreamTurn, TurnId};
pub use usage::TurnUsage;

pub use agent_api::{
    AgentApiConfig, AgentApiError, AgentEvent, ErrorCategory, FileDiff, MessagePart, TodoItem,
    ToolState, TurnMode,
};
