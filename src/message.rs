use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_api::{ErrorCategory, ToolSnapshot, ToolState};

use crate::usage::TurnUsage;

/// Author of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Classification attached to a failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub message: String,
}

/// One tool call's merged lifecycle within a message.
///
/// Stream updates for the same `call_id` are merged into a single record:
/// state and name overwrite, payloads and timestamps only when the update
/// carries them. Two updates with one `call_id` never become two entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl ToolInvocation {
    pub fn from_snapshot(snapshot: &ToolSnapshot) -> Self {
        Self {
            call_id: snapshot.call_id.clone(),
            tool_name: snapshot.tool_name.clone(),
            state: snapshot.state,
            input: snapshot.input.clone(),
            output: snapshot.output.clone(),
            started_at: snapshot.started_at,
            ended_at: snapshot.ended_at,
        }
    }

    pub fn merge_snapshot(&mut self, snapshot: &ToolSnapshot) {
        self.state = snapshot.state;
        if !snapshot.tool_name.is_empty() {
            self.tool_name = snapshot.tool_name.clone();
        }
        if snapshot.input.is_some() {
            self.input = snapshot.input.clone();
        }
        if snapshot.output.is_some() {
            self.output = snapshot.output.clone();
        }
        if snapshot.started_at.is_some() {
            self.started_at = snapshot.started_at;
        }
        if snapshot.ended_at.is_some() {
            self.ended_at = snapshot.ended_at;
        }
    }

    /// Wall-clock duration, available once both endpoints are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some(ended.saturating_sub(started)),
            _ => None,
        }
    }
}

/// One chat turn as exposed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Ordered by first-seen; `call_id` unique within the message.
    pub tool_invocations: Vec<ToolInvocation>,
    pub reasoning_blocks: Vec<String>,
    pub error_info: Option<ErrorInfo>,
    pub usage: Option<TurnUsage>,
    /// Set once at creation, never mutated.
    pub created_at: u64,
    pub streaming: bool,
}

impl ConversationMessage {
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content.into(), false)
    }

    pub fn assistant_placeholder(id: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, String::new(), true)
    }

    pub fn system_error(id: impl Into<String>, error: ErrorInfo) -> Self {
        let mut message = Self::new(id, Role::System, error.message.clone(), false);
        message.error_info = Some(error);
        message
    }

    fn new(id: impl Into<String>, role: Role, content: String, streaming: bool) -> Self {
        Self {
            id: id.into(),
            role,
            content,
            tool_invocations: Vec::new(),
            reasoning_blocks: Vec::new(),
            error_info: None,
            usage: None,
            created_at: current_epoch_ms(),
            streaming,
        }
    }

    pub fn tool_invocation(&self, call_id: &str) -> Option<&ToolInvocation> {
        self.tool_invocations
            .iter()
            .find(|invocation| invocation.call_id == call_id)
    }

    /// Upsert one tool snapshot, preserving first-seen order.
    pub fn upsert_tool(&mut self, snapshot: &ToolSnapshot) {
        if let Some(existing) = self
            .tool_invocations
            .iter_mut()
            .find(|invocation| invocation.call_id == snapshot.call_id)
        {
            existing.merge_snapshot(snapshot);
            return;
        }

        self.tool_invocations
            .push(ToolInvocation::from_snapshot(snapshot));
    }
}

/// Out-of-band push connectivity. Observational: it gates delivery of push
/// events from other clients, never the correctness of the SSE turn logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

pub fn current_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
