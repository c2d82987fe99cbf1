use serde::{Deserialize, Serialize};

use agent_api::{
    classify_error, AgentEvent, ErrorCategory, FileChangeKind, FileDiff, MessagePart, TodoItem,
    ToolSnapshot, TurnMode,
};

use crate::message::{ConnectionState, ConversationMessage, ErrorInfo};
use crate::status::{activity_label, status_label};
use crate::turn::{QueuedInput, StreamTurn, TurnId};

/// One filesystem change reported by the backend watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: FileChangeKind,
    pub path: String,
}

/// In-memory conversation state for one session.
///
/// The reducer in [`Conversation::apply`] is the single fold point for
/// stream events: `(state, event) -> state'`, no I/O, no side channels.
/// Accumulating buffers (running text, reasoning, per-turn usage) live in
/// the state itself so the fold is testable in isolation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    turn: StreamTurn,
    todos: Vec<TodoItem>,
    diff: Vec<FileDiff>,
    activity: Option<String>,
    session_status: Option<String>,
    file_changes: Vec<FileChange>,
    last_pr_url: Option<String>,
    connection: ConnectionState,
    next_message_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered message list, oldest first.
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn turn(&self) -> &StreamTurn {
        &self.turn
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_active()
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    pub fn diff(&self) -> &[FileDiff] {
        &self.diff
    }

    pub fn file_changes(&self) -> &[FileChange] {
        &self.file_changes
    }

    pub fn last_pr_url(&self) -> Option<&str> {
        self.last_pr_url.as_deref()
    }

    /// Current human-readable activity, when anything live is happening.
    pub fn status_line(&self) -> Option<&str> {
        self.activity.as_deref().or(self.session_status.as_deref())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    /// Most recent failure surfaced in the conversation, if any.
    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.messages
            .iter()
            .rev()
            .find_map(|message| message.error_info.as_ref())
    }

    /// Start a turn: append the immutable user message and the assistant
    /// placeholder that receives deltas. Returns the placeholder id.
    pub fn begin_turn(&mut self, turn_id: TurnId, content: &str) -> String {
        let user_id = self.next_id();
        self.messages
            .push(ConversationMessage::user(user_id, content));

        let assistant_id = self.next_id();
        self.messages
            .push(ConversationMessage::assistant_placeholder(assistant_id.clone()));

        self.turn.activate(turn_id, assistant_id.clone());
        assistant_id
    }

    /// Queue an input submitted while a turn is active. Returns queue depth.
    pub fn queue_input(&mut self, content: &str, mode: TurnMode) -> usize {
        self.turn.push_queued(QueuedInput {
            content: content.to_string(),
            mode,
        })
    }

    pub fn dequeue_input(&mut self) -> Option<QueuedInput> {
        self.turn.pop_queued()
    }

    /// Fold one stream event into the conversation. Events carrying a stale
    /// `turn_id` are ignored wholesale.
    pub fn apply(&mut self, turn_id: TurnId, event: &AgentEvent) {
        if !self.turn.matches(turn_id) {
            return;
        }

        match event {
            AgentEvent::Status { label, code } => {
                self.activity = label
                    .clone()
                    .or_else(|| code.as_deref().map(|code| status_label(code).to_string()));
            }
            AgentEvent::MessagePart(part) => self.apply_part(part),
            AgentEvent::SessionStatus { status } => {
                self.session_status = status.clone();
            }
            AgentEvent::SessionIdle | AgentEvent::Done => self.finalize_turn(turn_id),
            AgentEvent::SessionDiff { files } => {
                self.diff = files.clone();
            }
            AgentEvent::SessionError { message } => {
                self.push_error_message(message, None, None);
            }
            AgentEvent::TodoUpdated { items } => {
                self.todos = items.clone();
            }
            AgentEvent::FileWatcher { kind, path } => {
                self.file_changes.push(FileChange {
                    kind: *kind,
                    path: path.clone(),
                });
            }
            AgentEvent::CommandExecuted { command, .. } => {
                self.activity = Some(format!("ran `{command}`"));
            }
            AgentEvent::Error {
                message,
                category,
                retryable,
            } => {
                self.push_error_message(message, *category, *retryable);
                if event.is_turn_terminal() {
                    self.finalize_turn(turn_id);
                }
            }
            AgentEvent::PrCreated { url } => {
                self.last_pr_url = Some(url.clone());
            }
            AgentEvent::Heartbeat | AgentEvent::Unknown { .. } => {}
        }
    }

    fn apply_part(&mut self, part: &MessagePart) {
        match part {
            MessagePart::Text { text, delta } => {
                let Some(message) = self.streaming_message_mut() else {
                    return;
                };
                // Deltas append; a full snapshot replaces. Never both, so a
                // snapshot after deltas cannot double-count.
                if let Some(delta) = delta {
                    message.content.push_str(delta);
                } else if let Some(text) = text {
                    message.content = text.clone();
                }
            }
            MessagePart::Tool(snapshot) => {
                self.activity = Some(tool_activity(snapshot));
                if let Some(message) = self.streaming_message_mut() {
                    message.upsert_tool(snapshot);
                }
            }
            MessagePart::Reasoning { text, delta } => {
                let Some(message) = self.streaming_message_mut() else {
                    return;
                };
                if message.reasoning_blocks.is_empty() {
                    message.reasoning_blocks.push(String::new());
                }
                let block = message
                    .reasoning_blocks
                    .last_mut()
                    .expect("reasoning block was just ensured");
                // Unlike text, reasoning snapshots carry the full text so
                // far: replace, don't append.
                if let Some(delta) = delta {
                    block.push_str(delta);
                } else if let Some(text) = text {
                    *block = text.clone();
                }
            }
            MessagePart::StepStart => {
                if let Some(message) = self.streaming_message_mut() {
                    if message
                        .reasoning_blocks
                        .last()
                        .is_some_and(|block| !block.is_empty())
                    {
                        message.reasoning_blocks.push(String::new());
                    }
                }
            }
            MessagePart::StepFinish(step) => {
                self.turn.add_usage(step);
            }
        }
    }

    /// Freeze the streaming message and attach accumulated usage. Idempotent
    /// and stale-safe: a non-matching `turn_id` is a no-op.
    pub fn finalize_turn(&mut self, turn_id: TurnId) {
        if !self.turn.matches(turn_id) {
            return;
        }

        let (message_id, usage) = self.turn.deactivate();
        let Some(message_id) = message_id else {
            return;
        };

        if let Some(message) = self.message_mut(&message_id) {
            message.streaming = false;
            if !usage.is_empty() {
                message.usage = Some(usage);
            }
        }
        self.session_status = None;
    }

    /// Abort the turn with a transport- or HTTP-level failure. An untouched
    /// assistant placeholder is removed so the error message replaces it
    /// rather than leaving an empty bubble dangling.
    pub fn fail_turn(&mut self, turn_id: TurnId, message: &str) {
        if !self.turn.matches(turn_id) {
            return;
        }

        let (message_id, _) = self.turn.deactivate();
        if let Some(message_id) = message_id {
            let untouched = self
                .message_mut(&message_id)
                .is_some_and(|placeholder| {
                    placeholder.content.is_empty()
                        && placeholder.tool_invocations.is_empty()
                        && placeholder.reasoning_blocks.is_empty()
                });

            if untouched && self.messages.last().is_some_and(|last| last.id == message_id) {
                self.messages.pop();
            } else if let Some(placeholder) = self.message_mut(&message_id) {
                placeholder.streaming = false;
            }
        }

        self.push_error_message(message, None, None);
        self.session_status = None;
    }

    /// Merge a message pushed out-of-band by another client: dedupe by id,
    /// append otherwise. Existing messages are never reordered.
    pub fn merge_remote_message(&mut self, message: ConversationMessage) -> bool {
        if self.messages.iter().any(|existing| existing.id == message.id) {
            return false;
        }

        self.messages.push(message);
        true
    }

    /// Clear transient live-activity display state. Invoked by the
    /// controller after a short dwell once the turn is over; cosmetic only.
    pub fn clear_live_activity(&mut self) {
        self.activity = None;
        self.session_status = None;
        self.file_changes.clear();
    }

    fn push_error_message(
        &mut self,
        message: &str,
        category: Option<ErrorCategory>,
        retryable: Option<bool>,
    ) {
        // Text classification always runs; wire-carried fields win when present.
        let classification = classify_error(message);
        let info = ErrorInfo {
            category: category.unwrap_or(classification.category),
            retryable: retryable.unwrap_or(classification.retryable),
            message: message.to_string(),
        };

        let id = self.next_id();
        self.messages
            .push(ConversationMessage::system_error(id, info));
    }

    fn streaming_message_mut(&mut self) -> Option<&mut ConversationMessage> {
        let id = self.turn.streaming_message_id()?.to_string();
        self.message_mut(&id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ConversationMessage> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    fn next_id(&mut self) -> String {
        self.next_message_id += 1;
        format!("m{}", self.next_message_id)
    }
}

fn tool_activity(snapshot: &ToolSnapshot) -> String {
    format!("{} ({})", activity_label(&snapshot.tool_name), snapshot.tool_name)
}
