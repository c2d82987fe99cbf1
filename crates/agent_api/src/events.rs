use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCategory;
use crate::sse::SseFrame;

/// Lifecycle state of one tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolState {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" | "error" => Self::Failed,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One tool call's state as reported by a single stream update.
///
/// Updates for the same `call_id` arrive repeatedly as the call progresses;
/// absent fields mean "unchanged", so consumers merge rather than replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSnapshot {
    pub call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

/// Cost and token breakdown reported by one `step-finish` part.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepUsage {
    pub cost: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub tokens_reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

/// One part of the assistant message under construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePart {
    /// Either an incremental `delta` to append or a full-text snapshot.
    Text {
        text: Option<String>,
        delta: Option<String>,
    },
    Tool(ToolSnapshot),
    /// Reasoning text; full snapshots replace, deltas append.
    Reasoning {
        text: Option<String>,
        delta: Option<String>,
    },
    StepStart,
    StepFinish(StepUsage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Create,
    Modify,
    Delete,
}

impl FileChangeKind {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "create" | "created" | "add" => Self::Create,
            "modify" | "modified" | "change" => Self::Modify,
            "delete" | "deleted" | "remove" => Self::Delete,
            _ => return None,
        })
    }
}

/// One entry of the session task list, replaced wholesale on each update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: Option<String>,
    pub content: String,
    pub status: Option<String>,
}

/// One file entry of the session diff, replaced wholesale on each update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub patch: Option<String>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

/// Normalized agent-activity event emitted by the discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Free-text progress label plus a machine status code.
    Status {
        label: Option<String>,
        code: Option<String>,
    },
    MessagePart(MessagePart),
    SessionStatus {
        status: Option<String>,
    },
    SessionIdle,
    SessionDiff {
        files: Vec<FileDiff>,
    },
    SessionError {
        message: String,
    },
    TodoUpdated {
        items: Vec<TodoItem>,
    },
    FileWatcher {
        kind: FileChangeKind,
        path: String,
    },
    CommandExecuted {
        command: String,
        exit_code: Option<i64>,
    },
    /// Protocol keep-alive; carries no state. Callers running an idle timer
    /// reset it on each heartbeat.
    Heartbeat,
    Done,
    Error {
        message: String,
        category: Option<ErrorCategory>,
        retryable: Option<bool>,
    },
    /// Side-channel notification detected via a `prUrl` field on any payload.
    PrCreated {
        url: String,
    },
    /// Unknown event type retained so future protocol additions never crash
    /// dispatch; consumers treat it as informational.
    Unknown {
        event_type: String,
        payload: Value,
    },
}

impl AgentEvent {
    /// True when this event ends the current turn.
    pub fn is_turn_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::SessionIdle
                | Self::Error {
                    category: Some(ErrorCategory::Fatal),
                    ..
                }
        )
    }
}

/// Classify one decoded frame into a normalized event.
///
/// Returns `None` when the payload is not valid JSON (the frame is dropped;
/// one bad frame must not lose the rest of the stream). A `type` field inside
/// the payload wins over the frame's `event:` line.
pub fn classify(frame: &SseFrame) -> Option<AgentEvent> {
    if frame.data == "[DONE]" {
        return Some(AgentEvent::Done);
    }

    let payload: Value = serde_json::from_str(&frame.data).ok()?;

    if let Some(url) = payload.get("prUrl").and_then(Value::as_str) {
        return Some(AgentEvent::PrCreated {
            url: url.to_string(),
        });
    }

    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| frame.event.clone())
        .unwrap_or_default();

    Some(map_event(&event_type, &payload))
}

fn map_event(event_type: &str, payload: &Value) -> AgentEvent {
    let props = payload.get("properties").unwrap_or(payload);

    match event_type {
        "status" => AgentEvent::Status {
            label: string_field(props, &["message", "label"]),
            code: string_field(props, &["status", "code"]),
        },
        "message.part.updated" => map_message_part(props),
        // Legacy endpoints ship the part flat, its own type at the top level.
        "text" | "reasoning" | "tool" | "step-start" | "step-finish" => map_message_part(props),
        "session.status" => AgentEvent::SessionStatus {
            status: string_field(props, &["status", "message"]),
        },
        "session.idle" => AgentEvent::SessionIdle,
        "session.diff" => AgentEvent::SessionDiff {
            files: map_diff_files(props),
        },
        "session.error" => AgentEvent::SessionError {
            message: error_message(props),
        },
        "todo.updated" => AgentEvent::TodoUpdated {
            items: map_todo_items(props),
        },
        "file-watcher.updated" => map_file_watcher(props, payload),
        "command.executed" => AgentEvent::CommandExecuted {
            command: string_field(props, &["command"]).unwrap_or_default(),
            exit_code: props.get("exitCode").and_then(Value::as_i64),
        },
        "heartbeat" => AgentEvent::Heartbeat,
        "done" => AgentEvent::Done,
        "error" => AgentEvent::Error {
            message: error_message(props),
            category: string_field(props, &["category"])
                .as_deref()
                .and_then(ErrorCategory::parse),
            retryable: props.get("retryable").and_then(Value::as_bool),
        },
        _ => AgentEvent::Unknown {
            event_type: event_type.to_string(),
            payload: payload.clone(),
        },
    }
}

fn map_message_part(props: &Value) -> AgentEvent {
    let part = props.get("part").unwrap_or(props);
    let part_type = part.get("type").and_then(Value::as_str).unwrap_or_default();

    let mapped = match part_type {
        "text" => MessagePart::Text {
            text: string_field(part, &["text"]),
            delta: string_field(part, &["delta"]),
        },
        "reasoning" => MessagePart::Reasoning {
            text: string_field(part, &["text"]),
            delta: string_field(part, &["delta"]),
        },
        "tool" => match map_tool_snapshot(part) {
            Some(snapshot) => MessagePart::Tool(snapshot),
            None => {
                return AgentEvent::Unknown {
                    event_type: "message.part.updated".to_string(),
                    payload: part.clone(),
                }
            }
        },
        "step-start" => MessagePart::StepStart,
        "step-finish" => MessagePart::StepFinish(map_step_usage(part)),
        _ => {
            return AgentEvent::Unknown {
                event_type: "message.part.updated".to_string(),
                payload: part.clone(),
            }
        }
    };

    AgentEvent::MessagePart(mapped)
}

fn map_tool_snapshot(part: &Value) -> Option<ToolSnapshot> {
    let call_id = string_field(part, &["callID", "callId", "call_id", "id"])?;
    let state = part
        .get("state")
        .map(|state| {
            if let Some(value) = state.as_str() {
                value.to_string()
            } else {
                // Some payloads nest a state object: {"status": "running", ...}.
                string_field(state, &["status"]).unwrap_or_default()
            }
        })
        .as_deref()
        .and_then(ToolState::parse)
        .unwrap_or(ToolState::Pending);

    // Nested state objects carry input/output/timing alongside the status.
    let detail = part
        .get("state")
        .filter(|state| state.is_object())
        .unwrap_or(part);

    Some(ToolSnapshot {
        call_id,
        tool_name: string_field(part, &["tool", "toolName", "name"]).unwrap_or_default(),
        state,
        input: detail.get("input").cloned().filter(|value| !value.is_null()),
        output: detail
            .get("output")
            .cloned()
            .filter(|value| !value.is_null()),
        started_at: millis_field(detail, &["startedAt", "started_at"])
            .or_else(|| nested_time(detail, "start")),
        ended_at: millis_field(detail, &["endedAt", "ended_at"])
            .or_else(|| nested_time(detail, "end")),
    })
}

fn map_step_usage(part: &Value) -> StepUsage {
    let tokens = part.get("tokens").unwrap_or(&Value::Null);
    let cache = tokens.get("cache").unwrap_or(&Value::Null);

    StepUsage {
        cost: part.get("cost").and_then(Value::as_f64).unwrap_or(0.0),
        tokens_in: tokens.get("input").and_then(Value::as_u64).unwrap_or(0),
        tokens_out: tokens.get("output").and_then(Value::as_u64).unwrap_or(0),
        tokens_reasoning: tokens.get("reasoning").and_then(Value::as_u64).unwrap_or(0),
        cache_read: cache.get("read").and_then(Value::as_u64).unwrap_or(0),
        cache_write: cache.get("write").and_then(Value::as_u64).unwrap_or(0),
    }
}

fn map_diff_files(props: &Value) -> Vec<FileDiff> {
    let entries = props
        .get("diff")
        .or_else(|| props.get("files"))
        .and_then(Value::as_array);

    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            Some(FileDiff {
                path: string_field(entry, &["path", "file"])?,
                patch: string_field(entry, &["patch", "diff"]),
                additions: entry.get("additions").and_then(Value::as_u64),
                deletions: entry.get("deletions").and_then(Value::as_u64),
            })
        })
        .collect()
}

fn map_todo_items(props: &Value) -> Vec<TodoItem> {
    let entries = props
        .get("todos")
        .or_else(|| props.get("items"))
        .and_then(Value::as_array);

    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            Some(TodoItem {
                id: string_field(entry, &["id"]),
                content: string_field(entry, &["content", "text"])?,
                status: string_field(entry, &["status"]),
            })
        })
        .collect()
}

fn map_file_watcher(props: &Value, payload: &Value) -> AgentEvent {
    let kind = string_field(props, &["event", "action", "kind"])
        .as_deref()
        .and_then(FileChangeKind::parse);
    let path = string_field(props, &["path", "file"]);

    match (kind, path) {
        (Some(kind), Some(path)) => AgentEvent::FileWatcher { kind, path },
        _ => AgentEvent::Unknown {
            event_type: "file-watcher.updated".to_string(),
            payload: payload.clone(),
        },
    }
}

fn error_message(props: &Value) -> String {
    string_field(props, &["message"])
        .or_else(|| {
            props.get("error").and_then(|error| {
                error
                    .as_str()
                    .map(ToString::to_string)
                    .or_else(|| string_field(error, &["message"]))
            })
        })
        .unwrap_or_else(|| "unknown agent error".to_string())
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    })
}

fn millis_field(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(key).and_then(Value::as_u64))
}

fn nested_time(value: &Value, key: &str) -> Option<u64> {
    value.get("time").and_then(|time| time.get(key)).and_then(Value::as_u64)
}
