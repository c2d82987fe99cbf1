use serde::{Deserialize, Serialize};

/// Agent operating mode requested for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    /// Full build mode: the agent edits files and runs commands.
    #[default]
    Build,
    /// Plan-only mode: the agent proposes changes without applying them.
    Plan,
}

impl TurnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Plan => "plan",
        }
    }
}

/// Request body for the streaming chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub content: String,
    pub mode: TurnMode,
}

impl TurnRequest {
    pub fn new(content: impl Into<String>, mode: TurnMode) -> Self {
        Self {
            content: content.into(),
            mode,
        }
    }
}
