use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use agent_api::TurnMode;

use crate::usage::TurnUsage;

/// Identifier for one request/response turn.
pub type TurnId = u64;

/// One input submitted while a turn was active, waiting its turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedInput {
    pub content: String,
    pub mode: TurnMode,
}

/// Ephemeral state of the in-flight request/response cycle.
///
/// Only one turn is ever active per session; inputs submitted while busy
/// queue FIFO and drain one at a time after the prior turn's terminal event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamTurn {
    turn_id: TurnId,
    streaming_message_id: Option<String>,
    queued_inputs: VecDeque<QueuedInput>,
    usage: TurnUsage,
    active: bool,
}

impl StreamTurn {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    pub fn streaming_message_id(&self) -> Option<&str> {
        self.streaming_message_id.as_deref()
    }

    pub fn queue_len(&self) -> usize {
        self.queued_inputs.len()
    }

    pub fn usage(&self) -> &TurnUsage {
        &self.usage
    }

    /// True when `turn_id` names the currently active turn. Stale events
    /// from superseded or stopped turns must not touch state.
    pub fn matches(&self, turn_id: TurnId) -> bool {
        self.active && self.turn_id == turn_id
    }

    pub(crate) fn activate(&mut self, turn_id: TurnId, streaming_message_id: String) {
        self.turn_id = turn_id;
        self.streaming_message_id = Some(streaming_message_id);
        self.usage = TurnUsage::default();
        self.active = true;
    }

    /// Deactivate and hand back the streaming message id and accumulated
    /// usage for finalization. Queued inputs survive deactivation.
    pub(crate) fn deactivate(&mut self) -> (Option<String>, TurnUsage) {
        self.active = false;
        (
            self.streaming_message_id.take(),
            std::mem::take(&mut self.usage),
        )
    }

    pub(crate) fn add_usage(&mut self, step: &agent_api::StepUsage) {
        self.usage.add_step(step);
    }

    pub(crate) fn push_queued(&mut self, input: QueuedInput) -> usize {
        self.queued_inputs.push_back(input);
        self.queued_inputs.len()
    }

    pub(crate) fn pop_queued(&mut self) -> Option<QueuedInput> {
        self.queued_inputs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_inputs_survive_turn_deactivation() {
        let mut turn = StreamTurn::default();
        turn.activate(1, "m2".to_string());
        turn.push_queued(QueuedInput {
            content: "next".to_string(),
            mode: TurnMode::Build,
        });

        let (message_id, _) = turn.deactivate();

        assert_eq!(message_id.as_deref(), Some("m2"));
        assert!(!turn.is_active());
        assert_eq!(turn.queue_len(), 1);
        assert_eq!(turn.pop_queued().map(|input| input.content).as_deref(), Some("next"));
    }

    #[test]
    fn matches_rejects_stale_and_inactive_turns() {
        let mut turn = StreamTurn::default();
        assert!(!turn.matches(0));

        turn.activate(3, "m1".to_string());
        assert!(turn.matches(3));
        assert!(!turn.matches(2));

        turn.deactivate();
        assert!(!turn.matches(3));
    }
}
