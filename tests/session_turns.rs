//! End-to-end turn orchestration over a scripted transport: queueing,
//! draining, stopping, failure classification, and retry resubmission.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use agent_api::{
    AgentApiError, AgentEvent, CancellationSignal, MessagePart, TerminalKind, ToolSnapshot,
    ToolState, TurnMode, TurnOutcome, TurnRequest,
};
use agent_chat::{Role, SendOutcome, SessionController, TurnTransport};

enum ScriptOutcome {
    Terminal(TerminalKind),
    /// Transport closed without an explicit terminal event.
    Exhausted,
    Fail(String),
}

struct Script {
    /// Wait for one release signal before finishing the turn.
    hold: bool,
    events: Vec<AgentEvent>,
    outcome: ScriptOutcome,
}

impl Script {
    fn completed(events: Vec<AgentEvent>) -> Self {
        Self {
            hold: false,
            events,
            outcome: ScriptOutcome::Terminal(TerminalKind::Done),
        }
    }

    fn held(events: Vec<AgentEvent>) -> Self {
        Self {
            hold: true,
            ..Self::completed(events)
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            hold: false,
            events: Vec::new(),
            outcome: ScriptOutcome::Fail(message.to_string()),
        }
    }
}

struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    release: Mutex<mpsc::Receiver<()>>,
    observed_contents: Mutex<Vec<String>>,
    stops: AtomicUsize,
    retries: AtomicUsize,
}

impl FakeTransport {
    fn new(scripts: Vec<Script>) -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            release: Mutex::new(rx),
            observed_contents: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            retries: AtomicUsize::new(0),
        });
        (transport, tx)
    }

    fn observed_contents(&self) -> Vec<String> {
        self.observed_contents
            .lock()
            .expect("observed contents lock")
            .clone()
    }
}

impl TurnTransport for FakeTransport {
    fn run_turn(
        &self,
        request: &TurnRequest,
        _cancel: &CancellationSignal,
        on_event: &mut dyn FnMut(AgentEvent),
    ) -> Result<TurnOutcome, AgentApiError> {
        self.observed_contents
            .lock()
            .expect("observed contents lock")
            .push(request.content.clone());

        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .pop_front()
            .expect("a script for every opened turn");

        for event in script.events {
            on_event(event);
        }

        if script.hold {
            self.release
                .lock()
                .expect("release lock")
                .recv_timeout(Duration::from_secs(5))
                .expect("test must release held turns");
        }

        match script.outcome {
            ScriptOutcome::Terminal(kind) => Ok(TurnOutcome {
                terminal: Some(kind),
            }),
            ScriptOutcome::Exhausted => Ok(TurnOutcome { terminal: None }),
            ScriptOutcome::Fail(message) => Err(AgentApiError::Unknown(message)),
        }
    }

    fn request_stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn request_retry(&self) -> Result<(), AgentApiError> {
        self.retries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn text(full: &str) -> AgentEvent {
    AgentEvent::MessagePart(MessagePart::Text {
        text: Some(full.to_string()),
        delta: None,
    })
}

fn delta(fragment: &str) -> AgentEvent {
    AgentEvent::MessagePart(MessagePart::Text {
        text: None,
        delta: Some(fragment.to_string()),
    })
}

fn tool(call_id: &str, state: ToolState, output: Option<&str>) -> AgentEvent {
    AgentEvent::MessagePart(MessagePart::Tool(ToolSnapshot {
        call_id: call_id.to_string(),
        tool_name: "bash".to_string(),
        state,
        input: None,
        output: output.map(|value| serde_json::json!(value)),
        started_at: None,
        ended_at: None,
    }))
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn streamed_text_lands_in_the_assistant_message() {
    let (transport, _release) =
        FakeTransport::new(vec![Script::completed(vec![text("Hello"), AgentEvent::Done])]);
    let controller = SessionController::new(transport);

    controller
        .send("hi", TurnMode::Build)
        .expect("send dispatches");
    controller.wait_idle();

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    assert!(!conversation.is_streaming());

    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(conversation.messages()[1].content, "Hello");
    assert!(!conversation.messages()[1].streaming);
}

#[test]
fn repeated_tool_updates_resolve_to_one_completed_invocation() {
    let (transport, _release) = FakeTransport::new(vec![Script::completed(vec![
        tool("t1", ToolState::Running, None),
        tool("t1", ToolState::Completed, Some("42")),
        AgentEvent::Done,
    ])]);
    let controller = SessionController::new(transport);

    controller
        .send("run it", TurnMode::Build)
        .expect("send dispatches");
    controller.wait_idle();

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    let assistant = conversation
        .messages()
        .iter()
        .find(|message| message.role == Role::Assistant)
        .expect("assistant message exists");

    assert_eq!(assistant.tool_invocations.len(), 1);
    let invocation = &assistant.tool_invocations[0];
    assert_eq!(invocation.call_id, "t1");
    assert_eq!(invocation.state, ToolState::Completed);
    assert_eq!(invocation.output, Some(serde_json::json!("42")));
}

#[test]
fn second_send_while_streaming_queues_instead_of_opening_a_request() {
    let (transport, release) = FakeTransport::new(vec![
        Script::held(vec![delta("working")]),
        Script::completed(vec![text("done"), AgentEvent::Done]),
    ]);
    let controller = SessionController::new(Arc::clone(&transport) as Arc<dyn TurnTransport>);

    let first = controller
        .send("hi", TurnMode::Build)
        .expect("first send dispatches");
    assert!(matches!(first, SendOutcome::Dispatched(_)));

    let second = controller
        .send("hi", TurnMode::Build)
        .expect("second send queues");
    assert_eq!(second, SendOutcome::Queued(1));
    assert_eq!(transport.observed_contents().len(), 1);

    release.send(()).expect("release first turn");
    controller.wait_idle();

    // The queued input was dispatched exactly once, after the first terminal.
    assert_eq!(transport.observed_contents(), vec!["hi", "hi"]);
    assert_eq!(controller.queue_len(), 0);
}

#[test]
fn queued_inputs_drain_fifo_without_loss() {
    let (transport, release) = FakeTransport::new(vec![
        // The held turn emits no terminal event; finalization comes from the
        // outcome after release, so B and C must queue in the meantime.
        Script::held(vec![text("answer A")]),
        Script::completed(vec![text("answer B"), AgentEvent::Done]),
        Script::completed(vec![text("answer C"), AgentEvent::Done]),
    ]);
    let controller = SessionController::new(Arc::clone(&transport) as Arc<dyn TurnTransport>);

    controller.send("A", TurnMode::Build).expect("dispatch A");
    assert_eq!(
        controller.send("B", TurnMode::Build).expect("queue B"),
        SendOutcome::Queued(1)
    );
    assert_eq!(
        controller.send("C", TurnMode::Plan).expect("queue C"),
        SendOutcome::Queued(2)
    );

    release.send(()).expect("release A");
    controller.wait_idle();

    assert_eq!(transport.observed_contents(), vec!["A", "B", "C"]);

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    let user_contents: Vec<&str> = conversation
        .messages()
        .iter()
        .filter(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(user_contents, vec!["A", "B", "C"]);
    assert_eq!(conversation.turn().queue_len(), 0);
}

#[test]
fn stop_resets_local_state_without_waiting_for_the_backend() {
    let (transport, release) = FakeTransport::new(vec![Script::held(vec![delta("partial")])]);
    let controller = SessionController::new(Arc::clone(&transport) as Arc<dyn TurnTransport>);

    controller.send("hi", TurnMode::Build).expect("dispatch");
    assert!(controller.is_streaming());

    controller.stop();
    // Idle immediately; the transport is still blocked inside the turn.
    assert!(!controller.is_streaming());

    release.send(()).expect("release held turn");
    controller.wait_idle();

    assert!(wait_until(Duration::from_secs(2), || {
        transport.stops.load(Ordering::SeqCst) == 1
    }));

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    // The late terminal from the stopped turn must not have re-frozen or
    // duplicated anything.
    assert_eq!(conversation.messages().len(), 2);
    assert!(!conversation.is_streaming());
}

#[test]
fn transport_failure_becomes_a_classified_inline_system_message() {
    let (transport, _release) =
        FakeTransport::new(vec![Script::failing("insufficient credit balance")]);
    let controller = SessionController::new(transport);

    controller.send("hi", TurnMode::Build).expect("dispatch");
    controller.wait_idle();

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    assert!(!conversation.is_streaming());

    // The untouched placeholder was replaced by the error message.
    let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::System]);

    let error = conversation.last_error().expect("error info recorded");
    assert_eq!(error.category, agent_chat::ErrorCategory::UserAction);
    assert!(!error.retryable);
}

#[test]
fn retry_resubmits_the_failed_input_when_retryable() {
    let (transport, _release) = FakeTransport::new(vec![
        Script::failing("rate limit exceeded"),
        Script::completed(vec![text("recovered"), AgentEvent::Done]),
    ]);
    let controller = SessionController::new(Arc::clone(&transport) as Arc<dyn TurnTransport>);

    controller.send("try this", TurnMode::Build).expect("dispatch");
    controller.wait_idle();

    let outcome = controller.retry().expect("retry dispatches");
    assert!(matches!(outcome, Some(SendOutcome::Dispatched(_))));
    controller.wait_idle();

    assert_eq!(transport.observed_contents(), vec!["try this", "try this"]);
    assert!(wait_until(Duration::from_secs(2), || {
        transport.retries.load(Ordering::SeqCst) == 1
    }));

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    assert!(conversation
        .messages()
        .iter()
        .any(|message| message.content == "recovered"));
}

#[test]
fn retry_refuses_when_the_failure_was_not_retryable() {
    let (transport, _release) =
        FakeTransport::new(vec![Script::failing("insufficient credit balance")]);
    let controller = SessionController::new(Arc::clone(&transport) as Arc<dyn TurnTransport>);

    controller.send("hi", TurnMode::Build).expect("dispatch");
    controller.wait_idle();

    let outcome = controller.retry().expect("retry call succeeds");
    assert_eq!(outcome, None);
    assert_eq!(transport.observed_contents(), vec!["hi"]);
}

#[test]
fn stream_exhaustion_without_terminal_finalizes_like_done() {
    let (transport, _release) = FakeTransport::new(vec![Script {
        hold: false,
        events: vec![delta("partial answer")],
        outcome: ScriptOutcome::Exhausted,
    }]);
    let controller = SessionController::new(transport);

    controller.send("hi", TurnMode::Build).expect("dispatch");
    controller.wait_idle();

    let conversation = controller.conversation();
    let conversation = conversation.lock().expect("conversation lock");
    assert!(!conversation.is_streaming());
    let assistant = conversation
        .messages()
        .iter()
        .find(|message| message.role == Role::Assistant)
        .expect("assistant message exists");
    assert_eq!(assistant.content, "partial answer");
    assert!(!assistant.streaming);
}
