use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use agent_api::{
    AgentApiError, AgentEvent, CancellationSignal, TurnMode, TurnOutcome, TurnRequest,
};

use crate::conversation::Conversation;
use crate::turn::TurnId;

/// Callback invoked after every state fold so the UI layer re-reads the
/// shared conversation.
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

/// Cosmetic delay before live-activity labels are cleared after a turn ends.
pub const LIVE_ACTIVITY_DWELL: Duration = Duration::from_millis(400);

/// What `send` did with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A new turn was opened for this input.
    Dispatched(TurnId),
    /// A turn was already streaming; the input was queued at this depth.
    Queued(usize),
}

/// Transport seam for one streamed turn.
///
/// The HTTP implementation lives in [`crate::transport::HttpTurnTransport`];
/// tests substitute scripted fakes. `on_event` is invoked in arrival order
/// and must not be called after the function returns.
pub trait TurnTransport: Send + Sync + 'static {
    fn run_turn(
        &self,
        request: &TurnRequest,
        cancel: &CancellationSignal,
        on_event: &mut dyn FnMut(AgentEvent),
    ) -> Result<TurnOutcome, AgentApiError>;

    /// Best-effort backend stop call; local state never waits on it.
    fn request_stop(&self) {}

    /// Best-effort backend retry call.
    fn request_retry(&self) -> Result<(), AgentApiError> {
        Ok(())
    }
}

struct ActiveTurn {
    turn_id: TurnId,
    cancel: CancellationSignal,
}

/// Orchestrates user turns over a shared [`Conversation`].
///
/// State machine over {idle, streaming}: `send` while streaming queues the
/// input; the worker drains exactly one queued input per terminal event.
/// `stop` is locally authoritative and never waits for the backend.
pub struct SessionController {
    conversation: Arc<Mutex<Conversation>>,
    transport: Arc<dyn TurnTransport>,
    active_turn: Mutex<Option<ActiveTurn>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_failed: Mutex<Option<TurnRequest>>,
    next_turn_id: AtomicU64,
    notifier: Notifier,
}

impl SessionController {
    pub fn new(transport: Arc<dyn TurnTransport>) -> Arc<Self> {
        Self::with_notifier(transport, Arc::new(|| {}))
    }

    pub fn with_notifier(transport: Arc<dyn TurnTransport>, notifier: Notifier) -> Arc<Self> {
        Arc::new(Self {
            conversation: Arc::new(Mutex::new(Conversation::new())),
            transport,
            active_turn: Mutex::new(None),
            worker: Mutex::new(None),
            last_failed: Mutex::new(None),
            next_turn_id: AtomicU64::new(1),
            notifier,
        })
    }

    /// Shared conversation state; the UI layer holds a clone and re-reads it
    /// on every notification.
    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        Arc::clone(&self.conversation)
    }

    pub fn is_streaming(&self) -> bool {
        lock_unpoisoned(&self.conversation).is_streaming()
    }

    pub fn queue_len(&self) -> usize {
        lock_unpoisoned(&self.conversation).turn().queue_len()
    }

    /// Out-of-band push connectivity, as reported by the embedding layer.
    pub fn connection_state(&self) -> crate::message::ConnectionState {
        lock_unpoisoned(&self.conversation).connection_state()
    }

    pub fn set_connection_state(&self, state: crate::message::ConnectionState) {
        lock_unpoisoned(&self.conversation).set_connection_state(state);
        (self.notifier)();
    }

    /// Submit one user input. Exactly one turn is ever in flight: when a
    /// turn is streaming the input queues FIFO and is dispatched after the
    /// prior turn's terminal event.
    pub fn send(
        self: &Arc<Self>,
        content: &str,
        mode: TurnMode,
    ) -> Result<SendOutcome, AgentApiError> {
        let mut active = lock_unpoisoned(&self.active_turn);
        let mut conversation = lock_unpoisoned(&self.conversation);

        if conversation.is_streaming() {
            let depth = conversation.queue_input(content, mode);
            drop(conversation);
            drop(active);
            (self.notifier)();
            return Ok(SendOutcome::Queued(depth));
        }

        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
        conversation.begin_turn(turn_id, content);
        *active = Some(ActiveTurn {
            turn_id,
            cancel: Arc::clone(&cancel),
        });
        drop(conversation);
        drop(active);

        if let Err(error) = self.spawn_worker(turn_id, TurnRequest::new(content, mode), cancel) {
            let mut conversation = lock_unpoisoned(&self.conversation);
            conversation.fail_turn(turn_id, &error.to_string());
            drop(conversation);
            *lock_unpoisoned(&self.active_turn) = None;
            (self.notifier)();
            return Err(error);
        }

        (self.notifier)();
        Ok(SendOutcome::Dispatched(turn_id))
    }

    /// Cancel the active turn. Local state resets to idle immediately; the
    /// backend stop call is fire-and-forget and its outcome is ignored.
    pub fn stop(&self) {
        let taken = lock_unpoisoned(&self.active_turn).take();
        let Some(active) = taken else {
            return;
        };

        active.cancel.store(true, Ordering::Release);
        {
            let mut conversation = lock_unpoisoned(&self.conversation);
            conversation.finalize_turn(active.turn_id);
            conversation.clear_live_activity();
        }
        (self.notifier)();

        let transport = Arc::clone(&self.transport);
        let _ = thread::Builder::new()
            .name("chat-stop".to_string())
            .spawn(move || transport.request_stop());
    }

    /// Resubmit the last failed input when its error was retryable. Issues
    /// the backend retry call best-effort alongside the resubmission.
    pub fn retry(self: &Arc<Self>) -> Result<Option<SendOutcome>, AgentApiError> {
        let Some(request) = lock_unpoisoned(&self.last_failed).take() else {
            return Ok(None);
        };

        let retryable = lock_unpoisoned(&self.conversation)
            .last_error()
            .map(|error| error.retryable)
            .unwrap_or(false);
        if !retryable {
            *lock_unpoisoned(&self.last_failed) = Some(request);
            return Ok(None);
        }

        let transport = Arc::clone(&self.transport);
        let _ = thread::Builder::new()
            .name("chat-retry".to_string())
            .spawn(move || {
                let _ = transport.request_retry();
            });

        self.send(&request.content, request.mode).map(Some)
    }

    /// Block until the worker (including queue draining) has exited. For
    /// headless callers and tests; UI environments rely on notifications.
    pub fn wait_idle(&self) {
        loop {
            let handle = lock_unpoisoned(&self.worker).take();
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }

    fn spawn_worker(
        self: &Arc<Self>,
        turn_id: TurnId,
        request: TurnRequest,
        cancel: CancellationSignal,
    ) -> Result<(), AgentApiError> {
        let controller = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("chat-turn-{turn_id}"))
            .spawn(move || controller.run_worker(turn_id, request, cancel))
            .map_err(|error| {
                AgentApiError::Unknown(format!("failed to spawn turn worker: {error}"))
            })?;

        *lock_unpoisoned(&self.worker) = Some(handle);
        Ok(())
    }

    fn run_worker(
        self: Arc<Self>,
        mut turn_id: TurnId,
        mut request: TurnRequest,
        mut cancel: CancellationSignal,
    ) {
        loop {
            let outcome = self.transport.run_turn(&request, &cancel, &mut |event| {
                {
                    let mut conversation = lock_unpoisoned(&self.conversation);
                    conversation.apply(turn_id, &event);
                }
                (self.notifier)();
            });

            {
                let mut conversation = lock_unpoisoned(&self.conversation);
                match &outcome {
                    // Implicit done on stream exhaustion; idempotent when an
                    // explicit terminal event already finalized the turn.
                    Ok(_) => conversation.finalize_turn(turn_id),
                    // stop() already reset local state.
                    Err(AgentApiError::Cancelled) => {}
                    Err(error) => conversation.fail_turn(turn_id, &error.to_string()),
                }
            }
            match &outcome {
                Err(error) if !matches!(error, AgentApiError::Cancelled) => {
                    *lock_unpoisoned(&self.last_failed) = Some(request.clone());
                }
                _ => {}
            }
            (self.notifier)();

            // Drain exactly one queued input; the next turn reuses this thread.
            let next = {
                let mut active = lock_unpoisoned(&self.active_turn);
                if active.as_ref().map(|active| active.turn_id) != Some(turn_id) {
                    // Superseded by stop(); leave the queue for the next send.
                    None
                } else {
                    let mut conversation = lock_unpoisoned(&self.conversation);
                    match conversation.dequeue_input() {
                        Some(input) => {
                            let next_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
                            conversation.begin_turn(next_id, &input.content);
                            let next_cancel: CancellationSignal =
                                Arc::new(AtomicBool::new(false));
                            *active = Some(ActiveTurn {
                                turn_id: next_id,
                                cancel: Arc::clone(&next_cancel),
                            });
                            Some((
                                next_id,
                                TurnRequest::new(input.content, input.mode),
                                next_cancel,
                            ))
                        }
                        None => {
                            *active = None;
                            None
                        }
                    }
                }
            };

            match next {
                Some((next_id, next_request, next_cancel)) => {
                    (self.notifier)();
                    turn_id = next_id;
                    request = next_request;
                    cancel = next_cancel;
                }
                None => break,
            }
        }

        // Cosmetic dwell so the last activity label does not blink away.
        thread::sleep(LIVE_ACTIVITY_DWELL);
        {
            let mut conversation = lock_unpoisoned(&self.conversation);
            if !conversation.is_streaming() {
                conversation.clear_live_activity();
            }
        }
        (self.notifier)();
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
