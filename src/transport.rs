//! HTTP-backed implementation of the controller's transport seam.
//!
//! Bridges the async `agent_api` client into the synchronous worker loop
//! with a current-thread runtime per call; the worker thread already
//! provides the blocking context.

use agent_api::{
    AgentApiClient, AgentApiConfig, AgentApiError, AgentEvent, CancellationSignal, TurnOutcome,
    TurnRequest,
};

use crate::controller::TurnTransport;

pub struct HttpTurnTransport {
    client: AgentApiClient,
}

impl HttpTurnTransport {
    pub fn new(config: AgentApiConfig) -> Result<Self, AgentApiError> {
        Ok(Self {
            client: AgentApiClient::new(config)?,
        })
    }

    pub fn client(&self) -> &AgentApiClient {
        &self.client
    }

    fn runtime() -> Result<tokio::runtime::Runtime, AgentApiError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                AgentApiError::Unknown(format!("failed to initialize tokio runtime: {error}"))
            })
    }
}

impl TurnTransport for HttpTurnTransport {
    fn run_turn(
        &self,
        request: &TurnRequest,
        cancel: &CancellationSignal,
        on_event: &mut dyn FnMut(AgentEvent),
    ) -> Result<TurnOutcome, AgentApiError> {
        let runtime = Self::runtime()?;
        runtime.block_on(self.client.stream_turn(request, Some(cancel), on_event))
    }

    fn request_stop(&self) {
        let Ok(runtime) = Self::runtime() else {
            return;
        };
        runtime.block_on(self.client.request_stop());
    }

    fn request_retry(&self) -> Result<(), AgentApiError> {
        let runtime = Self::runtime()?;
        runtime.block_on(self.client.request_retry(None))
    }
}
