use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};

use crate::config::AgentApiConfig;
use crate::error::{parse_error_message, AgentApiError};
use crate::events::{classify, AgentEvent};
use crate::headers::build_headers;
use crate::payload::TurnRequest;
use crate::retry::{is_retryable_http_error, retry_delay_ms, MAX_RETRIES};
use crate::sse::FrameDecoder;
use crate::url::{chat_url, retry_url, stop_url};

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Which terminal event, if any, ended the stream. `None` means the
/// transport closed without one and the caller treats it as an implicit done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Done,
    SessionIdle,
    FatalError,
}

/// Result of driving one streamed turn to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    pub terminal: Option<TerminalKind>,
}

#[derive(Debug)]
pub struct AgentApiClient {
    http: Client,
    config: AgentApiConfig,
}

impl AgentApiClient {
    pub fn new(config: AgentApiConfig) -> Result<Self, AgentApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(AgentApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AgentApiConfig {
        &self.config
    }

    pub fn chat_endpoint(&self) -> String {
        chat_url(&self.config.base_url, &self.config.session_id)
    }

    fn header_map(&self) -> Result<HeaderMap, AgentApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| AgentApiError::Unknown(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    AgentApiError::Unknown(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &TurnRequest,
    ) -> Result<reqwest::RequestBuilder, AgentApiError> {
        let headers = self.header_map()?;
        Ok(self
            .http
            .post(self.chat_endpoint())
            .headers(headers)
            .json(request))
    }

    /// Open the turn request, retrying transient pre-stream failures.
    ///
    /// Non-2xx responses are drained for a structured `{error}` body; the
    /// parsed message rides on the returned error so callers can classify it.
    pub async fn send_with_retry(
        &self,
        request: &TurnRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, AgentApiError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancellation) {
                return Err(AgentApiError::Cancelled);
            }

            let response = self.build_request(request)?.send();
            let response = await_or_cancel(response, cancellation)
                .await?
                .map_err(AgentApiError::from);

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &message) {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }

                    return Err(AgentApiError::Status(status, message));
                }
                Err(error) => {
                    let message = error.to_string();
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancellation)
                            .await?;
                        continue;
                    }
                }
            }
        }

        Err(AgentApiError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    /// Drive one streamed turn, invoking `on_event` for every classified
    /// event in arrival order. Reading stops at the first turn-terminal
    /// event; stream exhaustion without one reports `terminal: None`.
    pub async fn stream_turn<F>(
        &self,
        request: &TurnRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<TurnOutcome, AgentApiError>
    where
        F: FnMut(AgentEvent),
    {
        let response = self.send_with_retry(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut decoder = FrameDecoder::default();
        let mut terminal = None;

        'read: loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(AgentApiError::Cancelled);
            }
            let chunk = chunk.map_err(AgentApiError::from)?;

            for event in decode_chunk(&mut decoder, &chunk) {
                let ends_turn = event.is_turn_terminal();
                if ends_turn {
                    terminal = terminal_kind(&event);
                }

                on_event(event);

                if ends_turn {
                    break 'read;
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(AgentApiError::Cancelled);
        }

        Ok(TurnOutcome { terminal })
    }

    /// Ask the backend to retry the last failed action. Best-effort: the
    /// response body is ignored, non-2xx is reported but carries no state.
    pub async fn request_retry(
        &self,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<(), AgentApiError> {
        let url = retry_url(&self.config.base_url, &self.config.session_id);
        let response = await_or_cancel(self.http.post(url).send(), cancellation)
            .await?
            .map_err(AgentApiError::from)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentApiError::Status(
                response.status(),
                "retry request rejected".to_string(),
            ))
        }
    }

    /// Fire-and-forget stop call. Local state never waits on this; any
    /// failure is swallowed.
    pub async fn request_stop(&self) {
        let url = stop_url(&self.config.base_url, &self.config.session_id);
        let _ = self.http.post(url).send().await;
    }
}

/// Decode one transport chunk into classified events, dropping frames whose
/// payloads fail to parse.
fn decode_chunk(decoder: &mut FrameDecoder, chunk: &[u8]) -> Vec<AgentEvent> {
    decoder
        .feed(chunk)
        .iter()
        .filter_map(classify)
        .collect()
}

fn terminal_kind(event: &AgentEvent) -> Option<TerminalKind> {
    match event {
        AgentEvent::Done => Some(TerminalKind::Done),
        AgentEvent::SessionIdle => Some(TerminalKind::SessionIdle),
        AgentEvent::Error { .. } if event.is_turn_terminal() => Some(TerminalKind::FatalError),
        _ => None,
    }
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, AgentApiError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(AgentApiError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(AgentApiError::Cancelled);
            }
            return Ok(output);
        }
    }
}
