//! Streaming relay.
//!
//! Drives one chat turn end to end:
//!
//! ```text
//! Idle → Validating → Truncating → Streaming → Aggregating
//!      → Committing | Skipping → Finalizing → Closed
//! ```
//!
//! [`Relay::begin`] covers everything up to opening the upstream stream, so
//! its failures can still be answered with a plain JSON error. Once it
//! returns, [`PreparedTurn::run`] owns the framed protocol and always ends
//! with exactly one `done` frame.
//!
//! A disconnected caller stops frame emission but not consumption: the
//! upstream stream is drained to its end and the turn is not committed.

use std::sync::Arc;

use relay_common::Error;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::frame::StreamFrame;
use crate::provider::{GenerationOptions, ModelClient, ModelStream};
use crate::session::{HistoryStore, Turn};

// ============================================================================
// Request
// ============================================================================

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_output_tokens: Option<f64>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    pub session_id: String,
    pub message: String,
    pub options: GenerationOptions,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// JSON numbers arrive as floats; `128.0` is as good as `128`.
fn token_limit(value: f64) -> Result<u32, Error> {
    if value.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(Error::Validation(
            "maxOutputTokens must be a non-negative integer".into(),
        ))
    }
}

impl ChatRequest {
    /// Check required fields and collect the optional generation settings.
    pub fn validate(self) -> Result<TurnInput, Error> {
        let session_id = non_blank(self.session_id)
            .ok_or_else(|| Error::Validation("sessionId is required".into()))?;

        let message = self
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::Validation("message is required".into()))?;

        if let Some(t) = self.temperature {
            if !t.is_finite() {
                return Err(Error::Validation("temperature must be a number".into()));
            }
        }

        let max_output_tokens = self.max_output_tokens.map(token_limit).transpose()?;

        Ok(TurnInput {
            session_id,
            message,
            options: GenerationOptions {
                model: non_blank(self.model),
                system_prompt: non_blank(self.system_prompt),
                temperature: self.temperature,
                max_output_tokens,
            },
        })
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// Lifecycle of one relayed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Validating,
    Truncating,
    Streaming,
    Aggregating,
    Committing,
    Skipping,
    Finalizing,
    Closed,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Truncating => "truncating",
            Self::Streaming => "streaming",
            Self::Aggregating => "aggregating",
            Self::Committing => "committing",
            Self::Skipping => "skipping",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn advance(state: &mut RelayState, next: RelayState) {
    tracing::debug!(from = %state, to = %next, "Relay state");
    *state = next;
}

/// How a streamed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The user/model pair was appended to the session
    Committed,
    /// The caller disconnected; nothing was stored
    Cancelled,
    /// The upstream stream failed; nothing was stored
    Failed,
    /// The model produced no text; nothing was stored
    Empty,
}

/// Summary of a finished turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    /// Content frames delivered to the caller
    pub frames_forwarded: usize,
    /// Increments consumed from the upstream stream
    pub increments_drained: usize,
}

// ============================================================================
// Frame Sink
// ============================================================================

/// Destination for frames of one response.
pub trait FrameSink: Send {
    /// Deliver a frame. Returns `false` once the caller is gone.
    fn send(&mut self, frame: StreamFrame) -> bool;

    /// Whether the caller has disconnected.
    fn is_closed(&self) -> bool;
}

impl FrameSink for mpsc::UnboundedSender<StreamFrame> {
    fn send(&mut self, frame: StreamFrame) -> bool {
        mpsc::UnboundedSender::send(self, frame).is_ok()
    }

    fn is_closed(&self) -> bool {
        mpsc::UnboundedSender::is_closed(self)
    }
}

fn deliver<S: FrameSink>(sink: &mut S, frame: StreamFrame) -> bool {
    !sink.is_closed() && sink.send(frame)
}

// ============================================================================
// Relay
// ============================================================================

/// Shared entry point for chat turns.
#[derive(Clone)]
pub struct Relay {
    store: HistoryStore,
    client: Arc<dyn ModelClient>,
}

impl Relay {
    pub fn new(store: HistoryStore, client: Arc<dyn ModelClient>) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn client(&self) -> &dyn ModelClient {
        self.client.as_ref()
    }

    /// Validate, truncate the session and open the upstream stream.
    ///
    /// Nothing has been sent to the caller when this fails.
    pub async fn begin(&self, request: ChatRequest) -> Result<PreparedTurn, Error> {
        let mut state = RelayState::Idle;

        advance(&mut state, RelayState::Validating);
        let input = request.validate()?;

        advance(&mut state, RelayState::Truncating);
        let history = self.store.prune(&input.session_id);

        let stream = self
            .client
            .begin_stream(&history, &input.message, &input.options)
            .await
            .map_err(|err| {
                tracing::warn!(
                    provider = self.client.name(),
                    error = %err,
                    "Upstream stream could not be opened"
                );
                Error::from(err)
            })?;

        tracing::debug!(
            provider = self.client.name(),
            model = input.options.model_or(self.client.default_model()),
            context_turns = history.len(),
            "Upstream stream opened"
        );

        Ok(PreparedTurn {
            store: self.store.clone(),
            input,
            stream,
            state,
        })
    }
}

/// A turn whose upstream stream is open and ready to be relayed.
#[derive(Debug)]
pub struct PreparedTurn {
    store: HistoryStore,
    input: TurnInput,
    stream: ModelStream,
    state: RelayState,
}

impl PreparedTurn {
    pub fn session_id(&self) -> &str {
        &self.input.session_id
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Relay the stream into `sink`, then commit or discard the turn.
    pub async fn run<S: FrameSink>(mut self, sink: &mut S) -> TurnReport {
        advance(&mut self.state, RelayState::Streaming);

        let mut buffer = String::new();
        let mut cancelled = false;
        let mut failed = false;
        let mut frames_forwarded = 0;
        let mut increments_drained = 0;

        while let Some(item) = self.stream.next_increment().await {
            match item {
                Ok(text) => {
                    increments_drained += 1;
                    if !cancelled {
                        if deliver(sink, StreamFrame::content(text.as_str())) {
                            frames_forwarded += 1;
                        } else {
                            cancelled = true;
                            tracing::debug!("Client disconnected, draining upstream");
                        }
                    }
                    buffer.push_str(&text);
                }
                Err(err) => {
                    failed = true;
                    tracing::warn!(error = %err, "Upstream failed mid-stream");
                    if !cancelled && !deliver(sink, StreamFrame::error(err.to_string())) {
                        cancelled = true;
                    }
                }
            }
        }

        advance(&mut self.state, RelayState::Aggregating);
        let reply = self
            .stream
            .final_text()
            .filter(|t| !t.is_empty())
            .map_or(buffer, str::to_owned);

        // A caller that left after the last frame still counts as gone.
        cancelled |= sink.is_closed();

        let outcome = if cancelled {
            TurnOutcome::Cancelled
        } else if failed {
            TurnOutcome::Failed
        } else if reply.is_empty() {
            TurnOutcome::Empty
        } else {
            TurnOutcome::Committed
        };

        if outcome == TurnOutcome::Committed {
            advance(&mut self.state, RelayState::Committing);
            let reply_chars = reply.chars().count();
            let session_id = self.input.session_id.as_str();
            self.store
                .commit(session_id, Turn::user(self.input.message.as_str()), Turn::model(reply));
            tracing::info!(session_id, reply_chars, frames_forwarded, "Turn committed");
        } else {
            advance(&mut self.state, RelayState::Skipping);
            tracing::info!(
                session_id = %self.input.session_id,
                outcome = ?outcome,
                frames_forwarded,
                increments_drained,
                "Turn discarded"
            );
        }

        advance(&mut self.state, RelayState::Finalizing);
        sink.send(StreamFrame::Done);

        advance(&mut self.state, RelayState::Closed);
        TurnReport {
            outcome,
            frames_forwarded,
            increments_drained,
        }
    }
}
