//! In-process model client that replays a fixed script.
//!
//! Useful for running the relay without network access and for exercising
//! the streaming protocol deterministically. The client records how many
//! increments the consumer actually pulled and the last call it received.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;

use super::{GenerationOptions, ModelChunk, ModelClient, ModelStream, ProviderError};
use crate::session::Turn;

/// Where an injected failure strikes.
#[derive(Debug, Clone)]
enum Failure {
    /// `begin_stream` itself fails
    BeforeStream(ProviderError),
    /// The stream fails after this many increments
    AfterIncrements(usize, ProviderError),
}

/// Arguments of the most recent `begin_stream` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub history: Vec<Turn>,
    pub message: String,
    pub options: GenerationOptions,
}

/// Per-stream counters; the stream counts as closed once this is dropped.
#[derive(Debug)]
struct StreamCounters {
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Drop for StreamCounters {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted [`ModelClient`].
#[derive(Debug, Clone)]
pub struct ScriptedClient {
    increments: Vec<String>,
    final_text: Option<String>,
    failure: Option<Failure>,
    has_credential: bool,
    default_model: String,
    delay: Option<Duration>,
    pulled: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    last_call: Arc<Mutex<Option<RecordedCall>>>,
}

impl ScriptedClient {
    /// Stream `increments`; the final text defaults to their concatenation.
    pub fn new<I, S>(increments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let increments: Vec<String> = increments.into_iter().map(Into::into).collect();
        Self {
            final_text: Some(increments.concat()),
            increments,
            failure: None,
            has_credential: true,
            default_model: "scripted-model".into(),
            delay: None,
            pulled: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Report `text` as the authoritative reply instead of the concatenation.
    pub fn with_final_text(mut self, text: impl Into<String>) -> Self {
        self.final_text = Some(text.into());
        self
    }

    /// Report no final text at all.
    pub fn without_final_text(mut self) -> Self {
        self.final_text = None;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Wait `delay` before yielding each item.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Behave as if no credential were configured.
    pub fn without_credential(mut self) -> Self {
        self.has_credential = false;
        self
    }

    /// Fail `begin_stream` with `err`.
    pub fn failing_before_stream(mut self, err: ProviderError) -> Self {
        self.failure = Some(Failure::BeforeStream(err));
        self
    }

    /// Fail mid-stream after `count` increments.
    pub fn failing_after(mut self, count: usize, err: ProviderError) -> Self {
        self.failure = Some(Failure::AfterIncrements(count, err));
        self
    }

    /// Increments consumed so far, across all streams.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Streams that have been dropped by their consumer.
    pub fn streams_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of `begin_stream` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.last_call
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn script(&self) -> Vec<Result<ModelChunk, ProviderError>> {
        let mut items: Vec<Result<ModelChunk, ProviderError>> = self
            .increments
            .iter()
            .cloned()
            .map(|text| Ok(ModelChunk::Increment(text)))
            .collect();

        match &self.failure {
            Some(Failure::AfterIncrements(count, err)) => {
                items.truncate(*count);
                items.push(Err(err.clone()));
            }
            _ => {
                if let Some(text) = &self.final_text {
                    items.push(Ok(ModelChunk::Final(text.clone())));
                }
            }
        }
        items
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn has_credential(&self) -> bool {
        self.has_credential
    }

    async fn begin_stream(
        &self,
        history: &[Turn],
        message: &str,
        options: &GenerationOptions,
    ) -> Result<ModelStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap_or_else(PoisonError::into_inner) = Some(RecordedCall {
            history: history.to_vec(),
            message: message.to_string(),
            options: options.clone(),
        });

        if !self.has_credential {
            return Err(ProviderError::MissingCredential);
        }
        if let Some(Failure::BeforeStream(err)) = &self.failure {
            return Err(err.clone());
        }

        let counters = StreamCounters {
            pulled: Arc::clone(&self.pulled),
            closed: Arc::clone(&self.closed),
        };
        let delay = self.delay;
        let items = stream::iter(self.script())
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .map(move |item| {
                if matches!(item, Ok(ModelChunk::Increment(_))) {
                    counters.pulled.fetch_add(1, Ordering::SeqCst);
                }
                item
            });
        Ok(ModelStream::new(items.boxed()))
    }
}
