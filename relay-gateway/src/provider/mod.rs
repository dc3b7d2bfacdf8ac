//! Model client abstraction.
//!
//! A [`ModelClient`] turns a history plus a new user message into a
//! [`ModelStream`]: a lazy, single-pass sequence of text increments that,
//! once drained, also reports the authoritative full reply.

mod gemini;
pub mod scripted;

pub use gemini::GeminiProvider;
pub use scripted::ScriptedClient;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::session::Turn;

// ============================================================================
// Client Trait
// ============================================================================

/// Capability boundary around the remote model service.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Model used when the request does not name one.
    fn default_model(&self) -> &str;

    /// Whether a credential is configured.
    fn has_credential(&self) -> bool;

    /// Open a streaming generation.
    ///
    /// Errors returned here happen before any output exists. Failures after
    /// this returns arrive as an `Err` item inside the stream.
    async fn begin_stream(
        &self,
        history: &[Turn],
        message: &str,
        options: &GenerationOptions,
    ) -> Result<ModelStream, ProviderError>;
}

/// Per-request generation settings.
///
/// Every field is optional and only forwarded when set; an unset field
/// leaves the remote service's own default in effect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
}

impl GenerationOptions {
    /// The requested model, or `default` when none was given.
    pub fn model_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(default)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error from a model client.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Model API key is not configured. Set GEMINI_API_KEY.")]
    MissingCredential,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Failed to parse response: {0}")]
    Decode(String),

    #[error("API error: {0}")]
    Api(String),
}

impl From<ProviderError> for relay_common::Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::MissingCredential => Self::Configuration(err.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

// ============================================================================
// Model Stream
// ============================================================================

/// Raw item produced by a client's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// Partial output
    Increment(String),
    /// Full reply text, reported once at the end
    Final(String),
}

/// Forward-only sequence of increments with a trailing final text.
///
/// The stream ends at the first error; [`ModelStream::final_text`] is only
/// populated when the underlying stream completed normally and reported one.
pub struct ModelStream {
    inner: BoxStream<'static, Result<ModelChunk, ProviderError>>,
    final_text: Option<String>,
    finished: bool,
}

impl ModelStream {
    pub fn new(inner: BoxStream<'static, Result<ModelChunk, ProviderError>>) -> Self {
        Self {
            inner,
            final_text: None,
            finished: false,
        }
    }

    /// Next text increment. `None` once the stream is exhausted or has failed.
    pub async fn next_increment(&mut self) -> Option<Result<String, ProviderError>> {
        while !self.finished {
            match self.inner.next().await {
                Some(Ok(ModelChunk::Increment(text))) => return Some(Ok(text)),
                Some(Ok(ModelChunk::Final(text))) => self.final_text = Some(text),
                Some(Err(err)) => {
                    self.finished = true;
                    self.final_text = None;
                    return Some(Err(err));
                }
                None => self.finished = true,
            }
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Authoritative reply text, available after the stream is drained.
    pub fn final_text(&self) -> Option<&str> {
        if self.finished {
            self.final_text.as_deref()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for ModelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStream")
            .field("finished", &self.finished)
            .field("final_text", &self.final_text)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn stream_of(items: Vec<Result<ModelChunk, ProviderError>>) -> ModelStream {
        ModelStream::new(stream::iter(items).boxed())
    }

    #[tokio::test]
    async fn final_text_only_after_drain() {
        let mut s = stream_of(vec![
            Ok(ModelChunk::Increment("He".into())),
            Ok(ModelChunk::Increment("llo".into())),
            Ok(ModelChunk::Final("Hello".into())),
        ]);

        assert_eq!(s.next_increment().await.unwrap().unwrap(), "He");
        assert_eq!(s.final_text(), None);
        assert_eq!(s.next_increment().await.unwrap().unwrap(), "llo");
        assert!(s.next_increment().await.is_none());
        assert!(s.is_finished());
        assert_eq!(s.final_text(), Some("Hello"));
        assert!(s.next_increment().await.is_none());
    }

    #[tokio::test]
    async fn error_ends_stream_and_clears_final_text() {
        let mut s = stream_of(vec![
            Ok(ModelChunk::Increment("a".into())),
            Err(ProviderError::Stream("reset".into())),
            Ok(ModelChunk::Increment("never".into())),
        ]);

        assert!(s.next_increment().await.unwrap().is_ok());
        assert!(s.next_increment().await.unwrap().is_err());
        assert!(s.next_increment().await.is_none());
        assert_eq!(s.final_text(), None);
    }

    #[test]
    fn model_or_falls_back_to_default() {
        let mut options = GenerationOptions::default();
        assert_eq!(options.model_or("gemini-2.5-flash"), "gemini-2.5-flash");
        options.model = Some("gemini-2.0-flash".into());
        assert_eq!(options.model_or("gemini-2.5-flash"), "gemini-2.0-flash");
    }

    #[test]
    fn provider_errors_map_to_taxonomy() {
        let config: relay_common::Error = ProviderError::MissingCredential.into();
        assert!(config.is_configuration());
        assert_eq!(config.status_code(), 500);

        let upstream: relay_common::Error = ProviderError::Status {
            status: 429,
            body: "quota".into(),
        }
        .into();
        assert_eq!(upstream.status_code(), 502);
        assert_eq!(upstream.to_string(), "API error (429): quota");
    }
}
