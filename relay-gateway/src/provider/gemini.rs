//! Google Gemini streaming client.
//!
//! Talks to `models/{model}:streamGenerateContent?alt=sse`. Each SSE event
//! carries one `GenerateContentResponse` chunk; the text of a chunk is one
//! increment, and the concatenation of all chunks is the final reply.

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use relay_common::config::ModelConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationOptions, ModelChunk, ModelClient, ModelStream, ProviderError};
use crate::session::Turn;

/// Gemini REST client.
pub struct GeminiProvider {
    api_key: Option<String>,
    default_model: String,
    base_url: String,
    client: Client,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentChunk {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

impl GenerateContentChunk {
    fn text(&self) -> String {
        self.candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// PROVIDER
// ══════════════════════════════════════════════════════════════════════════════

impl GeminiProvider {
    /// Create a client. An absent key is accepted and reported at request time.
    pub fn new(api_key: Option<&str>, default_model: impl Into<String>) -> Self {
        Self {
            api_key: api_key
                .filter(|k| !k.trim().is_empty())
                .map(String::from),
            default_model: default_model.into(),
            base_url: ModelConfig::default().base_url,
            client: build_client(ModelConfig::default().connect_timeout_secs),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            api_key: config.api_key().map(String::from),
            default_model: config.default_model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: build_client(config.connect_timeout_secs),
        }
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/models/{model}:streamGenerateContent?alt=sse",
            self.base_url
        )
    }
}

// No overall timeout: a streaming reply may legitimately run for minutes.
fn build_client(connect_timeout_secs: u64) -> Client {
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn build_request(
    history: &[Turn],
    message: &str,
    options: &GenerationOptions,
) -> GenerateContentRequest {
    let contents = history
        .iter()
        .map(|turn| (turn.role.as_str(), turn.text.as_str()))
        .chain(std::iter::once(("user", message)))
        .map(|(role, text)| Content {
            role: Some(role),
            parts: vec![Part {
                text: text.to_string(),
            }],
        })
        .collect();

    let system_instruction = options.system_prompt.as_ref().map(|sys| Content {
        role: None,
        parts: vec![Part { text: sys.clone() }],
    });

    let generation_config = (options.temperature.is_some() || options.max_output_tokens.is_some())
        .then(|| GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
        });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config,
    }
}

/// Pull the human-readable message out of a Gemini error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl ModelClient for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn begin_stream(
        &self,
        history: &[Turn],
        message: &str,
        options: &GenerationOptions,
    ) -> Result<ModelStream, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::MissingCredential)?;

        let model = options.model_or(&self.default_model);
        let url = self.endpoint(model);
        let body = build_request(history, message, options);

        tracing::debug!(model, context_turns = history.len(), "Opening Gemini stream");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: error_message(&text),
            });
        }

        Ok(ModelStream::new(decode_stream(response.bytes_stream())))
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// SSE DECODING
// ══════════════════════════════════════════════════════════════════════════════

struct DecodeState {
    events: BoxStream<'static, Result<Event, ProviderError>>,
    pending: Option<Result<ModelChunk, ProviderError>>,
    text: String,
    done: bool,
}

impl DecodeState {
    fn fail(&mut self, err: ProviderError) {
        tracing::warn!(error = %err, "Gemini stream failed");
        self.pending = Some(Err(err));
        self.done = true;
    }

    fn handle(&mut self, payload: &str) {
        if self.done || payload.trim().is_empty() {
            return;
        }

        let chunk: GenerateContentChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => return self.fail(ProviderError::Decode(e.to_string())),
        };

        if let Some(err) = &chunk.error {
            return self.fail(ProviderError::Api(err.message.clone()));
        }

        let text = chunk.text();
        if !text.is_empty() {
            self.text.push_str(&text);
            self.pending = Some(Ok(ModelChunk::Increment(text)));
        }
    }
}

fn stream_error<E: std::fmt::Display>(err: EventStreamError<E>) -> ProviderError {
    match err {
        EventStreamError::Transport(e) => ProviderError::Stream(e.to_string()),
        other => ProviderError::Decode(other.to_string()),
    }
}

/// Turn a raw SSE byte stream into model chunks.
///
/// Ends with [`ModelChunk::Final`] on a clean close, or with a single error.
pub(crate) fn decode_stream<S, B, E>(body: S) -> BoxStream<'static, Result<ModelChunk, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let state = DecodeState {
        events: body.eventsource().map(|event| event.map_err(stream_error)).boxed(),
        pending: None,
        text: String::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.take() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => state.handle(&event.data),
                Some(Err(err)) => state.fail(err),
                None => {
                    let text = std::mem::take(&mut state.text);
                    state.pending = Some(Ok(ModelChunk::Final(text)));
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}
