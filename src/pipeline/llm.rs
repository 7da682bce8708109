//! LLM interaction: the client seam, the provider adapter, and the response
//! parser shared by every LLM-backed stage.
//!
//! Stages never talk to a provider directly. They go through a
//! [`StageContext`], which sends an [`LlmRequest`] to any
//! [`CompletionClient`] and keeps the run's bookkeeping (call count,
//! fallbacks). Production runs use [`ProviderClient`] over an
//! `edgequake_llm` provider; tests substitute a client that returns canned
//! or deliberately broken text, so every fallback path is deterministic.
//!
//! ## Response format
//!
//! Models are asked for bare JSON but often wrap it in a code fence, with or
//! without a `json` tag. [`parse_llm_json`] strips the fence lines, decodes
//! the JSON, and then checks its shape against the target type. The two
//! failure kinds are reported separately so logs say whether the model
//! produced garbage or merely the wrong structure.

use crate::config::ProcessorConfig;
use crate::error::{FormMergeError, StageFallback};
use crate::pipeline::Stage;
use crate::progress::ProgressCallback;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// One text-completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    /// Stage issuing the request; carried into transport errors.
    pub stage: Stage,
    /// Complete instruction text, including the JSON field summary.
    pub prompt: String,
    /// Output token budget.
    pub max_tokens: usize,
}

/// A text-completion capability.
///
/// Returns the raw response text, or a fatal transport error. Parsing is the
/// caller's job, so a client never has to know what shape a stage expects.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        request: &LlmRequest,
    ) -> impl Future<Output = Result<String, FormMergeError>> + Send;
}

/// [`CompletionClient`] backed by an `edgequake_llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    timeout_secs: Option<u64>,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ProcessorConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            timeout_secs: config.api_timeout_secs,
        }
    }

    fn options(&self, request: &LlmRequest) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        }
    }
}

impl CompletionClient for ProviderClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, FormMergeError> {
        let messages = vec![ChatMessage::user(request.prompt.as_str())];
        let options = self.options(request);

        let call = self.provider.chat(&messages, Some(&options));
        let result = match self.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), call)
                .await
                .map_err(|_| FormMergeError::LlmTimeout {
                    stage: request.stage,
                    secs,
                })?,
            None => call.await,
        };

        let response = result.map_err(|e| FormMergeError::LlmApiError {
            stage: request.stage,
            message: e.to_string(),
        })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            request.stage, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

/// Why an LLM response could not be used.
#[derive(Debug, Error)]
pub enum ResponseParseError {
    /// Nothing left after trimming and fence removal.
    #[error("response was empty")]
    Empty,

    /// The text is not JSON at all.
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Valid JSON, but not the structure the stage asked for.
    #[error("response JSON has an unexpected shape: {0}")]
    UnexpectedShape(#[source] serde_json::Error),
}

static RE_FENCED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap()
});

/// Remove a surrounding code fence (optionally tagged, e.g. ```` ```json ````).
///
/// A fence that is opened but never closed loses only its opening line.
/// Text without a leading fence is returned unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    if let Some(inner) = RE_FENCED.captures(trimmed).and_then(|c| c.get(1)) {
        return inner.as_str().trim();
    }
    trimmed
        .split_once('\n')
        .map_or("", |(_, rest)| rest.trim())
}

/// Decode an LLM response into `T`.
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T, ResponseParseError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ResponseParseError::Empty);
    }
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(ResponseParseError::InvalidJson)?;
    serde_json::from_value(value).map_err(ResponseParseError::UnexpectedShape)
}

// ── Stage context ────────────────────────────────────────────────────────

/// Shared state for one pipeline run: the client, the config, and what
/// happened so far.
pub struct StageContext<'a, C> {
    client: &'a C,
    config: &'a ProcessorConfig,
    fallbacks: Vec<StageFallback>,
    llm_calls: usize,
}

impl<'a, C: CompletionClient> StageContext<'a, C> {
    pub fn new(client: &'a C, config: &'a ProcessorConfig) -> Self {
        Self {
            client,
            config,
            fallbacks: Vec::new(),
            llm_calls: 0,
        }
    }

    pub fn config(&self) -> &'a ProcessorConfig {
        self.config
    }

    pub fn progress(&self) -> Option<&'a ProgressCallback> {
        self.config.progress_callback.as_ref()
    }

    /// Send one request. Transport errors are returned untouched; whether
    /// they are fatal is the calling stage's decision.
    pub async fn request(
        &mut self,
        stage: Stage,
        prompt: String,
        max_tokens: usize,
    ) -> Result<String, FormMergeError> {
        let request = LlmRequest {
            stage,
            prompt,
            max_tokens,
        };
        self.llm_calls += 1;
        let start = Instant::now();

        let result = self.client.complete(&request).await;
        match &result {
            Ok(text) => debug!(
                "{}: {} byte response in {:?}",
                stage,
                text.len(),
                start.elapsed()
            ),
            Err(e) => warn!("{}: request failed after {:?}: {}", stage, start.elapsed(), e),
        }
        result
    }

    /// Note that a stage substituted its fallback.
    pub fn record_fallback(&mut self, fallback: StageFallback) {
        warn!("{}", fallback);
        if let Some(cb) = self.progress() {
            cb.on_fallback(&fallback);
        }
        self.fallbacks.push(fallback);
    }

    pub fn fallbacks(&self) -> &[StageFallback] {
        &self.fallbacks
    }

    pub fn llm_calls(&self) -> usize {
        self.llm_calls
    }

    /// Consume the context, returning `(fallbacks, llm_calls)`.
    pub fn into_parts(self) -> (Vec<StageFallback>, usize) {
        (self.fallbacks, self.llm_calls)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted client for stage unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies in order; an exhausted queue answers with an
    /// empty string, which every stage treats as unparseable.
    pub(crate) struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, FormMergeError>>>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(replies: Vec<Result<String, FormMergeError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }

        pub(crate) fn requests(&self) -> Vec<LlmRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl CompletionClient for ScriptedClient {
        async fn complete(&self, request: &LlmRequest) -> Result<String, FormMergeError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }
}
