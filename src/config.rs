//! Configuration types for the field-merging pipeline.
//!
//! All processing behaviour is controlled through [`ProcessorConfig`], built
//! via its [`ProcessorConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to log a run's settings and to diff two runs that produced
//! different schemas.

use crate::error::FormMergeError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Default number of fields described per deduplication request.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default provider when nothing else is configured.
pub const DEFAULT_PROVIDER: &str = "anthropic";

/// Default model for [`DEFAULT_PROVIDER`].
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Configuration for one pipeline run.
///
/// Built via [`ProcessorConfig::builder()`] or using
/// [`ProcessorConfig::default()`].
///
/// # Example
/// ```rust
/// use acroform_merge::ProcessorConfig;
///
/// let config = ProcessorConfig::builder()
///     .batch_size(25)
///     .model("claude-sonnet-4-5-20250929")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 25);
/// ```
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Fields per deduplication request. Default: 50.
    ///
    /// Governs chunking in the deduplication stage only. Duplicates that land
    /// in different batches are never merged, so larger batches merge more at
    /// the cost of longer prompts.
    pub batch_size: usize,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`] for the default
    /// provider or the provider's own default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "anthropic", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Anthropic API key. When set, the Anthropic provider is built with it
    /// directly instead of reading `ANTHROPIC_API_KEY`. Ignored when another
    /// provider is named.
    pub api_key: Option<String>,

    /// Sampling temperature. Default: 0.2.
    ///
    /// Deduplication and grouping answers must be stable JSON; a low
    /// temperature keeps the model close to the requested format.
    pub temperature: f32,

    /// Maximum output tokens for the deduplication, grouping and
    /// conditional-logic requests. Default: 4096.
    pub max_tokens: usize,

    /// Maximum output tokens for each per-field label request. Default: 512.
    pub label_max_tokens: usize,

    /// Per-request timeout in seconds. Default: None (transport default).
    pub api_timeout_secs: Option<u64>,

    /// Receives per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            model: None,
            provider_name: None,
            provider: None,
            api_key: None,
            temperature: 0.2,
            max_tokens: 4096,
            label_max_tokens: 512,
            api_timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("batch_size", &self.batch_size)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("label_max_tokens", &self.label_max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProcessingProgressCallback>"),
            )
            .finish()
    }
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ProcessorConfig`].
#[derive(Debug)]
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn label_max_tokens(mut self, n: usize) -> Self {
        self.config.label_max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, FormMergeError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(FormMergeError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 || c.label_max_tokens == 0 {
            return Err(FormMergeError::InvalidConfig(
                "Token limits must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(FormMergeError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
