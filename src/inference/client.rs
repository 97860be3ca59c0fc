//! Language-model client.
//!
//! Sends a single prompt to a Gemini or OpenAI-compatible endpoint and returns
//! the generated text. Handles the fallback chain when the primary model is
//! unavailable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{ModelsConfig, Provider};
use super::errors::InferenceError;
use super::types::{
    chat_completion_text, gemini_text, ChatCompletionRequest, GenerateContentRequest,
    GenerationParams,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard ceiling for a single HTTP request. Call-level budgets come from
/// [`GenerationParams::timeout`] and are normally much shorter.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ─── LanguageModel ───────────────────────────────────────────────────────────

/// A prompt-in, text-out model call.
///
/// The planner and finalizer depend on this trait rather than on the HTTP
/// client, so tests can substitute scripted responses.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate text for `prompt`. Must finish within `params.timeout`.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP client for the configured model endpoint.
///
/// Pinned to one primary model; the config's fallback chain is walked per
/// call, so the client holds no mutable state and can be shared.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelsConfig,
    primary_model: String,
}

impl InferenceClient {
    /// Create a client targeting `model`, falling back along the configured chain.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: ModelsConfig, model: &str) -> Result<Self, InferenceError> {
        if model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model name must not be empty".into(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            primary_model: model.to_string(),
        })
    }

    /// Client for planner calls.
    pub fn planner(config: ModelsConfig) -> Result<Self, InferenceError> {
        let model = config.planner_model.clone();
        Self::from_config(config, &model)
    }

    /// Client for finalizer calls.
    pub fn finalizer(config: ModelsConfig) -> Result<Self, InferenceError> {
        let model = config.finalizer_model.clone();
        Self::from_config(config, &model)
    }

    /// The model tried first.
    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    /// Primary model followed by the fallback chain, without duplicates.
    fn model_chain(&self) -> Vec<&str> {
        let mut chain: Vec<&str> = vec![self.primary_model.as_str()];
        for key in &self.config.fallback_chain {
            if !key.trim().is_empty() && !chain.contains(&key.as_str()) {
                chain.push(key.as_str());
            }
        }
        chain
    }

    // ─── Fallback Chain ──────────────────────────────────────────────────

    async fn generate_with_fallback(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        let mut attempted = Vec::new();

        for model in self.model_chain() {
            match self.try_model(model, prompt, params).await {
                Ok(text) => {
                    if !attempted.is_empty() {
                        tracing::info!(model, skipped = attempted.len(), "fallback model answered");
                    }
                    return Ok(text);
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(model, error = %e, "model unavailable, trying next in chain");
                    attempted.push(model.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Err(InferenceError::AllModelsUnavailable { attempted })
    }

    async fn try_model(
        &self,
        model: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        let base = self.config.base_url.trim_end_matches('/');

        let request = match self.config.provider {
            Provider::Gemini => {
                let url = format!("{base}/models/{model}:generateContent");
                let mut req = self
                    .http
                    .post(url)
                    .json(&GenerateContentRequest::from_prompt(prompt, params));
                if let Some(key) = &self.config.api_key {
                    req = req.header("x-goog-api-key", key);
                }
                req
            }
            Provider::OpenaiCompatible => {
                let url = format!("{base}/chat/completions");
                let mut req = self
                    .http
                    .post(url)
                    .json(&ChatCompletionRequest::from_prompt(model, prompt, params));
                if let Some(key) = &self.config.api_key {
                    req = req.bearer_auth(key);
                }
                req
            }
        };

        let response = request.timeout(params.timeout).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let body = if self.config.provider == Provider::Gemini && status.as_u16() == 404 {
                format!("unknown/unsupported model '{model}': {body}")
            } else {
                body
            };
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        match self.config.provider {
            Provider::Gemini => gemini_text(&body),
            Provider::OpenaiCompatible => chat_completion_text(&body),
        }
    }
}

#[async_trait]
impl LanguageModel for InferenceClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(params.timeout, self.generate_with_fallback(prompt, params))
            .await
            .unwrap_or(Err(InferenceError::Timeout {
                duration_ms: params.timeout.as_millis() as u64,
            }));

        match &result {
            Ok(text) => tracing::debug!(
                model = %self.primary_model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                response_len = text.len(),
                "model call completed"
            ),
            Err(e) => tracing::warn!(
                model = %self.primary_model,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "model call failed"
            ),
        }

        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
