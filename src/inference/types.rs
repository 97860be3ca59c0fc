//! Wire types for the language-model endpoints.
//!
//! Two request/response envelopes are supported: Gemini `generateContent` and
//! the OpenAI-compatible Chat Completions API. Both collapse to a single
//! prompt-in, text-out call.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::InferenceError;

// ─── Call Parameters ─────────────────────────────────────────────────────────

/// Sampling and budget settings for a single model call.
///
/// Planner calls run with a low temperature and a capped output length;
/// finalizer calls allow a little more variety.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    /// Upper bound for the whole call, including fallbacks.
    pub timeout: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: None,
            max_output_tokens: None,
            timeout: Duration::from_secs(30),
        }
    }
}

// ─── Gemini ──────────────────────────────────────────────────────────────────

/// Request body for `POST /models/{model}:generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl GenerateContentRequest {
    pub fn from_prompt(prompt: &str, params: &GenerationParams) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                max_output_tokens: params.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

/// Extract `candidates[0].content.parts[0].text` from a Gemini response body.
pub fn gemini_text(body: &str) -> Result<String, InferenceError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::SchemaMismatch {
            reason: format!("invalid generateContent body: {e}"),
        })?;

    parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .ok_or_else(|| InferenceError::SchemaMismatch {
            reason: "no text in candidates[0].content.parts[0]".to_string(),
        })
}

// ─── OpenAI-compatible ───────────────────────────────────────────────────────

/// A single message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn from_prompt(model: &str, prompt: &str, params: &GenerationParams) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: Some(prompt.to_string()),
            }],
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_output_tokens,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Option<ChatMessage>,
}

/// Extract `choices[0].message.content` from a Chat Completions response body.
pub fn chat_completion_text(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::SchemaMismatch {
            reason: format!("invalid chat completion body: {e}"),
        })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| InferenceError::SchemaMismatch {
            reason: "no content in choices[0].message".to_string(),
        })
}
