//! Request and response bodies for the text backends.

use serde::{Deserialize, Serialize};

/// Model requested in `openai` mode.
pub const OPENAI_MODEL: &str = "text-davinci-003";

/// Model requested in `together` mode.
pub const TOGETHER_MODEL: &str = "Together-gpt-JT-6B-v1";

/// Body of a Kobold generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KoboldRequest {
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
}

impl KoboldRequest {
    /// Request with the stock sampling parameters.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.7,
            top_p: 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextChoice {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KoboldResponse {
    #[serde(default)]
    pub results: Vec<TextChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TogetherResponse {
    #[serde(default)]
    pub output: TogetherOutput,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TogetherOutput {
    #[serde(default)]
    pub choices: Vec<TextChoice>,
}

/// Body of an `OpenAI` completions call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiRequest {
    /// Model name.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
    /// Frequency penalty.
    pub frequency_penalty: f64,
    /// Presence penalty.
    pub presence_penalty: f64,
    /// End-user tag.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

impl OpenAiRequest {
    /// Request with the stock completion parameters.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: OPENAI_MODEL.to_string(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 256,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            user: "easel".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiResponse {
    #[serde(default)]
    pub choices: Vec<TextChoice>,
}

/// Body of a Kobold Horde async generate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HordeRequest {
    /// Prompt text.
    pub prompt: String,
    /// Generation parameters.
    pub params: HordeParams,
    /// Restrict to trusted workers.
    pub trusted_workers: bool,
    /// Allow NSFW workers.
    pub nsfw: bool,
}

/// Generation parameters for Kobold Horde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HordeParams {
    /// Number of generations.
    pub n: u32,
    /// Context window.
    pub max_context_length: u32,
    /// Output length cap.
    pub max_length: u32,
    /// Repetition penalty.
    pub rep_pen: f64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling cutoff.
    pub top_p: f64,
}

impl HordeRequest {
    /// Request with the stock horde parameters.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: HordeParams {
                n: 1,
                max_context_length: 1024,
                max_length: 256,
                rep_pen: 1.0,
                temperature: 0.7,
                top_p: 1.0,
            },
            trusted_workers: false,
            nsfw: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HordeAccepted {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HordeStatus {
    #[serde(default)]
    pub done: bool,
    #[serde(default = "default_true")]
    pub is_possible: bool,
    #[serde(default)]
    pub generations: Vec<TextChoice>,
}

const fn default_true() -> bool {
    true
}
