//! Text-generation backends.
//!
//! One client, several wire dialects. The dialect is picked by [`TextMode`]
//! and every mode reduces to "prompt in, text out".

mod client;
mod types;

pub use client::{HORDE_POLL_INTERVAL, TextClient, TextClientBuilder};
pub use types::{HordeParams, HordeRequest, KoboldRequest, OPENAI_MODEL, OpenAiRequest, TOGETHER_MODEL};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Something that turns a prompt into text.
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Wire dialect spoken by a text backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextMode {
    /// KoboldAI `POST {prompt, temperature, top_p}`.
    Kobold,
    /// `OpenAI` completions with a bearer token.
    #[serde(rename = "openai")]
    OpenAi,
    /// Together inference via query string.
    Together,
    /// Kobold Horde async submit + poll.
    #[serde(rename = "koboldhorde")]
    KoboldHorde,
    /// `GET <url><escaped prompt>`, raw body as the answer.
    #[default]
    Simple,
}

impl TextMode {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kobold => "kobold",
            Self::OpenAi => "openai",
            Self::Together => "together",
            Self::KoboldHorde => "koboldhorde",
            Self::Simple => "simple",
        }
    }
}

impl fmt::Display for TextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextMode {
    type Err = std::convert::Infallible;

    /// Case-insensitive; unknown names fall back to [`TextMode::Simple`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "kobold" => Self::Kobold,
            "openai" => Self::OpenAi,
            "together" => Self::Together,
            "koboldhorde" => Self::KoboldHorde,
            _ => Self::Simple,
        })
    }
}
