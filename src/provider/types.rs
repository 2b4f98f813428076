use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The two Gemini variants the client knows how to target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelVariant {
    #[serde(rename = "gemini-1.5-flash")]
    Flash15,

    /// Higher throughput; the default.
    #[default]
    #[serde(rename = "gemini-2.0-flash")]
    Flash20,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Flash15, ModelVariant::Flash20];

    /// Remote model name used in the request path.
    pub fn model_name(self) -> &'static str {
        match self {
            ModelVariant::Flash15 => "gemini-1.5-flash",
            ModelVariant::Flash20 => "gemini-2.0-flash",
        }
    }

    /// Human-facing label, used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            ModelVariant::Flash15 => "Gemini Flash",
            ModelVariant::Flash20 => "Gemini 2.0 Flash",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown model {0:?} (expected gemini-1.5-flash or gemini-2.0-flash)")]
pub struct UnknownModel(String);

impl FromStr for ModelVariant {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.model_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

/// Why a single generate call produced no text.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{label} API Error: {message}")]
    Api {
        label: &'static str,
        status: u16,
        message: String,
    },

    #[error("No response received from the AI")]
    EmptyResponse,

    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One request per prompt, full text back.
pub trait ResponseClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> ModelVariant;

    /// Send `prompt` and wait for the complete answer. Makes exactly one attempt.
    fn generate(&self, prompt: String) -> BoxFuture<'static, Result<String, GenerationError>>;
}
