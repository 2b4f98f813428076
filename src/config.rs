use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::provider::ModelVariant;
use crate::typing::Pacing;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default model (optional)
    pub model: Option<ModelVariant>,

    /// Provider identifier ("google" or "echo").
    pub provider: Option<String>,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub typing: TypingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GoogleConfig {
    pub api_key: Option<String>,

    /// Override for the Generative Language API root (proxies, tests).
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TypingConfig {
    /// Base delay between typing steps, in milliseconds.
    pub unit_ms: Option<u64>,

    /// Pause before the first chunk of an answer appears, in milliseconds.
    pub lead_in_ms: Option<u64>,
}

impl TypingConfig {
    pub fn pacing(&self) -> Pacing {
        let default = Pacing::default();
        Pacing {
            unit: self.unit_ms.map(Duration::from_millis).unwrap_or(default.unit),
            lead_in: self.lead_in_ms.map(Duration::from_millis).unwrap_or(default.lead_in),
        }
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg = Self::parse(&s).with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
