use super::{GenerationError, ModelVariant, ResponseClient};
use anyhow::{anyhow, Context};
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/";

/// Prompt used to probe whether the configured credential is accepted.
pub const KEY_PROBE_PROMPT: &str = "Hello, this is a test message to validate the API key.";

#[derive(Debug, Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    model: ModelVariant,
    endpoint: Url,
    headers: HeaderMap,
}

#[derive(Debug, Clone)]
pub enum GoogleAuth {
    ApiKey(String),
    BearerToken(String),
}

impl GoogleClient {
    pub fn new(http: reqwest::Client, auth: GoogleAuth, model: ModelVariant) -> anyhow::Result<Self> {
        Self::with_api_base(http, auth, model, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        http: reqwest::Client,
        auth: GoogleAuth,
        model: ModelVariant,
        api_base: &str,
    ) -> anyhow::Result<Self> {
        let mut base = api_base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).with_context(|| format!("invalid API base URL: {api_base}"))?;

        // Docs: https://ai.google.dev/api/rest/v1beta/models/generateContent
        let mut endpoint = base.join(&format!("v1beta/models/{}:generateContent", model.model_name()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match &auth {
            GoogleAuth::ApiKey(key) => {
                endpoint.query_pairs_mut().append_pair("key", key);
            }
            GoogleAuth::BearerToken(tok) => {
                let v = HeaderValue::from_str(&format!("Bearer {tok}")).map_err(|e| anyhow!(e))?;
                headers.insert(AUTHORIZATION, v);
            }
        }

        Ok(Self {
            http,
            model,
            endpoint,
            headers,
        })
    }
}

impl ResponseClient for GoogleClient {
    fn name(&self) -> &'static str {
        "google"
    }

    fn model(&self) -> ModelVariant {
        self.model
    }

    fn generate(&self, prompt: String) -> BoxFuture<'static, Result<String, GenerationError>> {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        let headers = self.headers.clone();
        let model = self.model;

        Box::pin(async move {
            let body = GenerateContentRequest {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part { text: Some(prompt) }],
                }],
            };

            info!(%model, "sending request");
            let resp = http.post(endpoint).headers(headers).json(&body).send().await?;

            let status = resp.status();
            let bytes = resp.bytes().await?;
            if !status.is_success() {
                return Err(GenerationError::Api {
                    label: model.label(),
                    status: status.as_u16(),
                    message: api_error_message(status, &bytes),
                });
            }

            let parsed: GenerateContentResponse = serde_json::from_slice(&bytes)?;
            let text = extract_text(&parsed).ok_or(GenerationError::EmptyResponse)?;
            info!(%model, chars = text.chars().count(), "received response");
            Ok(text)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn extract_text(r: &GenerateContentResponse) -> Option<String> {
    // Concatenate all text parts of the first candidate.
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.trim().is_empty() { None } else { Some(out) }
}

fn api_error_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    if let Ok(env) = serde_json::from_slice::<ErrorEnvelope>(body) {
        return env.error.message;
    }
    let raw = String::from_utf8_lossy(body);
    if raw.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", raw.trim())
    }
}
