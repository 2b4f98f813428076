use crate::provider::{self, ModelVariant, ResponseClient};
use crate::session::{ChatSession, SendOutcome, SessionEvent, APOLOGY};
use crate::typing::{Pacing, TypingScheduler};
use crate::{cli, config};
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;

/// Settings after layering CLI flags over the config file over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: String,
    pub model: ModelVariant,
    pub pacing: Pacing,
}

impl Settings {
    pub fn resolve(args: &cli::Args, cfg: Option<&config::Config>) -> Self {
        let provider = args
            .provider
            .clone()
            .or_else(|| cfg.and_then(|c| c.provider.clone()))
            .unwrap_or_else(|| "google".to_string());

        let model = args
            .model
            .or_else(|| cfg.and_then(|c| c.model))
            .unwrap_or_default();

        let pacing = if args.no_animate {
            Pacing::instant()
        } else {
            cfg.map(|c| c.typing.pacing()).unwrap_or_default()
        };

        Self {
            provider,
            model,
            pacing,
        }
    }
}

pub fn build_client(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    provider_name: &str,
    model: ModelVariant,
) -> anyhow::Result<Arc<dyn ResponseClient>> {
    match provider_name {
        "google" => {
            #[cfg(feature = "google")]
            {
                use provider::google::{GoogleAuth, GoogleClient};

                let api_key = std::env::var("GEMINI_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| cfg.and_then(|c| c.google.api_key.clone()));

                let auth = match api_key {
                    Some(key) => GoogleAuth::ApiKey(key),
                    None => match std::env::var("GEMINI_ACCESS_TOKEN") {
                        Ok(tok) if !tok.trim().is_empty() => GoogleAuth::BearerToken(tok),
                        _ => anyhow::bail!(
                            "No API key found. Set GEMINI_API_KEY (or GEMINI_ACCESS_TOKEN), or add google.api_key to config.toml"
                        ),
                    },
                };

                let client = match cfg.and_then(|c| c.google.api_base.as_deref()) {
                    Some(base) => GoogleClient::with_api_base(http.clone(), auth, model, base)?,
                    None => GoogleClient::new(http.clone(), auth, model)?,
                };
                Ok(Arc::new(client))
            }
            #[cfg(not(feature = "google"))]
            {
                let _ = http;
                let _ = cfg;
                let _ = model;
                anyhow::bail!("google provider is not enabled in this build")
            }
        }
        "echo" => Ok(Arc::new(provider::echo::EchoClient::new(model))),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}

/// Probe the credential with a throwaway prompt.
pub async fn cmd_check(client: &dyn ResponseClient, out: &mut dyn Write) -> anyhow::Result<()> {
    #[cfg(feature = "google")]
    let probe = provider::google::KEY_PROBE_PROMPT;
    #[cfg(not(feature = "google"))]
    let probe = "Hello, this is a test message to validate the API key.";

    match client.generate(probe.to_string()).await {
        Ok(_) => {
            writeln!(out, "OK: {} accepted the credential (model {})", client.name(), client.model())?;
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e)).context("credential check failed"),
    }
}

/// One-shot mode: send `prompt`, type the answer out to `out`.
pub async fn cmd_prompt(
    client: Arc<dyn ResponseClient>,
    pacing: Pacing,
    prompt: &str,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let session = ChatSession::new(client, TypingScheduler::new(pacing));
    let mut events = session.subscribe();

    match session.send_message(prompt).await {
        SendOutcome::Started | SendOutcome::Queued => {}
        SendOutcome::Failed => {
            writeln!(out, "{APOLOGY}")?;
            let err = session.error().unwrap_or_default();
            anyhow::bail!(err);
        }
        SendOutcome::Ignored | SendOutcome::Discarded => return Ok(()),
    }

    let mut printed = 0;
    while let Some(ev) = events.recv().await {
        match ev {
            SessionEvent::ContentUpdated { id, len } if len > printed => {
                let Some(content) = session.content_of(id) else {
                    continue;
                };
                let end = len.min(content.len());
                out.write_all(content[printed..end].as_bytes())?;
                out.flush().ok();
                printed = end;
            }
            SessionEvent::Typing(false) => break,
            _ => {}
        }
    }
    writeln!(out)?;

    Ok(())
}
