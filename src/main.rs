mod app;
mod cli;
mod config;
mod delivery;
mod paths;
mod provider;
mod session;
mod typing;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stderr keeps the typed-out answer on stdout clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = config::Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let settings = app::Settings::resolve(&args, cfg.as_ref());
    tracing::debug!(?settings, "resolved settings");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let client = app::build_client(&http, cfg.as_ref(), &settings.provider, settings.model)?;

    match args.cmd {
        Some(cli::Command::Check) => {
            return app::cmd_check(client.as_ref(), &mut std::io::stdout()).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(&http, cfg.as_ref(), &settings, client).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: gemini-chat \"Hello\" or `gemini-chat tui` (feature flag)");
    }

    app::cmd_prompt(client, settings.pacing, &prompt, &mut std::io::stdout()).await
}
