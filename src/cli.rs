use clap::{Parser, Subcommand};

use crate::provider::ModelVariant;

/// Chat with Gemini from the terminal; answers are typed out as they "arrive".
#[derive(Debug, Parser)]
#[command(name = "gemini-chat")]
#[command(version)]
#[command(about = "Gemini chat client with typed-out answers", long_about = None)]
pub struct Args {
    /// Model variant: gemini-1.5-flash or gemini-2.0-flash
    #[arg(short = 'm', long = "model")]
    pub model: Option<ModelVariant>,

    /// Provider (default: config/provider or "google"; "echo" works offline)
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Print answers at once instead of typing them out
    #[arg(long = "no-animate")]
    pub no_animate: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a probe request to check that the configured credential is accepted
    Check,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
