//! Command-line interface parsing and handling
//!
//! Parses arguments, sets up diagnostics, loads settings and dispatches to
//! the subcommand handlers.

pub mod chat;
pub mod connect;
pub mod model_list;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::core::config::{Settings, DEFAULT_SERVER_URL};

/// Overrides the `-v` derived filter, e.g. `LMCHAT_LOG=lmchat=trace`.
pub const LOG_FILTER_ENV: &str = "LMCHAT_LOG";

#[derive(Parser, Debug)]
#[command(name = "lmchat", version)]
#[command(about = "Chat with an OpenAI-compatible server from the terminal")]
#[command(
    long_about = "lmchat talks to any OpenAI-compatible chat-completion server (LM Studio, \
llama.cpp, vLLM, tunnelled or webhook endpoints) and prints replies as they stream in.\n\n\
Environment Variables:\n\
  LMCHAT_BASE_URL   Server address for this run (default http://localhost:1234/v1)\n\
  LMCHAT_API_KEY    Bearer token for this run\n\
  LMCHAT_MODEL      Model id for this run\n\
  LMCHAT_LOG        Diagnostic filter, overrides -v\n\n\
Chat commands:\n\
  /resend           Take back the last exchange and edit it\n\
  /clear            Start over with an empty conversation\n\
  /usage            Show token usage of the last reply\n\
  /model <id>       Switch model\n\
  /quit             Leave\n\
  Ctrl+C            Stop the reply that is streaming"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for this run instead of the saved one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Append the conversation to this file
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Print diagnostics to stderr (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Send one prompt and print the streamed reply
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List the models the server offers
    Models {
        /// Only show models whose id contains this text (case-insensitive)
        #[arg(short = 's', long)]
        search: Option<String>,
    },
    /// Test a server address and save it when reachable
    Connect {
        /// Server address; `/v1` is appended when missing
        url: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key, e.g. temperature or system-prompt
        key: String,
        /// Value to set (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Show the current configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

/// Route `tracing` output to stderr so it never mixes with streamed replies.
pub fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(verbosity_directive(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn verbosity_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let stored = Settings::load()?;
    let settings = effective_settings(&stored, args.model.as_deref());

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            if !stored.server_configured && settings.base_url.trim().is_empty() {
                println!(
                    "ℹ️  No server configured; using {DEFAULT_SERVER_URL}. Run 'lmchat connect <url>' to change it."
                );
            }
            chat::run_chat(settings, args.log).await
        }
        Commands::Say { prompt } => say::run_say(&settings, &prompt.join(" ")).await,
        Commands::Models { search } => {
            model_list::list_models(&settings, search.as_deref().unwrap_or("")).await
        }
        Commands::Connect { url } => connect::connect(&stored, &settings.api_key, &url).await,
        Commands::Set { key, value } => set_value(stored, &key, &value.join(" ")),
        Commands::Config => {
            settings.print_all();
            Ok(())
        }
    }
}

/// Saved settings with this run's environment and `--model` overrides applied.
/// The result is never saved.
fn effective_settings(stored: &Settings, model: Option<&str>) -> Settings {
    let mut settings = stored.clone();
    settings.apply_env_overrides();
    if let Some(model) = model.map(str::trim).filter(|model| !model.is_empty()) {
        settings.selected_model = model.to_string();
    }
    settings
}

fn set_value(mut settings: Settings, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
    settings.set_value(key, value)?;
    settings.save()?;
    let shown = settings
        .format_value(key)
        .unwrap_or_else(|| value.to_string());
    println!("✅ Set {key} to: {shown}");
    Ok(())
}
