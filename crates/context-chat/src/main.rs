//! # Context Chat CLI (`ctx-chat`)
//!
//! ## Usage
//!
//! ```bash
//! ctx-chat --config ./config/chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctx-chat serve` | Start the chat HTTP server |
//! | `ctx-chat chat [--session <id>]` | Interactive chat through the client controller |
//! | `ctx-chat history <session>` | Print a session's stored turns |
//!
//! A missing config file is not an error: every setting has a default and
//! the environment overrides in [`context_chat::config`] still apply.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use context_chat::config::{self, Config};
use context_chat::controller::{ChatController, ControllerError, HttpPrimary, Route};
use context_chat::gemini::GeminiClient;
use context_chat::server;
use context_chat_core::generation::Generator;

/// Retrieval-augmented chat with per-session history.
#[derive(Parser)]
#[command(
    name = "ctx-chat",
    about = "Context Chat: retrieval-augmented chat server and client",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chat.toml")]
    config: PathBuf,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat HTTP server.
    ///
    /// Binds to `[server].bind` and connects the configured session store,
    /// vector index, embedder, and generation model.
    Serve,

    /// Chat interactively from the terminal.
    ///
    /// Messages go to `[client].server_url` first; when the server cannot
    /// answer, the model is called directly with the last few exchanges.
    /// Type `/regen` to regenerate the last answer, `/quit` to exit.
    Chat {
        /// Session id. A fresh random id is used when omitted.
        #[arg(long)]
        session: Option<String>,
    },

    /// Print the stored history of a session from the server.
    History {
        /// Session id.
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Chat { session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            run_chat(&cfg, session).await?;
        }
        Commands::History { session } => {
            let primary = HttpPrimary::from_config(&cfg.client)?;
            let turns = primary
                .history(&session)
                .await
                .with_context(|| format!("Failed to fetch history for {}", session))?;
            if turns.is_empty() {
                println!("(no history for {})", session);
            }
            for turn in turns {
                println!("{}: {}", turn.role.as_str(), turn.text);
            }
        }
    }

    Ok(())
}

/// The fallback model client. Without an API key the client is still built
/// so the primary route keeps working; fallback calls then fail upstream.
fn fallback_generator(cfg: &Config) -> anyhow::Result<Arc<dyn Generator>> {
    let client = match GeminiClient::from_config(&cfg.generation) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("fallback generation has no credentials: {}", e);
            GeminiClient::new(
                &cfg.generation.base_url,
                &cfg.generation.model,
                None,
                Duration::from_secs(cfg.generation.timeout_secs),
            )?
        }
    };
    Ok(Arc::new(client))
}

async fn run_chat(cfg: &Config, session: String) -> anyhow::Result<()> {
    let primary = Arc::new(HttpPrimary::from_config(&cfg.client)?);
    let controller = ChatController::new(session, primary, fallback_generator(cfg)?)
        .with_max_exchanges(cfg.client.max_exchanges);

    println!("session {}", controller.session_id());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let result = match line.trim() {
            "" => continue,
            "/quit" => break,
            "/regen" => controller.regenerate().await,
            message => controller.submit(message).await,
        };

        match result {
            Ok(reply) => {
                if reply.route == Route::Fallback {
                    println!("[direct]");
                }
                println!("{}\n", reply.text);
            }
            Err(ControllerError::FallbackFailed { primary, fallback }) => {
                tracing::debug!("primary route error: {}", primary);
                eprintln!("error: {}", fallback);
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    Ok(())
}
