//! Parley - persistent multi-chat conversations with a language model
//!
#![doc = "Main entry point for the Parley command-line application."]

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parley::chat::ConversationStore;
use parley::cli::{Cli, Commands};
use parley::commands;
use parley::commands::messages::SendArgs;
use parley::completion::OpenAiClient;
use parley::config::Config;
use parley::metrics::init_metrics_exporter;
use parley::orchestrator::CompletionOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.json_logs);
    init_metrics_exporter();

    let config = Config::load(&cli.config, &cli)?;
    config.validate()?;

    if let Commands::Prefs { model, temperature } = &cli.command {
        return commands::prefs::show_preferences(
            &config,
            model.as_deref(),
            temperature.as_deref(),
        );
    }

    let kv = commands::open_store(&config, cli.ephemeral)?;
    let store = ConversationStore::new(kv, &config.chat);

    match cli.command {
        Commands::Chats { command } => {
            commands::chats::handle_chats(&store, command).await?;
        }
        Commands::Append {
            user,
            id,
            role,
            content,
        } => {
            commands::messages::append(&store, &user, &id, &role, &content).await?;
        }
        Commands::Send {
            user,
            id,
            model,
            temperature,
            json,
            content,
        } => {
            let backend = Arc::new(OpenAiClient::new(&config.completion)?);
            let orchestrator = CompletionOrchestrator::new(store, backend, &config.completion);

            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cancelling completion");
                    interrupt.cancel();
                }
            });

            let args = SendArgs {
                user,
                chat_id: id,
                content,
                model,
                temperature,
                json,
            };
            commands::messages::send(&orchestrator, args, &cancel).await?;
        }
        Commands::Prefs { .. } => {}
    }

    Ok(())
}

/// Initialize tracing on stderr so command output on stdout stays clean
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "parley=debug" } else { "parley=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
