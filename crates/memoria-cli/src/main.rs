//! # memoria
//!
//! Operator CLI: replay a JSONL turn log into a conversation and inspect
//! the assembled context, action predictions, or stored summaries.

#![deny(unsafe_code)]

mod replay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use memoria_context::render_context;
use memoria_core::{ConversationId, TopicQuery};
use memoria_runtime::MemoryService;
use memoria_settings::{MemoriaSettings, StoreBackend};
use serde::Serialize;
use tracing::info;

/// Memoria operator CLI.
#[derive(Parser, Debug)]
#[command(name = "memoria", about = "Bounded conversational memory")]
struct Cli {
    /// Settings file (defaults to `~/.memoria/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Summary database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Keep summaries in memory only.
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a turn log and print what the conversation looks like after.
    Replay {
        /// JSONL turn log.
        file: PathBuf,
        /// Conversation to replay into.
        #[arg(long, default_value = "replay")]
        conversation: String,
        /// What to print.
        #[arg(long, value_enum, default_value_t = View::Context)]
        show: View,
        /// Context query (defaults to the latest user turn).
        #[arg(long)]
        query: Option<String>,
        /// Context token allowance (defaults to the generation setting).
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// Search stored summaries of a conversation.
    Search {
        /// Conversation to search.
        #[arg(long)]
        conversation: String,
        /// Free-text query.
        query: String,
        /// Maximum results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Replay this log first.
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Topics that co-occurred with a topic in stored summaries.
    Related {
        /// Topic.
        topic: String,
        /// Maximum results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete every stored summary of a conversation.
    Forget {
        /// Conversation to forget.
        conversation: String,
    },
    /// Print the effective settings.
    Settings,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum View {
    /// Rendered context, as sent to the generation service.
    Context,
    /// Ranked next actions.
    Predict,
    /// Window state.
    Window,
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<MemoriaSettings> {
    let path = cli.settings.clone().unwrap_or_else(memoria_settings::settings_path);
    let mut settings = memoria_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Some(db_path) = &cli.db_path {
        settings.store.db_path = Some(db_path.display().to_string());
    }
    if cli.ephemeral {
        settings.store.backend = StoreBackend::Memory;
    }
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    Ok(settings)
}

fn build_service(settings: MemoriaSettings) -> Result<MemoryService> {
    let default_path = memoria_settings::default_db_path();
    if settings.store.backend == StoreBackend::Sqlite {
        let path = settings
            .store
            .db_path
            .as_deref()
            .filter(|p| *p != ":memory:")
            .map_or_else(|| default_path.clone(), PathBuf::from);
        ensure_parent_dir(&path)?;
    }
    let store = memoria_store::open_store(&settings.store, default_path)
        .context("failed to open summary store")?;
    MemoryService::new(settings, store).context("failed to build memory service")
}

async fn replay_into(service: &MemoryService, conversation: &ConversationId, file: &Path) -> Result<()> {
    let turns = replay::read_turns(file)?;
    let count = turns.len();
    let mut evicted = 0;
    for turn in turns {
        let outcome = service.submit(conversation, turn).await?;
        evicted += outcome.evicted.len();
        if let Some(degraded) = outcome.degraded {
            tracing::warn!(%degraded, "window degraded during replay");
        }
    }
    info!(conversation_id = %conversation, turns = count, evicted, "replay finished");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    if settings.logging.json {
        memoria_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        memoria_core::logging::init_subscriber(&settings.logging.level);
    }

    if matches!(cli.command, Command::Settings) {
        return print_json(&settings);
    }

    let context_tokens = settings.generation.context_tokens;
    let service = Arc::new(build_service(settings)?);

    match cli.command {
        Command::Replay {
            file,
            conversation,
            show,
            query,
            max_tokens,
        } => {
            let id = ConversationId::from(conversation.as_str());
            replay_into(&service, &id, &file).await?;
            match show {
                View::Context => {
                    let max_tokens = max_tokens.unwrap_or(context_tokens);
                    let context = match query {
                        Some(q) => {
                            service
                                .get_context_for(&id, &TopicQuery::from_text(&q), max_tokens)
                                .await?
                        }
                        None => service.get_context(&id, max_tokens).await?,
                    };
                    println!("{}", render_context(&context));
                }
                View::Predict => {
                    let snapshot = service.snapshot(&id).await?;
                    print_json(&service.predict(&id, &snapshot)?)?;
                }
                View::Window => print_json(&service.window_snapshot(&id).await?)?,
            }
        }
        Command::Search {
            conversation,
            query,
            limit,
            replay,
        } => {
            let id = ConversationId::from(conversation.as_str());
            let _ = service.open(&id).await?;
            if let Some(file) = replay {
                replay_into(&service, &id, &file).await?;
            }
            let hits = service
                .search(&id, &TopicQuery::from_text(&query))
                .await?
                .first(limit)
                .await?;
            print_json(&hits)?;
        }
        Command::Related { topic, limit } => {
            print_json(&service.related_topics(&topic.to_lowercase(), limit).await?)?;
        }
        Command::Forget { conversation } => {
            let removed = service
                .forget(&ConversationId::from(conversation.as_str()))
                .await?;
            println!("removed {removed} summaries");
        }
        Command::Settings => {}
    }

    service.shutdown();
    Ok(())
}
