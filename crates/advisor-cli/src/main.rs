//! Advisor - Command line front end for the installment advisor
//!
//! Runs the orchestrator against the configured engine:
//! - `chat` for an interactive conversation
//! - `ask` for a single turn
//! - `agent` to inspect or delete agent definitions
//! - `history` to read persisted conversations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use advisor_core::engine::HttpEngine;
use advisor_core::lifecycle::LifecycleManager;
use advisor_core::{
    paths, AdvisorConfig, AgentService, ConversationService, InboundTurn, OutboundActivity,
    SqliteHistoryStore, ToolCallRecord,
};

/// Advisor - energy installment assistant
#[derive(Parser)]
#[command(name = "advisor")]
#[command(about = "Multi-agent installment advisor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.advisor/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation
    Chat {
        /// Resume an existing engine thread
        #[arg(long)]
        thread: Option<String>,

        /// Print the capability calls made for each reply
        #[arg(long)]
        show_calls: bool,
    },

    /// Ask a single question
    Ask {
        text: String,

        /// Continue an existing engine thread
        #[arg(long)]
        thread: Option<String>,

        /// Print the full outbound activity as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or delete agent definitions
    Agent {
        #[command(subcommand)]
        action: AgentCommands,
    },

    /// Show stored history for a thread, or list recent threads
    History { thread: Option<String> },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// Show an agent definition
    Show { id: String },
    /// Delete an agent definition
    Delete { id: String },
}

fn init_logging() {
    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false);

    // Logs go to a file so they never interleave with the conversation
    match std::fs::File::create(log_dir.join("advisor.log")) {
        Ok(log_file) => builder.with_writer(std::sync::Mutex::new(log_file)).init(),
        Err(_) => builder.with_writer(std::io::sink).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = AdvisorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat { thread, show_calls } => chat(&config, thread, show_calls).await,
        Commands::Ask { text, thread, json } => ask(&config, text, thread, json).await,
        Commands::Agent { action } => agent(&config, action).await,
        Commands::History { thread } => history(&config, thread).await,
    }
}

async fn start_service(config: &AdvisorConfig) -> Result<ConversationService> {
    let service = AgentService::from_config(config)
        .await
        .context("Failed to start agents")?;
    tracing::info!(
        orchestrator = service.orchestrator().agent().id(),
        "Advisor ready"
    );
    Ok(ConversationService::new(service.orchestrator().clone()))
}

/// Run one turn, cancelling it on Ctrl-C
async fn run_turn(conversations: &ConversationService, turn: InboundTurn) -> OutboundActivity {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    let activity = conversations.handle_turn(turn, &cancel).await;
    watcher.abort();
    activity
}

fn print_calls(calls: &[ToolCallRecord]) {
    for call in calls {
        let params: Vec<String> = call
            .parameters
            .iter()
            .map(|p| format!("{}={}", p.key, p.value))
            .collect();
        println!(
            "  ↳ {}.{}({}) -> {}",
            call.group_name,
            call.function_name,
            params.join(", "),
            call.response.as_deref().unwrap_or("-")
        );
    }
}

async fn chat(config: &AdvisorConfig, thread: Option<String>, show_calls: bool) -> Result<()> {
    let conversations = start_service(config).await?;
    let conversation_id = uuid::Uuid::new_v4().to_string();
    let mut thread_id = thread;

    println!(
        "Advisor ready. Type your question, or '{}' to finish.",
        config.conversation.end_token
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::Write::flush(&mut std::io::stdout()).ok();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            // stdin closed or interrupted: end the conversation as if the client left
            println!();
            conversations.end_conversation(&conversation_id).await;
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let activity = run_turn(
            &conversations,
            InboundTurn {
                conversation_id: conversation_id.clone(),
                text: text.to_string(),
                thread_id: thread_id.take(),
            },
        )
        .await;

        println!("{}", activity.reply_text);
        if show_calls {
            print_calls(&activity.tool_calls);
        }
        if activity.end_of_conversation {
            if let Some(thread) = &activity.thread_id {
                tracing::info!(thread = %thread, code = ?activity.code, "Conversation over");
            }
            break;
        }
    }
    Ok(())
}

async fn ask(config: &AdvisorConfig, text: String, thread: Option<String>, json: bool) -> Result<()> {
    let conversations = start_service(config).await?;
    let activity = run_turn(
        &conversations,
        InboundTurn {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            text,
            thread_id: thread,
        },
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&activity)?);
        return Ok(());
    }
    println!("{}", activity.reply_text);
    print_calls(&activity.tool_calls);
    if let Some(thread) = &activity.thread_id {
        if !activity.end_of_conversation {
            println!("\nthread: {}", thread);
        }
    }
    if activity.end_of_conversation && activity.code == Some(advisor_core::EndOfConversationCode::Error) {
        anyhow::bail!("turn failed");
    }
    Ok(())
}

async fn agent(config: &AdvisorConfig, action: AgentCommands) -> Result<()> {
    config.validate()?;
    let engine = Arc::new(HttpEngine::new(
        config.engine.settings(),
        config.engine_credential()?.to_string(),
    ));
    let lifecycle = LifecycleManager::new(engine);

    match action {
        AgentCommands::Show { id } => {
            let agent = lifecycle.get(&id, None).await?;
            println!("{}", serde_json::to_string_pretty(agent.definition())?);
        }
        AgentCommands::Delete { id } => {
            if lifecycle.delete(Some(&id)).await? {
                println!("Deleted {}", id);
            } else {
                println!("No agent {} to delete", id);
            }
        }
    }
    Ok(())
}

async fn history(config: &AdvisorConfig, thread: Option<String>) -> Result<()> {
    use advisor_core::HistoryStore;

    let path = config.history.resolved_path();
    let store = SqliteHistoryStore::open(&path)
        .with_context(|| format!("Failed to open history at {}", path.display()))?;

    let Some(thread) = thread else {
        let threads = store.list_threads(20)?;
        if threads.is_empty() {
            println!("No stored conversations.");
        }
        for summary in threads {
            println!(
                "{}  {} messages  last {}",
                summary.id,
                summary.message_count,
                summary.updated_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    };

    let messages = store.load(&thread).await?;
    if messages.is_empty() {
        println!("No history for thread {}", thread);
    }
    for message in messages {
        println!(
            "[{}] {}: {}",
            message.created_at.format("%H:%M:%S"),
            message.role.as_str(),
            message.content
        );
        print_calls(&message.tool_calls);
    }
    Ok(())
}
