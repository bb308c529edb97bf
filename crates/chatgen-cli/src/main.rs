//! Chatgen CLI
//!
//! Maintenance and manual retry front-end for the chatgen command store

mod logging;

use anyhow::{anyhow, Context, Result};
use chatgen_config::Config;
use chatgen_core::{
    build_engine, build_provider_order, build_provider_registry, describe_steps,
    retry_tool_definition, ChatContext, CommandStore, Language, Messenger, RetryArgs,
};
use chatgen_providers::TaskKind;
use chatgen_storage::{CommandMetadata, PlanStep, Storage, MULTI_STEP_TOOL};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

const DB_FILE: &str = "chatgen.db";
const MAX_TTL_DAYS: u64 = 36_500;

#[derive(Parser)]
#[command(name = "chatgen")]
#[command(about = "Command retry engine with provider fallback", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Provider commands
    Providers {
        #[command(subcommand)]
        action: ProviderCommands,
    },

    /// Stored command maintenance
    Commands {
        #[command(subcommand)]
        action: CommandCommands,
    },

    /// Retry the last command of a chat
    Retry {
        /// Chat id
        chat: String,
        /// Provider to use instead of the original one
        #[arg(short, long)]
        provider: Option<String>,
        /// Text appended to the original request
        #[arg(short, long)]
        modifications: Option<String>,
        /// Step number to retry (repeatable, 1-based)
        #[arg(long = "step")]
        steps: Vec<usize>,
        /// Tool name fragment selecting steps (repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,
        /// Reply language (defaults to chat.language)
        #[arg(long)]
        language: Option<String>,
    },

    /// Log file commands
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate configuration, providers and fallback orders
    Check,
    /// Print the retry tool definition exposed to the agent
    Tool,
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// Show the effective fallback order per task
    Order,
    /// List configured providers
    List,
}

#[derive(Subcommand)]
enum CommandCommands {
    /// Show the last stored command of a chat
    Last { chat: String },
    /// Store a command by hand
    Record {
        chat: String,
        /// Tool name, or multi_step with --plan
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Multi-step plan as a JSON array of {tool, action, parameters}
        #[arg(long)]
        plan: Option<String>,
        /// Original natural-language request
        #[arg(long)]
        prompt: Option<String>,
        /// Message id (random when omitted)
        #[arg(long)]
        message_id: Option<String>,
        /// Mark the command as failed
        #[arg(long)]
        failed: bool,
    },
    /// Delete commands older than the TTL
    Cleanup {
        /// TTL in days (defaults to retry.command_ttl_days)
        #[arg(long)]
        ttl_days: Option<u64>,
    },
    /// Delete every stored command
    Clear {
        /// Skip the safety check
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Remove logs older than N days
    Clean {
        #[arg(short, long, default_value_t = logging::LOG_RETENTION_DAYS)]
        days: u64,
    },
}

/// Prints acks to stdout in place of a chat transport.
struct StdoutMessenger;

#[async_trait::async_trait]
impl Messenger for StdoutMessenger {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        _quoted_message_id: Option<&str>,
        _typing_delay_ms: Option<u64>,
    ) -> Result<()> {
        println!("[{}] {}", chat_id, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    let data_dir = config.data_dir();
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    let log_dir = data_dir.join("logs");
    let log_level = config
        .core
        .log_level
        .clone()
        .filter(|_| cli.log_level == "info")
        .unwrap_or_else(|| cli.log_level.clone());
    let _logging_guard = logging::init_logging(&log_dir, &log_level)?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigCommands::Check => {
                build_provider_registry(&config.providers)?;
                build_provider_order(&config.providers)?;
                println!("Configuration is valid.");
                println!("Data dir: {}", data_dir.display());
            }
            ConfigCommands::Tool => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&retry_tool_definition())?
                );
            }
        },

        Commands::Providers { action } => match action {
            ProviderCommands::Order => {
                let order = build_provider_order(&config.providers)?;
                for task in [
                    TaskKind::Image,
                    TaskKind::Video,
                    TaskKind::Audio,
                    TaskKind::ImageEdit,
                ] {
                    let names: Vec<&str> =
                        order.for_task(task).iter().map(|p| p.as_str()).collect();
                    println!("{:<10} {}", task.as_str(), names.join(" -> "));
                }
            }
            ProviderCommands::List => {
                let registry = build_provider_registry(&config.providers)?;
                if registry.is_empty() {
                    println!("No providers configured.");
                }
                for id in registry.ids() {
                    let Some(provider) = registry.get(id) else {
                        continue;
                    };
                    let tasks: Vec<String> = id
                        .capabilities()
                        .iter()
                        .filter(|t| provider.supports(**t))
                        .map(|t| t.to_string())
                        .collect();
                    println!("{:<12} {}", id.display_name(), tasks.join(", "));
                }
            }
        },

        Commands::Commands { action } => {
            let store = open_store(&data_dir)?;
            match action {
                CommandCommands::Last { chat } => match store.get_last(&chat).await? {
                    Some(command) => print_command(&command.metadata, command.timestamp)?,
                    None => println!("No stored command for chat {}", chat),
                },
                CommandCommands::Record {
                    chat,
                    tool,
                    args,
                    plan,
                    prompt,
                    message_id,
                    failed,
                } => {
                    let metadata = record_metadata(&tool, &args, plan.as_deref(), prompt, failed)?;
                    let message_id =
                        message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    store.save(&chat, &message_id, &metadata).await;
                    println!("Recorded {} for chat {} ({})", tool, chat, message_id);
                }
                CommandCommands::Cleanup { ttl_days } => {
                    let days = ttl_days.unwrap_or(config.retry.command_ttl_days);
                    let ttl = chrono::Duration::days(days.min(MAX_TTL_DAYS) as i64);
                    let deleted = store.cleanup(ttl).await;
                    println!("Deleted {} command(s) older than {} day(s)", deleted, days);
                }
                CommandCommands::Clear { yes } => {
                    if !yes {
                        anyhow::bail!("Refusing to clear all commands without --yes");
                    }
                    let deleted = store.clear_all().await;
                    println!("Deleted {} command(s)", deleted);
                }
            }
        }

        Commands::Retry {
            chat,
            provider,
            modifications,
            steps,
            tools,
            language,
        } => {
            let language = language
                .as_deref()
                .unwrap_or(&config.chat.language)
                .parse::<Language>()
                .map_err(|e| anyhow!(e))?;
            let storage = Arc::new(Mutex::new(Storage::new(data_dir.join(DB_FILE))?));
            let engine = build_engine(&config, storage, Arc::new(StdoutMessenger))?;

            let ttl = chrono::Duration::days(config.retry.command_ttl_days.min(MAX_TTL_DAYS) as i64);
            engine.store().cleanup(ttl).await;

            let ctx = ChatContext::new(chat, language)
                .with_message_id(format!("cli-{}", uuid::Uuid::new_v4()));
            let args = RetryArgs {
                provider_override: provider,
                modifications,
                step_numbers: steps,
                step_tools: tools,
            };
            info!(chat_id = %ctx.chat_id, "Manual retry from CLI");
            let response = engine.retry_last_command(&ctx, args).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                anyhow::bail!("Retry did not succeed");
            }
        }

        Commands::Logs { action } => {
            let manager = logging::LogManager::new(log_dir);
            match action {
                LogCommands::List => {
                    for file in manager.log_files()? {
                        let size = fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
                        println!(
                            "  {} ({})",
                            file.display(),
                            logging::LogManager::format_size(size)
                        );
                    }
                }
                LogCommands::Clean { days } => {
                    let deleted = manager.cleanup_old_logs(days)?;
                    println!("Cleaned {} old log file(s)", deleted);
                }
            }
        }
    }

    Ok(())
}

/// Explicit path must exist; the default path is optional.
fn load_config(config_path: Option<String>) -> Result<Config> {
    if let Some(path) = config_path {
        return Config::load(&path).with_context(|| format!("Failed to load {}", path));
    }
    match Config::default_path() {
        Some(path) if path.exists() => {
            Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))
        }
        _ => {
            eprintln!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn open_store(data_dir: &std::path::Path) -> Result<CommandStore> {
    let db_path: PathBuf = data_dir.join(DB_FILE);
    let storage = Storage::new(&db_path)
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    Ok(CommandStore::new(Arc::new(Mutex::new(storage))))
}

fn record_metadata(
    tool: &str,
    args: &str,
    plan: Option<&str>,
    prompt: Option<String>,
    failed: bool,
) -> Result<CommandMetadata> {
    let tool_args: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !tool_args.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }
    let plan: Option<Vec<PlanStep>> = match plan {
        Some(raw) => Some(serde_json::from_str(raw).context("--plan must be a JSON array")?),
        None => None,
    };
    if tool == MULTI_STEP_TOOL && plan.as_ref().map_or(true, |p| p.is_empty()) {
        warn!("Recording {} without a plan; retries will fail", MULTI_STEP_TOOL);
    }

    Ok(CommandMetadata {
        tool: tool.to_string(),
        tool_args,
        is_multi_step: plan.is_some() || tool == MULTI_STEP_TOOL,
        plan,
        prompt,
        result: None,
        failed,
    })
}

fn print_command(
    metadata: &CommandMetadata,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let local: chrono::DateTime<chrono::Local> = timestamp.into();
    println!("Tool:      {}", metadata.tool);
    println!("Stored:    {}", local.format("%Y-%m-%d %H:%M:%S"));
    println!("Failed:    {}", metadata.failed);
    if let Some(prompt) = &metadata.prompt {
        println!("Prompt:    {}", prompt);
    }
    println!("Args:      {}", serde_json::to_string(&metadata.tool_args)?);
    if let Some(plan) = &metadata.plan {
        println!("Plan:");
        for line in describe_steps(plan) {
            println!("  {}", line);
        }
    }
    if let Some(result) = &metadata.result {
        println!("Result:    {}", serde_json::to_string(result)?);
    }
    Ok(())
}
