mod cli;

use anyhow::Context;
use clap::Parser;
use threadrun_agents::ToolRegistry;
use threadrun_common::ConversationKey;
use threadrun_config::{AppConfig, ConfigLoader, LogFormat};
use threadrun_gateway::{AppState, GatewayServer};
use threadrun_security::RedactingWriter;
use tracing_subscriber::EnvFilter;

use crate::cli::{ChatArgs, Cli, Command, ServeArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal; real environment variables still apply.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }

    match cli.command {
        None => serve(config, ServeArgs::default()).await,
        Some(Command::Serve(args)) => serve(config, args).await,
        Some(Command::Chat(args)) => chat(config, args).await,
        Some(Command::Check) => check(&config),
    }
}

fn init_tracing(config: &AppConfig, fallback_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn serve(mut config: AppConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(host) = args.host {
        config.gateway.host = host;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    let level = config.logging.level.clone();
    init_tracing(&config, &level);

    let server = GatewayServer::new(config, ToolRegistry::with_builtins())
        .context("failed to start gateway")?;
    server.run().await.context("gateway stopped with an error")
}

async fn chat(config: AppConfig, args: ChatArgs) -> anyhow::Result<()> {
    // keep stdout for the reply
    init_tracing(&config, "warn");

    let key = ConversationKey::from_parts(
        &args.user,
        args.assistant.as_deref(),
        args.conversation.as_deref(),
    )?;
    let state = AppState::from_config(config, ToolRegistry::with_builtins())
        .context("invalid configuration")?;

    let reply = state
        .orchestrator
        .converse(&key, &args.message.join(" "))
        .await
        .with_context(|| format!("turn for {key} failed"))?;
    println!("{reply}");
    Ok(())
}

fn check(config: &AppConfig) -> anyhow::Result<()> {
    config.validate().context("configuration is not usable")?;

    let assistant = &config.assistant;
    println!("config ok");
    println!(
        "  assistant:  {}",
        assistant.assistant_id.as_deref().unwrap_or_default()
    );
    println!(
        "  api base:   {}",
        assistant
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    );
    println!(
        "  listen:     {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "  polling:    every {}ms, give up after {}s",
        config.polling.interval_ms, config.polling.timeout_secs
    );
    match &config.storage.sqlite_path {
        Some(path) => println!("  threads:    {}", path.display()),
        None => println!("  threads:    in memory"),
    }
    Ok(())
}
