use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "threadrun",
    version,
    about = "Relay chat turns to hosted assistants over threads and runs"
)]
pub struct Cli {
    /// Config file (defaults to ~/.threadrun/config.yml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway (the default).
    Serve(ServeArgs),
    /// Send one message and print the assistant's reply.
    Chat(ChatArgs),
    /// Validate configuration and exit.
    Check,
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    #[arg(long, default_value = "cli")]
    pub user: String,

    #[arg(long)]
    pub assistant: Option<String>,

    #[arg(long, requires = "assistant")]
    pub conversation: Option<String>,

    /// Message text.
    #[arg(required = true, num_args = 1..)]
    pub message: Vec<String>,
}
