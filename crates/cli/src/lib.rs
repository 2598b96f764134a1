pub mod bootstrap;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pgchat_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pgchat",
    about = "Ask questions about a PostgreSQL database in plain language",
    long_about = "Chat with a PostgreSQL database: questions are turned into read-only SQL, \
                  executed, and answered in plain language.",
    after_help = "Examples:\n  pgchat\n  pgchat --config ./pgchat.toml chat\n  \
                  pgchat doctor --json\n  pgchat config"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a TOML config file (default: ./pgchat.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive session (default)")]
    Chat,
    #[command(about = "Validate config, database connectivity and schema access")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => commands::chat::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Config => commands::config::run(options),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so the conversation on
/// stdout stays readable; `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(error) = result {
        eprintln!("logging already initialized: {error}");
    }
}
