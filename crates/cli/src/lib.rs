pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use custody_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "custody",
    about = "Custody approval workflow CLI",
    long_about = "Inspect approval configuration and rule providers, and replay scripted approval flows.",
    after_help = "Examples:\n  custody config\n  custody rules\n  custody --config config/custody.toml run demos/universal_flow.toml"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a custody.toml file (defaults to ./custody.toml or ./config/custody.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "List registered rule providers per family in consultation order")]
    Rules,
    #[command(about = "Replay a scripted approval flow against an in-memory store")]
    Run {
        #[arg(help = "TOML script with [[steps]] entries")]
        script: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let options = LoadOptions { config_path: cli.config.clone(), ..LoadOptions::default() };
    if let Ok(config) = AppConfig::load(options) {
        init_logging(&config);
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Command::Config => commands::config::run(config_path),
        Command::Rules => commands::rules::run(config_path),
        Command::Run { script } => commands::run::run(config_path, &script),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

// Logs go to stderr; stdout carries the JSON command output.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}
