//! Easel CLI - run the render bot and manage its configuration.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use easel::image::{EngineClient, ImageBackend};
use easel_bot::error::{BotError, DisplayError, ErrorContext, Result};
use easel_bot::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Easel - chat-driven Stable Diffusion renders with live progress
#[derive(Parser)]
#[command(name = "easel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "EASEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Start the bot
    Run(RunArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// List the models the image engine offers
    Models,
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the run command
#[derive(Args)]
struct RunArgs {
    /// Use the terminal gateway even when Telegram is enabled
    #[arg(long)]
    cli: bool,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "easel_bot={level},easel={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let path = cli.config.unwrap_or_else(config_path);
    match cli.command {
        Commands::Init(args) => cmd_init(args, path).await,
        Commands::Run(args) => cmd_run(args, path).await,
        Commands::Config(args) => cmd_config(args, path).await,
        Commands::Models => cmd_models(path).await,
    }
}

/// Write the default configuration.
async fn cmd_init(args: InitArgs, path: PathBuf) -> Result<()> {
    if path.exists() && !args.force {
        println!("Configuration already exists at: {}", path.display());
        println!("Use --force to overwrite.");
        return Ok(());
    }

    init_config(&path)
        .await
        .context("failed to initialize config")?;

    println!("Configuration created: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. set engine.url to your Stable Diffusion UI server");
    println!("  2. export TELEGRAM_BOT_TOKEN=<token> (or run with --cli)");
    println!("  3. easel run");

    Ok(())
}

/// Start the bot.
async fn cmd_run(args: RunArgs, path: PathBuf) -> Result<()> {
    tracing::info!(config = %path.display(), "Starting easel...");

    let store = ConfigStore::open(path).await?;
    let config = store.snapshot();
    let issues = config.validate();
    for issue in &issues {
        tracing::warn!("{issue}");
    }
    if issues.iter().any(|i| i.level == IssueLevel::Error) {
        return Err(BotError::config(
            "configuration has errors, see `easel config validate`",
        ));
    }

    let bot = Bot::from_config(store)?;
    let gateway = select_gateway(&config, args.cli);

    println!("Bot running. Press Ctrl+C to stop.\n");

    bot.run(gateway, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
        }
        println!("\nShutting down...");
    })
    .await
}

#[cfg_attr(not(feature = "telegram"), allow(unused_variables))]
fn select_gateway(config: &BotConfig, force_cli: bool) -> Arc<dyn MessagingGateway> {
    #[cfg(feature = "telegram")]
    if config.telegram.enabled && !force_cli {
        tracing::info!("Telegram gateway enabled");
        return Arc::new(TelegramGateway::new(TelegramGatewayConfig::new(
            &config.telegram.token,
        )));
    }

    tracing::info!("CLI gateway enabled");
    Arc::new(CliGateway::new())
}

/// Configuration management.
async fn cmd_config(args: ConfigArgs, path: PathBuf) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            if path.exists() {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'easel init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !path.exists() {
                println!("error: configuration file does not exist");
                return Ok(());
            }

            match load_config(&path).await {
                Ok(config) => {
                    let issues = config.validate();
                    if issues.is_empty() {
                        println!("Configuration is valid");
                    }
                    for issue in issues {
                        println!("{issue}");
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
    }

    Ok(())
}

/// Print the engine's model catalog and active models.
async fn cmd_models(path: PathBuf) -> Result<()> {
    let config = load_or_default(&path).await?;
    let engine = EngineClient::builder()
        .base_url(&config.engine.url)
        .basic_auth(&config.engine.basic_auth)
        .timeout_secs(config.engine.timeout_secs)
        .build()?;

    let catalog = engine
        .fetch_model_catalog()
        .await
        .with_context(|| format!("failed to list models at {}", config.engine.url))?;
    let active = engine
        .fetch_active_model_config()
        .await
        .context("failed to read the active model")?;
    let options = &catalog.options;

    println!("Engine: {}", config.engine.url);
    println!();
    println!("Stable Diffusion: {}", options.stable_diffusion.join(", "));
    println!("VAE:              {}", options.vae.join(", "));
    println!("HyperNetwork:     {}", options.hypernetwork.join(", "));
    println!();
    println!("Active model:     {}", active.model.stable_diffusion);
    Ok(())
}
