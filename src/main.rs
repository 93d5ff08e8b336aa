mod bot;
mod config;
mod error;
mod handler;
mod keepalive;
mod phrases;
mod platform;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::bot::Bot;
use crate::config::Config;
use crate::error::BotError;

/// Console output follows `RUST_LOG`; the log file always gets everything at debug.
fn init_logging(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,userbot=debug,grammers=warn".into()),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::DEBUG),
        )
        .init();

    Ok(())
}

fn print_setup_help(err: &BotError) {
    eprintln!("\nОШИБКА: {err}");
    eprintln!("\nСоздайте файл .env с таким содержимым:");
    eprintln!("API_ID=ваш_api_id");
    eprintln!("API_HASH=ваш_api_hash");
    eprintln!("SESSION_NAME=rotenberg_session");
    eprintln!("\nПолучите API на: https://my.telegram.org");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
    {
        Ok(config) => config,
        Err(e) => {
            if let Some(config_err) = config::configuration_error(&e) {
                print_setup_help(config_err);
                return Ok(());
            }
            return Err(e);
        }
    };

    init_logging(&config.logging.file)?;
    info!("Starting userbot");

    if let Err(e) = config.validate() {
        print_setup_help(&e);
        return Ok(());
    }
    info!(
        "  Typing delay: {}-{}s",
        config.behavior.typing_delay_min, config.behavior.typing_delay_max
    );

    let phrases = phrases::loader::load_or_builtin(config.phrases.file.as_deref()).await?;

    let bot = Arc::new(Bot::new(config, Arc::new(phrases)));

    // Ctrl+C schedules shutdown; in-flight handlers are not awaited.
    {
        let bot = bot.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, shutting down...");
                if let Err(e) = bot.stop().await {
                    error!("Error during shutdown: {}", e);
                }
                std::process::exit(0);
            }
        });
    }

    // A bad SESSION_STRING only surfaces once the client is built.
    if let Err(e) = bot.start().await {
        if matches!(e, BotError::Configuration(_)) {
            print_setup_help(&e);
            return Ok(());
        }
        return Err(e).context("Bot terminated with an error");
    }
    info!("Bot exited in phase {:?}", bot.phase());
    Ok(())
}
