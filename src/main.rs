mod caption;
mod classifier;
mod config;
mod constants;
mod delivery;
mod error;
mod fetcher;
mod format;
mod gate;
mod handlers;
mod health;
mod logging;
mod pipeline;
mod state;
mod utils;

use std::{str::FromStr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use classifier::Platform;
use config::Config;
use state::State;
use teloxide::{prelude::*, utils::command::BotCommands};
use tokio_util::sync::CancellationToken;

/// These commands are supported:
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Display this text
    Help,
    /// Start
    Start,
    /// Id
    Id,
    /// Bot statistics (admin only)
    Stats,
}

#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of config toml file.
    #[arg(short, long)]
    pub config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_file = Args::parse()
        .config
        .or_else(|| {
            std::env::var("CONFIG_PATH")
                .ok()
                .and_then(|s| if s.is_empty() { None } else { Some(s) })
        })
        .unwrap_or_else(|| "config.toml".to_string());
    let (config, warnings) = Config::load_from(&config_file)
        .with_context(|| format!("unable to load config {config_file}"))?;
    let _log_guard = logging::init(&config.logging)?;
    tracing::info!("Config file {config_file} load successfully");
    for warning in warnings {
        tracing::warn!("{warning}");
    }

    let bot = Bot::new(&config.bot.token);
    let me = bot
        .get_me()
        .await
        .context("unable to authenticate with telegram")?;
    tracing::info!(username = %me.username(), "bot authenticated");

    let token = CancellationToken::new();
    let state = Arc::new(State::new(&config, bot.clone(), token.clone())?);

    if config.health.enabled {
        let bind = config.health.bind;
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve(bind, token).await {
                tracing::error!("{e:#}");
            }
        });
    }

    let mut dispatcher = Dispatcher::builder(bot, handlers::schema())
        .dependencies(dptree::deps![state])
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, cancelling in-flight requests");
        token.cancel();
        match shutdown.shutdown() {
            Ok(f) => f.await,
            Err(e) => tracing::warn!("dispatcher was not running: {e}"),
        }
    });

    tracing::info!("Bot created and running");
    dispatcher.dispatch().await;
    tracing::info!("Bot stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Callback data attached to inline keyboard buttons.
#[derive(Debug, PartialEq, Eq)]
pub enum UserData {
    Info(Platform),
}

impl FromStr for UserData {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('|') {
            Some(("info", platform)) => Ok(UserData::Info(platform.parse()?)),
            _ => Err(anyhow::anyhow!("Invalid action")),
        }
    }
}
