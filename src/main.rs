//! Entry point: loads config, wires up the two exchange providers, and runs
//! the arbitrage bot and pump bot side by side until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crossex::arbitrage::notifier::{Notifier, NullNotifier, TelegramNotifier};
use crossex::arbitrage::repository::SqliteSpreadRepository;
use crossex::arbitrage::signal_handler::SignalHandler;
use crossex::arbitrage::ArbitrageBot;
use crossex::config::Config;
use crossex::provider::bingx::BingXProvider;
use crossex::provider::bybit::BybitProvider;
use crossex::provider::Provider;
use crossex::pump::PumpBot;

#[derive(Parser, Debug)]
#[command(name = "crossex")]
struct Cli {
    /// Path to a YAML config file. Falls back to environment variables when
    /// the file doesn't exist.
    #[arg(short, long, default_value = "./config.yaml")]
    config: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "crossex=info".into()))
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config).context("loading configuration")?;
    cfg.validate().context("validating configuration")?;

    let bybit = Arc::new(BybitProvider::new(
        cfg.exchange.bybit.base_url.clone(),
        cfg.exchange.bybit.ws_base_url.clone(),
        cfg.exchange.ws_client.buffer_size,
        cfg.exchange.ws_client.chunk_size,
    ));
    let bingx = Arc::new(BingXProvider::new(
        cfg.exchange.bingx.base_url.clone(),
        cfg.exchange.bingx.ws_url.clone(),
        cfg.exchange.bingx.api_key.clone(),
        cfg.exchange.bingx.api_secret.clone(),
        cfg.exchange.ws_client.buffer_size,
        cfg.exchange.ws_client.chunk_size,
    ));

    let notifier: Arc<dyn Notifier> = match &cfg.notifications.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(&telegram.bot_token, &telegram.chat_id)),
        None => {
            tracing::warn!("no telegram token configured, spread events will only be logged");
            Arc::new(NullNotifier)
        }
    };
    let repository = Arc::new(
        SqliteSpreadRepository::open(&cfg.database.sqlite_path)
            .context("opening spread repository")?,
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (signal_tx, signal_rx) = mpsc::channel(1000);

    let signal_handler = SignalHandler::new(notifier, repository);
    let signal_task = tokio::spawn(signal_handler.run(signal_rx));

    let arbitrage_providers: Vec<Arc<dyn Provider>> = vec![bybit.clone(), bingx];
    let arbitrage_bot = ArbitrageBot::new(
        arbitrage_providers,
        cfg.exchange.arbitrage_bot.clone(),
        signal_tx,
    )?;
    let arbitrage_task = tokio::spawn(arbitrage_bot.run(cancel_rx.clone()));

    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let pump_bot = PumpBot::new(bybit, cfg.exchange.bot.clone(), num_workers);
    let pump_task = tokio::spawn(pump_bot.run(cancel_rx));

    tracing::info!("crossex started, waiting for shutdown signal");
    wait_for_shutdown().await;
    tracing::info!("shutdown signal received, stopping");
    let _ = cancel_tx.send(true);

    let _ = tokio::join!(arbitrage_task, pump_task, signal_task);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
