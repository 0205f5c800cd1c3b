use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{
    Actuator, Config, ControlCommand, ExecutionEvent, MarketData, PositionSource, TradingMode,
};
use engine::{
    ActuationLoop, BinanceClient, CommandChannel, ControlHandle, Controller, DecisionLoop,
    ExecutionVerifier, Journal, ManualActuator, OllamaClient,
};
use paper::PaperClient;
use strategy::TradingConfig;
use telegram_ctrl::{forward_alerts, start_bot, BotDeps};

/// Paper positions are checked against their stop/target at this cadence.
const PAPER_PRICE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, "TradePilot starting");

    let trading = match TradingConfig::load(&cfg.trading_config_path) {
        Ok(trading) => trading,
        Err(e) => {
            warn!(error = %e, "No usable trading config yet, starting with defaults");
            TradingConfig::default()
        }
    };

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .context("database migration failed")?;
    info!("Database ready");

    let journal = Journal::new(db);
    let channel = CommandChannel::restore(Arc::new(journal.clone()))
        .await
        .context("failed to restore command slot")?;

    // ── Control ───────────────────────────────────────────────────────────────
    let (controller, control) = Controller::new(&cfg.trading_config_path, trading);
    let (event_tx, event_rx) = mpsc::channel::<ExecutionEvent>(64);

    // ── Adapters (selected by TRADING_MODE) ───────────────────────────────────
    let binance = Arc::new(BinanceClient::new(
        cfg.binance_base_url.clone(),
        cfg.binance_api_key.clone(),
        cfg.binance_secret.clone(),
    )?);
    let market: Arc<dyn MarketData> = binance.clone();
    let account: Arc<dyn PositionSource> = binance.clone();

    let (positions, actuator): (Arc<dyn PositionSource>, Arc<dyn Actuator>) =
        match cfg.trading_mode {
            TradingMode::Live => {
                info!("Live trading mode: orders go to Binance");
                let actuator: Arc<dyn Actuator> = binance.clone();
                (account, actuator)
            }
            TradingMode::Manual => {
                info!("Manual mode: instructions are relayed to the operator");
                let actuator: Arc<dyn Actuator> = Arc::new(ManualActuator::new(event_tx.clone()));
                (account, actuator)
            }
            TradingMode::Paper => {
                info!(
                    slippage_bps = cfg.paper_slippage_bps,
                    "Paper trading mode: orders are simulated"
                );
                let paper = PaperClient::new(
                    cfg.paper_slippage_bps,
                    Duration::from_millis(cfg.paper_fill_delay_ms),
                );
                tokio::spawn(feed_paper_prices(
                    paper.clone(),
                    market.clone(),
                    control.clone(),
                ));
                let positions: Arc<dyn PositionSource> = Arc::new(paper.clone());
                let actuator: Arc<dyn Actuator> = Arc::new(paper);
                (positions, actuator)
            }
        };

    let llm = Arc::new(OllamaClient::new(
        cfg.ollama_host.clone(),
        cfg.ollama_model.clone(),
    )?);

    // ── Loops ─────────────────────────────────────────────────────────────────
    let verifier = ExecutionVerifier::new(positions.clone())
        .with_timeout(Duration::from_secs(cfg.verify_timeout_secs));
    let decision = DecisionLoop::new(
        market,
        positions,
        llm,
        channel.clone(),
        control.subscribe(),
        event_tx.clone(),
    );
    let actuation = ActuationLoop::new(
        channel,
        actuator,
        verifier,
        Some(journal.clone()),
        event_tx,
        control.subscribe(),
    );

    tokio::spawn(controller.run());
    tokio::spawn(decision.run());
    tokio::spawn(actuation.run());

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    match cfg.telegram_token.clone() {
        Some(token) => {
            let bot = teloxide::Bot::new(token);
            let chat_ids = cfg
                .telegram_allowed_user_ids
                .iter()
                .map(|&id| teloxide::types::ChatId(id))
                .collect();
            let deps = BotDeps {
                control: control.clone(),
                trading_mode: cfg.trading_mode,
                allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
                journal: Some(journal),
            };
            tokio::spawn(forward_alerts(bot.clone(), chat_ids, event_rx));
            tokio::spawn(start_bot(bot, deps));
        }
        None => {
            // Nobody to send /start, so monitoring begins right away
            tokio::spawn(log_alerts(event_rx));
            match control.send(ControlCommand::Start).await {
                Ok(reply) => info!(%reply, "Telegram not configured, auto-started"),
                Err(e) => warn!(error = %e, "Telegram not configured and monitoring cannot start yet"),
            }
        }
    }

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received. Stopping monitoring.");
    if let Err(e) = control.send(ControlCommand::Stop).await {
        warn!(error = %e, "Stop on shutdown failed");
    }
    Ok(())
}

/// Drive paper stop/target closes from the live quote.
async fn feed_paper_prices(paper: PaperClient, market: Arc<dyn MarketData>, control: ControlHandle) {
    let mut ticker = tokio::time::interval(PAPER_PRICE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let state = control.state();
        if !state.is_monitoring() || state.config.symbol.is_empty() {
            continue;
        }
        let symbol = &state.config.symbol;
        match market.quote(symbol).await {
            Ok(quote) => {
                let closed = paper.update_price(symbol, (quote.bid + quote.ask) / 2.0).await;
                if !closed.is_empty() {
                    info!(count = closed.len(), "Paper positions closed at stop/target");
                }
            }
            Err(e) => warn!(error = %e, "Paper price feed: quote unavailable"),
        }
    }
}

async fn log_alerts(mut events: mpsc::Receiver<ExecutionEvent>) {
    while let Some(event) = events.recv().await {
        info!(%event, "Execution event");
    }
}
