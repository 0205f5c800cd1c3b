use std::sync::Arc;

use teloxide::{dispatching::UpdateHandler, prelude::*, utils::command::BotCommands};
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::{ControlCommand, ExecutionEvent, TradingMode};
use engine::{ControlHandle, Journal, RuntimeState};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Entries shown by `/history`.
const HISTORY_LIMIT: i64 = 5;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub control: ControlHandle,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
    pub journal: Option<Journal>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "TradePilot commands:")]
pub enum Command {
    #[command(description = "Start monitoring the market")]
    Start,
    #[command(description = "Stop monitoring (pending commands are discarded)")]
    Stop,
    #[command(description = "Show mode, symbol and decision settings")]
    Status,
    #[command(description = "Re-read the trading config file")]
    Reload,
    #[command(description = "Show the latest execution outcomes")]
    History,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Reload].endpoint(handle_reload))
        .branch(case![Command::History].endpoint(handle_history));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn control_reply(deps: &BotDeps, command: ControlCommand) -> String {
    match deps.control.send(command).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(?command, error = %e, "Control command failed");
            format!("Failed: {e}")
        }
    }
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = control_reply(&deps, ControlCommand::Start).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = control_reply(&deps, ControlCommand::Stop).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_reload(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let reply = control_reply(&deps, ControlCommand::Reload).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = status_text(&deps.control.state(), deps.trading_mode);
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

async fn handle_history(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let text = match &deps.journal {
        None => "No execution journal configured.".to_string(),
        Some(journal) => match journal.recent(HISTORY_LIMIT).await {
            Ok(entries) if entries.is_empty() => "No executions yet.".to_string(),
            Ok(entries) => entries
                .iter()
                .map(|e| {
                    format!(
                        "{} {} [{}] {}",
                        e.recorded_at.format("%m-%d %H:%M:%S"),
                        e.intent_text,
                        e.outcome,
                        e.detail.as_deref().unwrap_or("")
                    )
                    .trim_end()
                    .to_string()
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                warn!(error = %e, "Journal read failed");
                format!("Journal unavailable: {e}")
            }
        },
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

fn status_text(state: &RuntimeState, trading_mode: TradingMode) -> String {
    let cfg = &state.config;
    let symbol = if cfg.symbol.is_empty() {
        "(not set)"
    } else {
        cfg.symbol.as_str()
    };
    let mut text = format!(
        "TradePilot Status\n\
         Engine: {}\n\
         Trading: {trading_mode}\n\
         Symbol: {symbol} ({}m, {} bars)\n\
         Lot: {} | Interval: {}s | Max positions: {}\n\
         Decision: {:?}",
        state.mode,
        cfg.timeframe_minutes,
        cfg.candle_count,
        cfg.lot_size,
        cfg.interval_secs,
        cfg.risk.max_positions,
        cfg.decision.kind,
    );
    if let Some(reason) = cfg.monitor_blocker() {
        text.push_str(&format!("\nCannot monitor: {reason}"));
    }
    text
}

/// Send a proactive alert to all configured chat IDs.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

/// Relay execution events to the operators until the event channel closes.
pub async fn forward_alerts(bot: Bot, chat_ids: Vec<ChatId>, mut events: mpsc::Receiver<ExecutionEvent>) {
    while let Some(event) = events.recv().await {
        send_alert(&bot, &chat_ids, &event.to_string()).await;
    }
    warn!("Alert channel closed");
}
