//! Telegram control surface: operator commands and execution alerts.

pub mod commands;

pub use commands::{forward_alerts, send_alert, start_bot, BotDeps};
