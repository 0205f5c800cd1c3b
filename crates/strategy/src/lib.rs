//! Market analysis: indicator snapshots, signal detection, and the
//! trade-intent text protocol.

pub mod config;
pub mod engine;
pub mod indicators;
pub mod intent;
pub mod orderbook;
pub mod signals;
pub mod window;

pub use config::{DecisionKind, IndicatorConfig, SignalConfig, TradingConfig};
pub use engine::IndicatorEngine;
pub use intent::{parse, render, resolve, IntentDraft, Markers};
pub use signals::SignalDetector;
pub use window::BarWindow;
