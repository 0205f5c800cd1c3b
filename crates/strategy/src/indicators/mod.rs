//! Indicator math over chronological closes or bars (oldest first).
//!
//! Every function returns `None` when the input is shorter than the
//! indicator's period; callers treat that as "no evidence".

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use atr::AtrIndicator;
pub use bollinger::BollingerIndicator;
pub use macd::MacdIndicator;
pub use moving_average::{ema, sma};
pub use rsi::RsiIndicator;
