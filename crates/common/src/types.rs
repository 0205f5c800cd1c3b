use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLC observation over a fixed interval.
/// Bars are immutable once appended to a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub time: DateTime<Utc>,
}

impl PriceBar {
    pub fn new(open: f64, high: f64, low: f64, close: f64, time: DateTime<Utc>) -> Self {
        Self {
            open,
            high,
            low,
            close,
            time,
        }
    }

    /// True Range against the previous bar's close.
    pub fn true_range(&self, prev_close: f64) -> f64 {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

/// Live top-of-book quote with the instrument's price precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    /// Number of decimal digits prices are quoted with.
    pub digits: u32,
}

impl Quote {
    /// Price an order in `direction` would be filled against:
    /// longs buy at the ask, shorts sell at the bid.
    pub fn reference_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Short => self.bid,
            Direction::Long | Direction::Standby => self.ask,
        }
    }
}

/// A single price level of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub volume: f64,
}

/// Level-2 depth snapshot, best levels first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Directional lean of a piece of evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Bias::Long => write!(f, "long"),
            Bias::Short => write!(f, "short"),
            Bias::Neutral => write!(f, "neutral"),
        }
    }
}

/// Direction of a trade decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Standby,
}

impl Direction {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Direction::Standby)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
            Direction::Standby => write!(f, "STANDBY"),
        }
    }
}

/// Structured trade decision with absolute stop/target prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub direction: Direction,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
}

impl TradeIntent {
    pub fn standby() -> Self {
        Self {
            direction: Direction::Standby,
            stop_price: None,
            target_price: None,
        }
    }
}

/// Stop-loss / take-profit distances for one direction, in percent
/// (0.3 means 0.3%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StopTarget {
    #[serde(default)]
    pub stop_pct: f64,
    #[serde(default)]
    pub target_pct: f64,
}

/// Per-direction stop/target percentages plus the concurrent position cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub long: StopTarget,
    #[serde(default)]
    pub short: StopTarget,
    /// New commands are suppressed while this many positions are open.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
}

fn default_max_positions() -> usize {
    1
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            long: StopTarget::default(),
            short: StopTarget::default(),
            max_positions: default_max_positions(),
        }
    }
}

impl RiskConfig {
    pub fn for_direction(&self, direction: Direction) -> Option<StopTarget> {
        match direction {
            Direction::Long => Some(self.long),
            Direction::Short => Some(self.short),
            Direction::Standby => None,
        }
    }
}

/// Stop/target prices precomputed for both directions at the current quote,
/// shown to the decision-maker so it can quote them back verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelPreview {
    pub long_stop: Option<f64>,
    pub long_target: Option<f64>,
    pub short_stop: Option<f64>,
    pub short_target: Option<f64>,
}

/// How orders reach the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
    /// Instructions are relayed to a human operator who places them by hand.
    Manual,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Manual => write!(f, "manual"),
        }
    }
}

/// Whether the loops are actively monitoring the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Discussion,
    Monitoring,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::Discussion => write!(f, "discussion"),
            EngineMode::Monitoring => write!(f, "monitor"),
        }
    }
}

/// External control signals handled by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Reload,
}

/// Events emitted by the decision and actuation loops for operator alerts.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Confirmed {
        intent_text: String,
        open_positions: usize,
    },
    VerificationTimedOut {
        intent_text: String,
        timeout_secs: u64,
    },
    Rejected {
        intent_text: String,
        reason: String,
    },
    SubmissionFailed {
        intent_text: String,
        error: String,
    },
    Suppressed {
        open_positions: usize,
        max_positions: usize,
    },
    Dropped {
        pending_intent: String,
    },
    /// An instruction a human operator has to place by hand.
    ManualInstruction {
        text: String,
    },
}

impl std::fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionEvent::Confirmed {
                intent_text,
                open_positions,
            } => write!(
                f,
                "Execution confirmed: {intent_text} (open positions: {open_positions})"
            ),
            ExecutionEvent::VerificationTimedOut {
                intent_text,
                timeout_secs,
            } => write!(
                f,
                "No new position within {timeout_secs}s after: {intent_text}"
            ),
            ExecutionEvent::Rejected {
                intent_text,
                reason,
            } => write!(f, "Actuator rejected {intent_text}: {reason}"),
            ExecutionEvent::SubmissionFailed { intent_text, error } => {
                write!(f, "Submitting {intent_text} failed: {error}")
            }
            ExecutionEvent::Suppressed {
                open_positions,
                max_positions,
            } => write!(
                f,
                "Command suppressed: {open_positions}/{max_positions} positions open"
            ),
            ExecutionEvent::Dropped { pending_intent } => write!(
                f,
                "Command dropped: previous instruction still pending ({pending_intent})"
            ),
            ExecutionEvent::ManualInstruction { text } => write!(f, "Place manually: {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_range_uses_previous_close_gap() {
        let bar = PriceBar::new(10.0, 11.0, 9.5, 10.5, Utc::now());
        assert!((bar.true_range(10.0) - 1.5).abs() < 1e-12);
        // Gap up: |high - prev_close| dominates
        assert!((bar.true_range(7.0) - 4.0).abs() < 1e-12);
        // Gap down: |low - prev_close| dominates
        assert!((bar.true_range(14.0) - 4.5).abs() < 1e-12);
    }

    #[test]
    fn reference_price_is_direction_aware() {
        let quote = Quote {
            bid: 1949.5,
            ask: 1950.0,
            digits: 2,
        };
        assert_eq!(quote.reference_price(Direction::Long), 1950.0);
        assert_eq!(quote.reference_price(Direction::Short), 1949.5);
    }

    #[test]
    fn risk_config_defaults_to_single_position() {
        let cfg: RiskConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_positions, 1);
        assert_eq!(cfg.long, StopTarget::default());
    }
}
