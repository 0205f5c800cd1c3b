use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Direction, IndicatorSnapshot, LevelPreview, OrderBook, OrderBookImbalance, PriceBar, Quote,
    Result, RiskConfig, Signal,
};

/// Source of bars and quotes.
///
/// `BinanceClient` implements this against the futures REST API. Any error is
/// treated by the decision loop as "source unavailable" for that cycle.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// The most recent `count` bars, oldest first.
    async fn bars(&self, symbol: &str, timeframe_minutes: u32, count: usize)
        -> Result<Vec<PriceBar>>;

    async fn quote(&self, symbol: &str) -> Result<Quote>;

    /// Top `depth` levels of the order book.
    async fn order_book(&self, symbol: &str, depth: usize) -> Result<OrderBook>;
}

/// Authoritative count of currently open positions, owned by the trading
/// terminal. Read-only from this side.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn open_position_count(&self) -> Result<usize>;
}

/// Everything the decision-maker is shown for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub symbol: String,
    pub quote: Quote,
    pub timeframe_minutes: u32,
    pub bar_count: usize,
    pub snapshot: IndicatorSnapshot,
    pub signals: Vec<Signal>,
    pub order_book: Option<OrderBookImbalance>,
    pub long_strategy: String,
    pub short_strategy: String,
    pub rules: String,
    pub risk: RiskConfig,
    pub preview: LevelPreview,
    /// Most recent decisions, oldest first.
    pub recent_history: Vec<String>,
}

/// Turns evidence and strategy text into free-form decision text.
///
/// May be an LLM, a rule table, or a human. The text is interpreted by the
/// intent parser; anything it cannot recognise becomes Standby.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, ctx: &DecisionContext) -> Result<String>;
}

/// A resolved instruction for the actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationRequest {
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub reference_price: f64,
    pub digits: u32,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
}

/// Result of handing a request to an actuator. `Attempted` only means the
/// instruction was submitted; the execution verifier decides whether it took
/// effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actuation {
    Attempted,
    Rejected(String),
}

/// Capability that realizes an intent against a trading account.
///
/// Implemented by `PaperClient` (simulated), `BinanceClient` (broker API) and
/// `ManualActuator` (assisted-manual). Transport failures are returned as `Err`.
#[async_trait]
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    async fn act(&self, request: &ActuationRequest) -> Result<Actuation>;
}
