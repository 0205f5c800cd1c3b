use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use common::{Actuation, ActuationRequest, Actuator, Direction, PositionSource, Result};

/// A simulated open position.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPosition {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub lot_size: f64,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

impl PaperPosition {
    /// Whether `price` reaches the stop or the target.
    fn exit_hit(&self, price: f64) -> Option<&'static str> {
        let (stop_hit, target_hit) = match self.direction {
            Direction::Long => (
                self.stop_price.is_some_and(|s| price <= s),
                self.target_price.is_some_and(|t| price >= t),
            ),
            Direction::Short => (
                self.stop_price.is_some_and(|s| price >= s),
                self.target_price.is_some_and(|t| price <= t),
            ),
            Direction::Standby => (false, false),
        };
        if stop_hit {
            Some("stop")
        } else if target_hit {
            Some("target")
        } else {
            None
        }
    }

    fn pnl(&self, exit_price: f64) -> f64 {
        match self.direction {
            Direction::Short => (self.entry_price - exit_price) * self.lot_size,
            _ => (exit_price - self.entry_price) * self.lot_size,
        }
    }
}

/// Simulated account for paper trading.
///
/// Orders fill after `fill_delay` at the latest known price (or the
/// request's reference price) with slippage against the trader. Positions
/// close when `update_price` crosses their stop or target. Nothing is ever
/// sent to an exchange.
#[derive(Clone)]
pub struct PaperClient {
    positions: Arc<RwLock<Vec<PaperPosition>>>,
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
    fill_delay: Duration,
}

impl PaperClient {
    pub fn new(slippage_bps: f64, fill_delay: Duration) -> Self {
        info!(slippage_bps, fill_delay = ?fill_delay, "PaperClient initialized");
        Self {
            positions: Arc::new(RwLock::new(Vec::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
            fill_delay,
        }
    }

    /// Record the latest price and close any position whose stop or target
    /// it reaches. Returns the closed positions.
    pub async fn update_price(&self, symbol: &str, price: f64) -> Vec<PaperPosition> {
        self.prices.write().await.insert(symbol.to_string(), price);

        let mut positions = self.positions.write().await;
        let mut closed = Vec::new();
        positions.retain(|p| {
            if p.symbol != symbol {
                return true;
            }
            match p.exit_hit(price) {
                Some(reason) => {
                    info!(
                        id = %p.id,
                        symbol,
                        direction = %p.direction,
                        entry = p.entry_price,
                        exit = price,
                        pnl = p.pnl(price),
                        reason,
                        "Paper position closed"
                    );
                    closed.push(p.clone());
                    false
                }
                None => true,
            }
        });
        closed
    }

    pub async fn positions(&self) -> Vec<PaperPosition> {
        self.positions.read().await.clone()
    }

    fn fill_price(&self, direction: Direction, mid: f64) -> f64 {
        // Buys pay more, sells receive less
        let slip = self.slippage_bps / 10_000.0;
        match direction {
            Direction::Short => mid * (1.0 - slip),
            _ => mid * (1.0 + slip),
        }
    }
}

#[async_trait]
impl Actuator for PaperClient {
    fn name(&self) -> &str {
        "paper"
    }

    async fn act(&self, request: &ActuationRequest) -> Result<Actuation> {
        if !request.direction.is_actionable() {
            return Ok(Actuation::Rejected("standby is not an order".into()));
        }
        if request.lot_size.is_nan() || request.lot_size <= 0.0 {
            return Ok(Actuation::Rejected(format!(
                "invalid lot size {}",
                request.lot_size
            )));
        }

        let mid = self
            .prices
            .read()
            .await
            .get(&request.symbol)
            .copied()
            .unwrap_or(request.reference_price);
        let position = PaperPosition {
            id: Uuid::new_v4(),
            symbol: request.symbol.clone(),
            direction: request.direction,
            entry_price: self.fill_price(request.direction, mid),
            lot_size: request.lot_size,
            stop_price: request.stop_price,
            target_price: request.target_price,
            opened_at: Utc::now(),
        };
        debug!(
            symbol = %position.symbol,
            direction = %position.direction,
            mid,
            fill = position.entry_price,
            delay = ?self.fill_delay,
            "Paper order accepted"
        );

        let positions = self.positions.clone();
        let delay = self.fill_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(id = %position.id, symbol = %position.symbol, price = position.entry_price, "Paper fill");
            positions.write().await.push(position);
        });
        Ok(Actuation::Attempted)
    }
}

#[async_trait]
impl PositionSource for PaperClient {
    async fn open_position_count(&self) -> Result<usize> {
        Ok(self.positions.read().await.len())
    }
}
