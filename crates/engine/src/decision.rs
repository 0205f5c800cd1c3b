use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use common::{
    Command, DecisionContext, DecisionMaker, Error, ExecutionEvent, MarketData, PositionSource,
    PriceContext, TradeIntent,
};
use risk::{GateDecision, PositionGate};
use strategy::{
    orderbook, parse, render, resolve, BarWindow, DecisionKind, IndicatorEngine, Markers,
    SignalDetector, TradingConfig,
};

use crate::channel::{CommandChannel, PublishOutcome};
use crate::lifecycle::RuntimeState;
use crate::rules::RuleTable;

/// Sleep after a cycle that could not read the market.
pub const OUTAGE_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published { intent: TradeIntent, text: String },
    Standby,
    Suppressed { open_positions: usize, max_positions: usize },
    Dropped { pending: Command },
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("market data unavailable: {0}")]
    SourceUnavailable(Error),
    #[error("position count unavailable: {0}")]
    PositionsUnavailable(Error),
}

/// Turns market state into at most one published command per cycle.
pub struct DecisionLoop {
    market: Arc<dyn MarketData>,
    positions: Arc<dyn PositionSource>,
    llm: Arc<dyn DecisionMaker>,
    channel: CommandChannel,
    state_rx: watch::Receiver<RuntimeState>,
    events: mpsc::Sender<ExecutionEvent>,
    markers: Markers,
    history: VecDeque<String>,
    window: BarWindow,
}

impl DecisionLoop {
    pub fn new(
        market: Arc<dyn MarketData>,
        positions: Arc<dyn PositionSource>,
        llm: Arc<dyn DecisionMaker>,
        channel: CommandChannel,
        state_rx: watch::Receiver<RuntimeState>,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            market,
            positions,
            llm,
            channel,
            state_rx,
            events,
            markers: Markers::default(),
            history: VecDeque::new(),
            window: BarWindow::default(),
        }
    }

    /// Recent decision lines, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// Run the loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Decision loop running");
        loop {
            let state = self.state_rx.borrow_and_update().clone();
            if !state.is_monitoring() {
                debug!("Decision loop idle");
                if self.state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }

            let pause = match self.cycle(&state.config).await {
                Ok(outcome) => {
                    debug!(?outcome, "Decision cycle finished");
                    state.config.interval()
                }
                Err(CycleError::SourceUnavailable(e)) => {
                    warn!(error = %e, backoff = ?OUTAGE_BACKOFF, "Market data unavailable, backing off");
                    OUTAGE_BACKOFF
                }
                Err(e @ CycleError::PositionsUnavailable(_)) => {
                    warn!(error = %e, "Skipping cycle");
                    state.config.interval()
                }
            };

            // A mode or config change cuts the pause short
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        warn!("Decision loop: state channel closed");
    }

    /// One full cycle: bars, indicators, signals, decision, intent, command.
    pub async fn cycle(&mut self, cfg: &TradingConfig) -> Result<CycleOutcome, CycleError> {
        let bars = self
            .market
            .bars(&cfg.symbol, cfg.timeframe_minutes, cfg.candle_count)
            .await
            .map_err(CycleError::SourceUnavailable)?;
        let quote = self
            .market
            .quote(&cfg.symbol)
            .await
            .map_err(CycleError::SourceUnavailable)?;

        self.window.set_capacity(cfg.candle_count);
        self.window.replace(bars);
        if self.window.is_empty() {
            return Err(CycleError::SourceUnavailable(Error::Unavailable(format!(
                "no bars for {}",
                cfg.symbol
            ))));
        }

        let bars = self.window.bars();
        let pair = IndicatorEngine::new(cfg.indicators.clone()).snapshots(bars);
        let signals = SignalDetector::new(cfg.signals.clone()).detect(&pair, bars);
        let bar_count = bars.len();

        let order_book = if cfg.order_book.enabled {
            match self.market.order_book(&cfg.symbol, cfg.order_book.depth).await {
                Ok(book) => Some(orderbook::imbalance(&book, cfg.order_book.depth)),
                Err(e) => {
                    warn!(error = %e, "Order book unavailable, deciding without it");
                    None
                }
            }
        } else {
            None
        };

        let ctx = DecisionContext {
            symbol: cfg.symbol.clone(),
            quote,
            timeframe_minutes: cfg.timeframe_minutes,
            bar_count,
            snapshot: pair.current,
            signals,
            order_book,
            long_strategy: cfg.strategy.long.clone(),
            short_strategy: cfg.strategy.short.clone(),
            rules: cfg.strategy.rules.clone(),
            risk: cfg.risk,
            preview: risk::preview(&quote, &cfg.risk),
            recent_history: self.history.iter().cloned().collect(),
        };
        debug!(
            symbol = %ctx.symbol,
            indicators = %ctx.snapshot.summary(quote.digits as usize),
            signals = ctx.signals.len(),
            "Evidence ready"
        );

        let decider: Arc<dyn DecisionMaker> = match cfg.decision.kind {
            DecisionKind::Rules => Arc::new(RuleTable::new(cfg.decision.min_margin)),
            DecisionKind::Ollama => self.llm.clone(),
        };
        let deadline = Duration::from_secs(cfg.decision.timeout_secs);
        let text = match tokio::time::timeout(deadline, decider.decide(&ctx)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(decider = decider.name(), error = %e, "Decision-maker failed, standing by");
                String::new()
            }
            Err(_) => {
                warn!(decider = decider.name(), timeout = ?deadline, "Decision-maker timed out, standing by");
                String::new()
            }
        };

        let draft = parse(&text, &self.markers);
        if !draft.direction.is_actionable() {
            self.remember("STANDBY".to_string(), cfg.decision.history_len);
            info!(decider = decider.name(), "Standby");
            return Ok(CycleOutcome::Standby);
        }

        let reference = quote.reference_price(draft.direction);
        let intent = resolve(&draft, reference, quote.digits, &cfg.risk);
        let rendered = render(&intent, quote.digits);
        self.remember(rendered.clone(), cfg.decision.history_len);

        let gate = PositionGate::new(cfg.risk.max_positions)
            .check(self.positions.as_ref())
            .await
            .map_err(CycleError::PositionsUnavailable)?;
        if let GateDecision::Full {
            open_positions,
            max_positions,
        } = gate
        {
            info!(open_positions, max_positions, intent = %rendered, "Max positions reached, command suppressed");
            self.emit(ExecutionEvent::Suppressed {
                open_positions,
                max_positions,
            })
            .await;
            return Ok(CycleOutcome::Suppressed {
                open_positions,
                max_positions,
            });
        }

        let command = Command::new(
            rendered.clone(),
            PriceContext {
                symbol: cfg.symbol.clone(),
                lot_size: cfg.lot_size,
                price: reference,
                digits: quote.digits,
                sl: intent.stop_price,
                tp: intent.target_price,
            },
        );
        match self.channel.publish(command).await {
            PublishOutcome::Published(_) => Ok(CycleOutcome::Published {
                intent,
                text: rendered,
            }),
            PublishOutcome::Dropped { pending } => {
                self.emit(ExecutionEvent::Dropped {
                    pending_intent: pending.intent_text.clone(),
                })
                .await;
                Ok(CycleOutcome::Dropped { pending })
            }
        }
    }

    fn remember(&mut self, line: String, capacity: usize) {
        self.history
            .push_back(format!("{} {line}", Utc::now().format("%H:%M:%S")));
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    async fn emit(&self, event: ExecutionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("No alert listener");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::{Direction, OrderBook, PriceBar, Quote, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Market {
        bars: Vec<PriceBar>,
        quote: Quote,
        fail: bool,
    }

    #[async_trait]
    impl MarketData for Market {
        async fn bars(&self, _: &str, _: u32, count: usize) -> Result<Vec<PriceBar>> {
            if self.fail {
                return Err(Error::Unavailable("terminal offline".into()));
            }
            let skip = self.bars.len().saturating_sub(count);
            Ok(self.bars[skip..].to_vec())
        }

        async fn quote(&self, _: &str) -> Result<Quote> {
            Ok(self.quote)
        }

        async fn order_book(&self, _: &str, _: usize) -> Result<OrderBook> {
            Err(Error::Unavailable("no depth".into()))
        }
    }

    struct Positions(AtomicUsize);

    #[async_trait]
    impl PositionSource for Positions {
        async fn open_position_count(&self) -> Result<usize> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    /// Replies with a fixed text and records what it was shown.
    struct Scripted {
        reply: Result<String, String>,
        delay: Duration,
        seen: Mutex<Vec<DecisionContext>>,
    }

    impl Scripted {
        fn new(reply: &str) -> Arc<Self> {
            Self::slow(reply, Duration::ZERO)
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.into()),
                delay,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DecisionMaker for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn decide(&self, ctx: &DecisionContext) -> Result<String> {
            self.seen.lock().unwrap().push(ctx.clone());
            tokio::time::sleep(self.delay).await;
            self.reply.clone().map_err(Error::Decision)
        }
    }

    fn bars(n: usize) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let c = 1900.0 + i as f64;
                PriceBar::new(c - 0.5, c + 1.0, c - 1.0, c, start + ChronoDuration::minutes(i as i64))
            })
            .collect()
    }

    struct Harness {
        decision: DecisionLoop,
        channel: CommandChannel,
        events: mpsc::Receiver<ExecutionEvent>,
        positions: Arc<Positions>,
        _state_tx: watch::Sender<RuntimeState>,
    }

    fn harness(llm: Arc<dyn DecisionMaker>, fail: bool) -> Harness {
        let market = Arc::new(Market {
            bars: bars(60),
            quote: Quote {
                bid: 1949.8,
                ask: 1950.0,
                digits: 2,
            },
            fail,
        });
        let positions = Arc::new(Positions(AtomicUsize::new(0)));
        let channel = CommandChannel::new();
        let (state_tx, state_rx) = watch::channel(RuntimeState {
            mode: common::EngineMode::Monitoring,
            config: Arc::new(config()),
        });
        let (events_tx, events) = mpsc::channel(8);
        let decision = DecisionLoop::new(
            market,
            positions.clone(),
            llm,
            channel.clone(),
            state_rx,
            events_tx,
        );
        Harness {
            decision,
            channel,
            events,
            positions,
            _state_tx: state_tx,
        }
    }

    fn config() -> TradingConfig {
        TradingConfig::from_toml_str(
            r#"
            symbol = "XAUUSDT"
            candle_count = 50
            [strategy]
            long = "Buy strength"
            [decision]
            kind = "ollama"
            history_len = 2
            [risk.long]
            stop_pct = 0.3
            target_pct = 0.6
            [risk.short]
            stop_pct = 0.3
            target_pct = 0.6
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn long_decision_publishes_command_with_levels() {
        let llm = Scripted::new("LONG\nthe trend is up");
        let mut h = harness(llm.clone(), false);

        let outcome = h.decision.cycle(&config()).await.unwrap();
        let CycleOutcome::Published { intent, text } = outcome else {
            panic!("expected a published command, got {outcome:?}");
        };
        assert_eq!(intent.direction, Direction::Long);
        assert_eq!(text, "LONG SL 1944.15 TP 1961.70");

        let pending = h.channel.pending().await.unwrap();
        assert_eq!(pending.intent_text, text);
        assert_eq!(pending.context.price, 1950.0);
        assert_eq!(pending.context.sl, Some(1944.15));
        assert_eq!(pending.context.symbol, config().symbol);
        assert_eq!(pending.context.lot_size, config().lot_size);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].bar_count, 50);
        assert_eq!(seen[0].long_strategy, "Buy strength");
        assert_eq!(seen[0].preview.long_stop, Some(1944.15));
        assert!(seen[0].order_book.is_none());
    }

    #[tokio::test]
    async fn short_levels_use_the_bid() {
        let mut h = harness(Scripted::new("SHORT"), false);
        let CycleOutcome::Published { text, .. } = h.decision.cycle(&config()).await.unwrap()
        else {
            panic!("expected a published command");
        };
        assert_eq!(text, "SHORT SL 1955.65 TP 1938.10");
    }

    #[tokio::test]
    async fn unreadable_or_failed_decision_stands_by() {
        let mut h = harness(Scripted::new("not sure, the market looks choppy"), false);
        assert_eq!(h.decision.cycle(&config()).await.unwrap(), CycleOutcome::Standby);
        assert!(h.channel.pending().await.is_none());

        let failing = Arc::new(Scripted {
            reply: Err("model not loaded".into()),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        });
        let mut h = harness(failing, false);
        assert_eq!(h.decision.cycle(&config()).await.unwrap(), CycleOutcome::Standby);
    }

    #[tokio::test(start_paused = true)]
    async fn decision_deadline_follows_the_current_config() {
        let mut h = harness(Scripted::slow("LONG", Duration::from_secs(20)), false);

        let mut cfg = config();
        cfg.decision.timeout_secs = 5;
        assert_eq!(h.decision.cycle(&cfg).await.unwrap(), CycleOutcome::Standby);
        assert!(h.channel.pending().await.is_none());

        // A reloaded, longer deadline applies on the next cycle
        cfg.decision.timeout_secs = 30;
        assert!(matches!(
            h.decision.cycle(&cfg).await.unwrap(),
            CycleOutcome::Published { .. }
        ));
    }

    #[tokio::test]
    async fn full_positions_suppress_the_command() {
        let mut h = harness(Scripted::new("LONG"), false);
        h.positions.0.store(1, Ordering::SeqCst);

        assert_eq!(
            h.decision.cycle(&config()).await.unwrap(),
            CycleOutcome::Suppressed {
                open_positions: 1,
                max_positions: 1
            }
        );
        assert!(h.channel.pending().await.is_none());
        assert!(matches!(
            h.events.recv().await,
            Some(ExecutionEvent::Suppressed { .. })
        ));
    }

    #[tokio::test]
    async fn second_command_is_dropped_while_first_is_pending() {
        let mut h = harness(Scripted::new("LONG"), false);
        h.decision.cycle(&config()).await.unwrap();
        let first = h.channel.pending().await.unwrap();

        let outcome = h.decision.cycle(&config()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Dropped { pending: first.clone() });
        assert_eq!(h.channel.pending().await.unwrap().id, first.id);
        assert!(matches!(
            h.events.recv().await,
            Some(ExecutionEvent::Dropped { .. })
        ));
    }

    #[tokio::test]
    async fn outage_is_reported_as_source_unavailable() {
        let mut h = harness(Scripted::new("LONG"), true);
        assert!(matches!(
            h.decision.cycle(&config()).await,
            Err(CycleError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn history_is_bounded_and_fed_back() {
        let llm = Scripted::new("STANDBY");
        let mut h = harness(llm.clone(), false);
        for _ in 0..3 {
            h.decision.cycle(&config()).await.unwrap();
        }
        assert_eq!(h.decision.history().count(), 2);
        assert!(h.decision.history().all(|line| line.ends_with("STANDBY")));

        let seen = llm.seen.lock().unwrap();
        assert!(seen[0].recent_history.is_empty());
        assert_eq!(seen[2].recent_history.len(), 2);
    }

    #[tokio::test]
    async fn rules_kind_ignores_the_llm() {
        let llm = Scripted::new("LONG");
        let mut h = harness(llm.clone(), false);
        let mut cfg = config();
        cfg.decision.kind = DecisionKind::Rules;
        cfg.decision.min_margin = 100;

        assert_eq!(h.decision.cycle(&cfg).await.unwrap(), CycleOutcome::Standby);
        assert!(llm.seen.lock().unwrap().is_empty());
    }
}
