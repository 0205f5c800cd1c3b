use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use common::{Actuation, ActuationRequest, Actuator, Command, ExecutionEvent};
use strategy::{parse, Markers};

use crate::channel::CommandChannel;
use crate::journal::{ExecutionOutcome, Journal, JournalEntry};
use crate::lifecycle::RuntimeState;
use crate::verifier::{ExecutionVerifier, Verification};

/// How often the command slot is checked for a new command.
pub const ACTUATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consumes commands from the slot one at a time: actuates, verifies,
/// acknowledges, journals.
///
/// This is the ONLY component that calls `Actuator::act`.
pub struct ActuationLoop {
    channel: CommandChannel,
    actuator: Arc<dyn Actuator>,
    verifier: ExecutionVerifier,
    journal: Option<Journal>,
    events: mpsc::Sender<ExecutionEvent>,
    state_rx: watch::Receiver<RuntimeState>,
    markers: Markers,
    /// Intent text of the last command taken off the slot.
    last_processed: Option<String>,
}

impl ActuationLoop {
    pub fn new(
        channel: CommandChannel,
        actuator: Arc<dyn Actuator>,
        verifier: ExecutionVerifier,
        journal: Option<Journal>,
        events: mpsc::Sender<ExecutionEvent>,
        state_rx: watch::Receiver<RuntimeState>,
    ) -> Self {
        Self {
            channel,
            actuator,
            verifier,
            journal,
            events,
            state_rx,
            markers: Markers::default(),
            last_processed: None,
        }
    }

    /// Run the loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        self.last_processed = self.channel.last_done().await.map(|c| c.intent_text);
        info!(actuator = self.actuator.name(), last = ?self.last_processed, "Actuation loop running");

        let mut ticker = tokio::time::interval(ACTUATION_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.state_rx.has_changed().is_err() {
                break;
            }
            let state = self.state_rx.borrow_and_update().clone();
            self.tick(&state).await;
        }
        warn!("Actuation loop: state channel closed");
    }

    /// Process the pending command, if any. Returns how it ended, or `None`
    /// when nothing was processed.
    pub async fn tick(&mut self, state: &RuntimeState) -> Option<ExecutionOutcome> {
        let command = self.channel.pending().await?;

        if !state.is_monitoring() {
            info!(intent = %command.intent_text, "Monitoring stopped, discarding pending command");
            self.finish(&command, ExecutionOutcome::Discarded, None).await;
            return Some(ExecutionOutcome::Discarded);
        }

        if self.last_processed.as_deref() == Some(command.intent_text.as_str()) {
            info!(intent = %command.intent_text, "Same intent as last processed, skipping");
            self.finish(&command, ExecutionOutcome::Duplicate, None).await;
            return Some(ExecutionOutcome::Duplicate);
        }

        let direction = parse(&command.intent_text, &self.markers).direction;
        if !direction.is_actionable() {
            error!(intent = %command.intent_text, "Command carries no direction");
            let detail = "no direction in intent text".to_string();
            self.finish(&command, ExecutionOutcome::Rejected, Some(detail)).await;
            return Some(ExecutionOutcome::Rejected);
        }

        // Leave the command pending and retry next tick if the baseline is
        // unreadable: without it nothing could be verified.
        let baseline = match self.verifier.baseline().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Position count unavailable before actuation, will retry");
                return None;
            }
        };

        let request = ActuationRequest {
            symbol: command.context.symbol.clone(),
            direction,
            lot_size: command.context.lot_size,
            reference_price: command.context.price,
            digits: command.context.digits,
            stop_price: command.context.sl,
            target_price: command.context.tp,
        };
        info!(actuator = self.actuator.name(), intent = %command.intent_text, baseline, "Actuating");

        let intent_text = command.intent_text.clone();
        let (outcome, detail, event) = match self.actuator.act(&request).await {
            Ok(Actuation::Attempted) => match self.verifier.confirm(baseline).await {
                Verification::Confirmed { open_positions } => (
                    ExecutionOutcome::Confirmed,
                    Some(format!("open positions: {open_positions}")),
                    ExecutionEvent::Confirmed {
                        intent_text,
                        open_positions,
                    },
                ),
                Verification::TimedOut { last_observed } => (
                    ExecutionOutcome::TimedOut,
                    last_observed.map(|n| format!("last observed positions: {n}")),
                    ExecutionEvent::VerificationTimedOut {
                        intent_text,
                        timeout_secs: self.verifier.timeout().as_secs(),
                    },
                ),
            },
            Ok(Actuation::Rejected(reason)) => {
                warn!(%reason, "Actuator rejected command");
                (
                    ExecutionOutcome::Rejected,
                    Some(reason.clone()),
                    ExecutionEvent::Rejected {
                        intent_text,
                        reason,
                    },
                )
            }
            Err(e) => {
                error!(error = %e, "Actuation submission failed");
                (
                    ExecutionOutcome::SubmissionFailed,
                    Some(e.to_string()),
                    ExecutionEvent::SubmissionFailed {
                        intent_text,
                        error: e.to_string(),
                    },
                )
            }
        };

        self.finish(&command, outcome, detail).await;
        if self.events.send(event).await.is_err() {
            debug!("No alert listener");
        }
        Some(outcome)
    }

    /// Acknowledge, remember and journal. Called exactly once per command.
    async fn finish(&mut self, command: &Command, outcome: ExecutionOutcome, detail: Option<String>) {
        if let Err(e) = self.channel.acknowledge(command.id).await {
            error!(error = %e, id = %command.id, "Failed to acknowledge command");
        }
        if outcome != ExecutionOutcome::Discarded {
            self.last_processed = Some(command.intent_text.clone());
        }

        let Some(journal) = &self.journal else {
            return;
        };
        let entry = JournalEntry {
            command_id: command.id,
            intent_text: command.intent_text.clone(),
            actuator: self.actuator.name().to_string(),
            outcome,
            detail,
            recorded_at: Utc::now(),
        };
        if let Err(e) = journal.record(&entry).await {
            error!(error = %e, "Failed to journal execution");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::tests::memory_db;
    use async_trait::async_trait;
    use common::{EngineMode, Error, PositionSource, PriceContext, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use strategy::TradingConfig;

    #[derive(Default)]
    struct Account {
        positions: AtomicUsize,
    }

    #[async_trait]
    impl PositionSource for Account {
        async fn open_position_count(&self) -> Result<usize> {
            Ok(self.positions.load(Ordering::SeqCst))
        }
    }

    enum Behaviour {
        Fill,
        Ignore,
        Reject,
        Fail,
    }

    struct FakeActuator {
        account: Arc<Account>,
        behaviour: Behaviour,
        requests: Mutex<Vec<ActuationRequest>>,
    }

    #[async_trait]
    impl Actuator for FakeActuator {
        fn name(&self) -> &str {
            "fake"
        }

        async fn act(&self, request: &ActuationRequest) -> Result<Actuation> {
            self.requests.lock().unwrap().push(request.clone());
            match self.behaviour {
                Behaviour::Fill => {
                    self.account.positions.fetch_add(1, Ordering::SeqCst);
                    Ok(Actuation::Attempted)
                }
                Behaviour::Ignore => Ok(Actuation::Attempted),
                Behaviour::Reject => Ok(Actuation::Rejected("insufficient margin".into())),
                Behaviour::Fail => Err(Error::Http("connection reset".into())),
            }
        }
    }

    struct Harness {
        actuation: ActuationLoop,
        channel: CommandChannel,
        actuator: Arc<FakeActuator>,
        events: mpsc::Receiver<ExecutionEvent>,
        _state_tx: watch::Sender<RuntimeState>,
    }

    fn harness(behaviour: Behaviour, journal: Option<Journal>) -> Harness {
        let account = Arc::new(Account::default());
        let actuator = Arc::new(FakeActuator {
            account: account.clone(),
            behaviour,
            requests: Mutex::new(Vec::new()),
        });
        let verifier = ExecutionVerifier::new(account).with_timeout(Duration::from_secs(3));
        let channel = CommandChannel::new();
        let (state_tx, state_rx) = watch::channel(state(EngineMode::Monitoring));
        let (events_tx, events) = mpsc::channel(8);
        let actuation = ActuationLoop::new(
            channel.clone(),
            actuator.clone(),
            verifier,
            journal,
            events_tx,
            state_rx,
        );
        Harness {
            actuation,
            channel,
            actuator,
            events,
            _state_tx: state_tx,
        }
    }

    fn state(mode: EngineMode) -> RuntimeState {
        let config = TradingConfig::from_toml_str("symbol = \"XAUUSDT\"\nlot_size = 0.05").unwrap();
        RuntimeState {
            mode,
            config: Arc::new(config),
        }
    }

    fn long_command() -> Command {
        Command::new(
            "LONG SL 1944.15 TP 1961.70",
            PriceContext {
                symbol: "XAUUSDT".into(),
                lot_size: 0.05,
                price: 1950.0,
                digits: 2,
                sl: Some(1944.15),
                tp: Some(1961.7),
            },
        )
    }

    #[tokio::test]
    async fn confirmed_fill_is_acknowledged_and_journaled() {
        let journal = Journal::new(memory_db().await);
        let mut h = harness(Behaviour::Fill, Some(journal.clone()));
        let cmd = long_command();
        h.channel.publish(cmd.clone()).await;

        let outcome = h.actuation.tick(&state(EngineMode::Monitoring)).await;
        assert_eq!(outcome, Some(ExecutionOutcome::Confirmed));
        assert!(h.channel.pending().await.is_none());
        assert_eq!(h.channel.last_done().await.unwrap().id, cmd.id);

        let request = h.actuator.requests.lock().unwrap()[0].clone();
        assert_eq!(request.direction, common::Direction::Long);
        assert_eq!(request.lot_size, 0.05);
        assert_eq!(request.stop_price, Some(1944.15));
        assert_eq!(request.reference_price, 1950.0);

        assert!(matches!(
            h.events.recv().await,
            Some(ExecutionEvent::Confirmed { open_positions: 1, .. })
        ));
        let entries = journal.recent(5).await.unwrap();
        assert_eq!(entries[0].command_id, cmd.id);
        assert_eq!(entries[0].outcome, ExecutionOutcome::Confirmed);
        assert_eq!(entries[0].actuator, "fake");
    }

    #[tokio::test(start_paused = true)]
    async fn unverified_attempt_times_out_without_retry() {
        let mut h = harness(Behaviour::Ignore, None);
        h.channel.publish(long_command()).await;

        let outcome = h.actuation.tick(&state(EngineMode::Monitoring)).await;
        assert_eq!(outcome, Some(ExecutionOutcome::TimedOut));
        assert!(matches!(
            h.events.recv().await,
            Some(ExecutionEvent::VerificationTimedOut { timeout_secs: 3, .. })
        ));
        assert_eq!(h.actuation.tick(&state(EngineMode::Monitoring)).await, None);
        assert_eq!(h.actuator.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejection_and_transport_failure_skip_verification() {
        let mut h = harness(Behaviour::Reject, None);
        h.channel.publish(long_command()).await;
        assert_eq!(
            h.actuation.tick(&state(EngineMode::Monitoring)).await,
            Some(ExecutionOutcome::Rejected)
        );
        assert!(h.channel.pending().await.is_none());

        let mut h = harness(Behaviour::Fail, None);
        h.channel.publish(long_command()).await;
        assert_eq!(
            h.actuation.tick(&state(EngineMode::Monitoring)).await,
            Some(ExecutionOutcome::SubmissionFailed)
        );
        assert!(matches!(
            h.events.recv().await,
            Some(ExecutionEvent::SubmissionFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_intent_is_acknowledged_without_acting() {
        let mut h = harness(Behaviour::Fill, None);
        h.channel.publish(long_command()).await;
        h.actuation.tick(&state(EngineMode::Monitoring)).await;

        h.channel.publish(long_command()).await;
        assert_eq!(
            h.actuation.tick(&state(EngineMode::Monitoring)).await,
            Some(ExecutionOutcome::Duplicate)
        );
        assert!(h.channel.pending().await.is_none());
        assert_eq!(h.actuator.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_command_is_discarded_when_not_monitoring() {
        let mut h = harness(Behaviour::Fill, None);
        h.channel.publish(long_command()).await;

        assert_eq!(
            h.actuation.tick(&state(EngineMode::Discussion)).await,
            Some(ExecutionOutcome::Discarded)
        );
        assert!(h.channel.pending().await.is_none());
        assert!(h.actuator.requests.lock().unwrap().is_empty());

        // Discarding does not count as processing
        h.channel.publish(long_command()).await;
        h.actuation.tick(&state(EngineMode::Monitoring)).await;
        assert_eq!(h.actuator.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn order_uses_the_instrument_the_command_was_decided_for() {
        let mut h = harness(Behaviour::Fill, None);
        h.channel.publish(long_command()).await;

        // Config reloaded to another instrument before the command is consumed
        let config = TradingConfig::from_toml_str("symbol = \"BTCUSDT\"\nlot_size = 3.0").unwrap();
        let reloaded = RuntimeState {
            mode: EngineMode::Monitoring,
            config: Arc::new(config),
        };
        assert_eq!(
            h.actuation.tick(&reloaded).await,
            Some(ExecutionOutcome::Confirmed)
        );

        let request = h.actuator.requests.lock().unwrap()[0].clone();
        assert_eq!(request.symbol, "XAUUSDT");
        assert_eq!(request.lot_size, 0.05);
        assert_eq!(request.stop_price, Some(1944.15));
    }

    #[tokio::test]
    async fn empty_slot_is_a_no_op() {
        let mut h = harness(Behaviour::Fill, None);
        assert_eq!(h.actuation.tick(&state(EngineMode::Monitoring)).await, None);
    }
}
