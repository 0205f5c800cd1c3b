use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{PositionSource, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The position count rose above the baseline.
    Confirmed { open_positions: usize },
    /// No increase before the deadline; carries the last count observed
    /// (`None` if every read failed).
    TimedOut { last_observed: Option<usize> },
}

impl Verification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verification::Confirmed { .. })
    }
}

/// Confirms that an actuation took effect by polling the authoritative
/// position count until it exceeds the pre-actuation baseline.
#[derive(Clone)]
pub struct ExecutionVerifier {
    positions: Arc<dyn PositionSource>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ExecutionVerifier {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(positions: Arc<dyn PositionSource>) -> Self {
        Self {
            positions,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Position count before actuation. Must be taken before `act` is called.
    pub async fn baseline(&self) -> Result<usize> {
        self.positions.open_position_count().await
    }

    /// Poll until the count exceeds `baseline` or the timeout elapses.
    pub async fn confirm(&self, baseline: usize) -> Verification {
        let deadline = Instant::now() + self.timeout;
        let mut last_observed = None;

        loop {
            match self.positions.open_position_count().await {
                Ok(count) if count > baseline => {
                    info!(baseline, open_positions = count, "Execution confirmed");
                    return Verification::Confirmed {
                        open_positions: count,
                    };
                }
                Ok(count) => {
                    debug!(baseline, open_positions = count, "Waiting for new position");
                    last_observed = Some(count);
                }
                Err(e) => warn!(error = %e, "Position count read failed during verification"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(baseline, ?last_observed, timeout = ?self.timeout, "Execution not confirmed before timeout");
                return Verification::TimedOut { last_observed };
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
