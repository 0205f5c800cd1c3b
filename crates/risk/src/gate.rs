use common::{PositionSource, Result};
use tracing::{debug, warn};

/// Outcome of the max-open-positions check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Open { open_positions: usize },
    Full { open_positions: usize, max_positions: usize },
}

impl GateDecision {
    pub fn allows_new(&self) -> bool {
        matches!(self, GateDecision::Open { .. })
    }
}

/// Suppresses new commands while the authoritative open position count has
/// reached the configured cap.
#[derive(Debug, Clone, Copy)]
pub struct PositionGate {
    max_positions: usize,
}

impl PositionGate {
    pub fn new(max_positions: usize) -> Self {
        Self { max_positions }
    }

    pub fn evaluate(&self, open_positions: usize) -> GateDecision {
        if open_positions >= self.max_positions {
            GateDecision::Full {
                open_positions,
                max_positions: self.max_positions,
            }
        } else {
            GateDecision::Open { open_positions }
        }
    }

    /// Query the source and evaluate. A read failure is returned to the
    /// caller, which must treat it as "do not trade".
    pub async fn check(&self, source: &dyn PositionSource) -> Result<GateDecision> {
        let open_positions = source.open_position_count().await.map_err(|e| {
            warn!(error = %e, "Position count unavailable at gate");
            e
        })?;
        let decision = self.evaluate(open_positions);
        debug!(open_positions, max = self.max_positions, ?decision, "Position gate");
        Ok(decision)
    }
}
