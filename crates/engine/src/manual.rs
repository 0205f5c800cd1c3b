use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use common::{Actuation, ActuationRequest, Actuator, ExecutionEvent, Result};

/// Assisted-manual actuator: relays each instruction to the operator, who
/// places the order by hand. The verifier then watches the account for the
/// resulting position.
pub struct ManualActuator {
    events: mpsc::Sender<ExecutionEvent>,
}

impl ManualActuator {
    pub fn new(events: mpsc::Sender<ExecutionEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl Actuator for ManualActuator {
    fn name(&self) -> &str {
        "manual"
    }

    async fn act(&self, request: &ActuationRequest) -> Result<Actuation> {
        let text = instruction(request);
        info!(%text, "Relaying instruction to operator");
        match self.events.send(ExecutionEvent::ManualInstruction { text }).await {
            Ok(()) => Ok(Actuation::Attempted),
            Err(_) => Ok(Actuation::Rejected("no operator channel".into())),
        }
    }
}

fn instruction(request: &ActuationRequest) -> String {
    let d = request.digits as usize;
    let mut text = format!(
        "{} {} {} @ {:.d$}",
        request.direction, request.lot_size, request.symbol, request.reference_price
    );
    if let Some(sl) = request.stop_price {
        text.push_str(&format!(", SL {sl:.d$}"));
    }
    if let Some(tp) = request.target_price {
        text.push_str(&format!(", TP {tp:.d$}"));
    }
    text
}
