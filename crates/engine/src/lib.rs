//! Runtime loops and adapters: decision, actuation and control loops, the
//! command channel, execution verification, and the Binance / Ollama /
//! manual adapters.

pub mod binance;
pub mod channel;
pub mod decision;
pub mod executor;
pub mod journal;
pub mod lifecycle;
pub mod manual;
pub mod ollama;
pub mod rules;
pub mod verifier;

pub use binance::BinanceClient;
pub use channel::{ChannelError, CommandChannel, PublishOutcome, SlotStore};
pub use decision::{CycleError, CycleOutcome, DecisionLoop};
pub use executor::ActuationLoop;
pub use journal::{ExecutionOutcome, Journal, JournalEntry};
pub use lifecycle::{ControlError, ControlHandle, Controller, RuntimeState};
pub use manual::ManualActuator;
pub use ollama::OllamaClient;
pub use rules::RuleTable;
pub use verifier::{ExecutionVerifier, Verification};
