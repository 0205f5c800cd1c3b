//! Price-level math and the open-position gate.

pub mod gate;
pub mod levels;

pub use gate::{GateDecision, PositionGate};
pub use levels::{preview, round_to_digits, stop_price, target_price};
