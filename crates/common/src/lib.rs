pub mod command;
pub mod config;
pub mod error;
pub mod exchange;
pub mod indicator;
pub mod types;

pub use command::{Command, CommandState, PriceContext};
pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{
    Actuation, ActuationRequest, Actuator, DecisionContext, DecisionMaker, MarketData,
    PositionSource,
};
pub use indicator::*;
pub use types::*;
