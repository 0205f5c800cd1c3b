use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle tag of the single command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandState {
    New,
    Done,
}

impl CommandState {
    fn tag(&self) -> &'static str {
        match self {
            CommandState::New => "NEW",
            CommandState::Done => "DONE",
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Context that travels with a command: the instrument and lot size it was
/// decided for, the reference price the stop/target were computed against,
/// and the instrument precision. The consumer orders from this alone, so a
/// config reload between publish and consume cannot change the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceContext {
    pub symbol: String,
    pub lot_size: f64,
    pub price: f64,
    pub digits: u32,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
}

impl PriceContext {
    /// `@price=1950.00@digits=2@sl=1944.15@tp=1961.70@symbol=XAUUSDT@lot=0.05`
    pub fn encode(&self) -> String {
        let d = self.digits as usize;
        let mut out = format!("@price={:.d$}@digits={}", self.price, self.digits);
        if let Some(sl) = self.sl {
            out.push_str(&format!("@sl={sl:.d$}"));
        }
        if let Some(tp) = self.tp {
            out.push_str(&format!("@tp={tp:.d$}"));
        }
        out.push_str(&format!("@symbol={}@lot={}", self.symbol, self.lot_size));
        out
    }

    /// Parse `@key=value` pairs. `price`, `digits`, `symbol` and `lot` are
    /// required; unknown keys are ignored.
    pub fn decode(line: &str) -> Result<Self> {
        let mut price = None;
        let mut digits = None;
        let mut sl = None;
        let mut tp = None;
        let mut symbol = None;
        let mut lot_size = None;

        for pair in line.trim().split('@').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Decode(format!("context entry without '=': '{pair}'")))?;
            let value = value.trim();
            match key.trim() {
                "price" => price = Some(parse_f64(key, value)?),
                "digits" => {
                    digits = Some(value.parse::<u32>().map_err(|_| {
                        Error::Decode(format!("digits is not an integer: '{value}'"))
                    })?)
                }
                "sl" => sl = Some(parse_f64(key, value)?),
                "tp" => tp = Some(parse_f64(key, value)?),
                "symbol" if !value.is_empty() => symbol = Some(value.to_string()),
                "lot" => lot_size = Some(parse_f64(key, value)?),
                _ => {}
            }
        }

        Ok(Self {
            symbol: symbol.ok_or_else(|| Error::Decode("context is missing symbol".into()))?,
            lot_size: lot_size.ok_or_else(|| Error::Decode("context is missing lot".into()))?,
            price: price.ok_or_else(|| Error::Decode("context is missing price".into()))?,
            digits: digits.ok_or_else(|| Error::Decode("context is missing digits".into()))?,
            sl,
            tp,
        })
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| Error::Decode(format!("{key} is not a number: '{value}'")))
}

/// The instruction handed from the decision loop to the actuator.
///
/// Encoded as a two-line record:
/// ```text
/// NEW:LONG SL 1944.15 TP 1961.70
/// @price=1950.00@digits=2@sl=1944.15@tp=1961.70@symbol=XAUUSDT@lot=0.05
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub state: CommandState,
    pub intent_text: String,
    pub context: PriceContext,
}

impl Command {
    pub fn new(intent_text: impl Into<String>, context: PriceContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: CommandState::New,
            intent_text: intent_text.into(),
            context,
        }
    }

    /// The same command marked as processed. Text and context are unchanged.
    pub fn done(&self) -> Self {
        Self {
            state: CommandState::Done,
            ..self.clone()
        }
    }

    pub fn is_new(&self) -> bool {
        self.state == CommandState::New
    }

    /// First line of the record, e.g. `NEW:LONG SL 1944.15 TP 1961.70`.
    pub fn header(&self) -> String {
        format!("{}:{}", self.state.tag(), self.intent_text)
    }

    pub fn encode(&self) -> String {
        format!("{}\n{}\n", self.header(), self.context.encode())
    }

    /// Decode a record. The id is not part of the wire format and must be
    /// supplied by the caller.
    pub fn decode(id: Uuid, record: &str) -> Result<Self> {
        let mut lines = record.lines().map(str::trim).filter(|l| !l.is_empty());
        let header = lines
            .next()
            .ok_or_else(|| Error::Decode("empty command record".into()))?;
        let (tag, text) = header
            .split_once(':')
            .ok_or_else(|| Error::Decode(format!("missing state tag in '{header}'")))?;
        let state = match tag.trim() {
            "NEW" => CommandState::New,
            "DONE" => CommandState::Done,
            other => return Err(Error::Decode(format!("unknown state tag '{other}'"))),
        };
        let context_line = lines
            .next()
            .ok_or_else(|| Error::Decode("missing price context line".into()))?;

        Ok(Self {
            id,
            state,
            intent_text: text.trim().to_string(),
            context: PriceContext::decode(context_line)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PriceContext {
        PriceContext {
            symbol: "XAUUSDT".into(),
            lot_size: 0.05,
            price: 1950.0,
            digits: 2,
            sl: Some(1944.15),
            tp: Some(1961.7),
        }
    }

    #[test]
    fn encodes_two_line_record() {
        let cmd = Command::new("LONG SL 1944.15 TP 1961.70", context());
        assert_eq!(
            cmd.encode(),
            "NEW:LONG SL 1944.15 TP 1961.70\n@price=1950.00@digits=2@sl=1944.15@tp=1961.70@symbol=XAUUSDT@lot=0.05\n"
        );
    }

    #[test]
    fn new_then_done_round_trips_text_and_context() {
        let cmd = Command::new("LONG SL 1944.15 TP 1961.70", context());
        let read = Command::decode(cmd.id, &cmd.encode()).unwrap();
        assert_eq!(read, cmd);

        let done = read.done();
        let reread = Command::decode(cmd.id, &done.encode()).unwrap();
        assert_eq!(reread.state, CommandState::Done);
        assert_eq!(reread.intent_text, cmd.intent_text);
        assert_eq!(reread.context, cmd.context);
    }

    #[test]
    fn context_without_levels_omits_keys() {
        let ctx = PriceContext {
            symbol: "EURUSDT".into(),
            lot_size: 10.0,
            price: 1.08505,
            digits: 5,
            sl: None,
            tp: None,
        };
        assert_eq!(ctx.encode(), "@price=1.08505@digits=5@symbol=EURUSDT@lot=10");
        assert_eq!(PriceContext::decode(&ctx.encode()).unwrap(), ctx);
    }

    #[test]
    fn decode_ignores_unknown_keys() {
        let ctx = PriceContext::decode("@price=10.5@digits=1@spread=3@symbol=BTCUSDT@lot=1").unwrap();
        assert_eq!(ctx.price, 10.5);
        assert_eq!(ctx.digits, 1);
    }

    #[test]
    fn decode_rejects_bad_records() {
        let id = Uuid::new_v4();
        assert!(Command::decode(id, "").is_err());
        let tail = "@symbol=BTCUSDT@lot=1";
        assert!(Command::decode(id, &format!("PENDING:LONG\n@price=1@digits=0{tail}")).is_err());
        assert!(Command::decode(id, "NEW:LONG").is_err());
        assert!(Command::decode(id, &format!("NEW:LONG\n@digits=2{tail}")).is_err());
        assert!(Command::decode(id, &format!("NEW:LONG\n@price=abc@digits=2{tail}")).is_err());
        // The instrument and lot size are part of every record
        assert!(Command::decode(id, "NEW:LONG\n@price=1@digits=0@lot=1").is_err());
        assert!(Command::decode(id, "NEW:LONG\n@price=1@digits=0@symbol=BTCUSDT").is_err());
        assert!(Command::decode(id, "NEW:LONG\n@price=1@digits=0@symbol=@lot=1").is_err());
    }
}
