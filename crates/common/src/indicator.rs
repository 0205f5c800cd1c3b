use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Bias;

/// Identifies a moving average series, e.g. `SMA20` or `EMA12`.
///
/// Serialized as its display string so it can key TOML tables and JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MaKey {
    Sma(usize),
    Ema(usize),
}

impl fmt::Display for MaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaKey::Sma(p) => write!(f, "SMA{p}"),
            MaKey::Ema(p) => write!(f, "EMA{p}"),
        }
    }
}

impl FromStr for MaKey {
    type Err = String;

    /// Accepts `sma20`, `SMA20`, `ma20` and `ema12` style names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (ctor, digits): (fn(usize) -> MaKey, &str) = if let Some(rest) = lower.strip_prefix("sma")
        {
            (MaKey::Sma, rest)
        } else if let Some(rest) = lower.strip_prefix("ema") {
            (MaKey::Ema, rest)
        } else if let Some(rest) = lower.strip_prefix("ma") {
            (MaKey::Sma, rest)
        } else {
            return Err(format!("unknown moving average '{s}'"));
        };
        match digits.parse::<usize>() {
            Ok(p) if p > 0 => Ok(ctor(p)),
            _ => Err(format!("invalid moving average period in '{s}'")),
        }
    }
}

impl TryFrom<String> for MaKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MaKey> for String {
    fn from(key: MaKey) -> Self {
        key.to_string()
    }
}

/// Simplified MACD: the difference of two EMAs, without a signal line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub line: f64,
    pub fast: f64,
    pub slow: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Indicator values computed over one bar window.
///
/// Every value is optional: absent means the window was shorter than the
/// indicator's period or the indicator is disabled. Absence is "no evidence",
/// never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub moving_averages: BTreeMap<MaKey, f64>,
    pub rsi: Option<f64>,
    pub macd: Option<MacdValue>,
    pub bollinger: Option<BollingerBands>,
    pub atr: Option<f64>,
    /// Close of the most recent bar in the window.
    pub close: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn ma(&self, key: MaKey) -> Option<f64> {
        self.moving_averages.get(&key).copied()
    }

    pub fn sma(&self, period: usize) -> Option<f64> {
        self.ma(MaKey::Sma(period))
    }

    pub fn ema(&self, period: usize) -> Option<f64> {
        self.ma(MaKey::Ema(period))
    }

    pub fn is_empty(&self) -> bool {
        self.moving_averages.is_empty()
            && self.rsi.is_none()
            && self.macd.is_none()
            && self.bollinger.is_none()
            && self.atr.is_none()
    }

    /// One-line rendering of the present values, used in logs and prompts.
    pub fn summary(&self, digits: usize) -> String {
        let mut parts: Vec<String> = self
            .moving_averages
            .iter()
            .map(|(k, v)| format!("{k}={v:.digits$}"))
            .collect();
        if let Some(rsi) = self.rsi {
            parts.push(format!("RSI={rsi:.1}"));
        }
        if let Some(macd) = self.macd {
            parts.push(format!("MACD={:.digits$}", macd.line));
        }
        if let Some(bb) = self.bollinger {
            parts.push(format!(
                "BB=[{:.digits$}, {:.digits$}, {:.digits$}]",
                bb.lower, bb.middle, bb.upper
            ));
        }
        if let Some(atr) = self.atr {
            parts.push(format!("ATR={atr:.digits$}"));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// The snapshot over the full window and the one over the window without its
/// most recent bar. Crossovers compare the two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPair {
    pub current: IndicatorSnapshot,
    pub previous: IndicatorSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Crossover,
    RsiOversold,
    RsiOverbought,
    RsiRecovery,
    MacdBias,
    BollingerTouch,
    Breakout,
    Pullback,
}

/// One labeled piece of trading evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub label: String,
    pub bias: Bias,
}

impl Signal {
    pub fn new(kind: SignalKind, label: impl Into<String>, bias: Bias) -> Self {
        Self {
            kind,
            label: label.into(),
            bias,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.bias)
    }
}

/// Bid/ask volume balance of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookImbalance {
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Bid share of total volume; 0.5 for an empty book.
    pub bid_ratio: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub bias: Bias,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ma_key_parses_common_spellings() {
        assert_eq!("sma20".parse::<MaKey>().unwrap(), MaKey::Sma(20));
        assert_eq!("MA5".parse::<MaKey>().unwrap(), MaKey::Sma(5));
        assert_eq!("EMA26".parse::<MaKey>().unwrap(), MaKey::Ema(26));
        assert!("wma10".parse::<MaKey>().is_err());
        assert!("sma0".parse::<MaKey>().is_err());
        assert!("sma".parse::<MaKey>().is_err());
    }

    #[test]
    fn ma_key_serializes_as_string() {
        let json = serde_json::to_string(&MaKey::Ema(12)).unwrap();
        assert_eq!(json, "\"EMA12\"");
        let back: MaKey = serde_json::from_str("\"ma50\"").unwrap();
        assert_eq!(back, MaKey::Sma(50));
    }

    #[test]
    fn summary_lists_only_present_values() {
        let mut snap = IndicatorSnapshot::default();
        assert_eq!(snap.summary(2), "none");
        snap.moving_averages.insert(MaKey::Sma(5), 1.23456);
        snap.rsi = Some(55.56);
        assert_eq!(snap.summary(2), "SMA5=1.23, RSI=55.6");
    }
}
