use std::path::Path;
use std::time::Duration;

use common::{Error, MaKey, Result, RiskConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trading configuration file (TOML), re-read by the control loop while the
/// engine runs.
///
/// Example `config/trading.toml`:
/// ```toml
/// symbol = "BTCUSDT"
/// lot_size = 0.001
/// interval_secs = 5
///
/// [strategy]
/// long = "Go long when price pulls back to SMA20 in an uptrend"
/// short = "Go short when RSI rolls over from overbought"
///
/// [risk]
/// max_positions = 1
/// long = { stop_pct = 0.3, target_pct = 0.6 }
/// short = { stop_pct = 0.3, target_pct = 0.6 }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradingConfig {
    /// Instrument identifier, e.g. "BTCUSDT". Empty until configured.
    #[serde(default)]
    pub symbol: String,
    /// Order volume in base asset units.
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
    /// Seconds between decision cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    #[serde(default = "default_timeframe_minutes")]
    pub timeframe_minutes: u32,
    /// Bars fetched per cycle (window capacity).
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,
    #[serde(default)]
    pub strategy: StrategyText,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default)]
    pub order_book: OrderBookConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
}

/// Longest accepted pause between decision cycles.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

fn default_lot_size() -> f64 {
    0.01
}
fn default_interval_secs() -> f64 {
    5.0
}
fn default_timeframe_minutes() -> u32 {
    1
}
fn default_candle_count() -> usize {
    200
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            lot_size: default_lot_size(),
            interval_secs: default_interval_secs(),
            timeframe_minutes: default_timeframe_minutes(),
            candle_count: default_candle_count(),
            strategy: StrategyText::default(),
            risk: RiskConfig::default(),
            indicators: IndicatorConfig::default(),
            signals: SignalConfig::default(),
            order_book: OrderBookConfig::default(),
            decision: DecisionConfig::default(),
        }
    }
}

/// Free-text strategy descriptions handed to the decision-maker.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StrategyText {
    pub long: String,
    pub short: String,
    /// Additional rules appended to every prompt.
    pub rules: String,
}

impl StrategyText {
    pub fn is_empty(&self) -> bool {
        self.long.trim().is_empty() && self.short.trim().is_empty()
    }
}

// ─── Indicators ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Master switch; when off every snapshot is empty.
    pub enabled: bool,
    pub sma: Vec<usize>,
    pub ema: Vec<usize>,
    pub rsi: RsiConfig,
    pub macd: MacdConfig,
    pub bollinger: BollingerConfig,
    pub atr: AtrConfig,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sma: vec![5, 10, 20, 50],
            ema: Vec::new(),
            rsi: RsiConfig::default(),
            macd: MacdConfig::default(),
            bollinger: BollingerConfig::default(),
            atr: AtrConfig::default(),
        }
    }
}

impl IndicatorConfig {
    /// Moving average series this configuration computes.
    pub fn ma_keys(&self) -> Vec<MaKey> {
        self.sma
            .iter()
            .map(|&p| MaKey::Sma(p))
            .chain(self.ema.iter().map(|&p| MaKey::Ema(p)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RsiConfig {
    pub enabled: bool,
    pub period: usize,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MacdConfig {
    pub enabled: bool,
    pub fast: usize,
    pub slow: usize,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast: 12,
            slow: 26,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BollingerConfig {
    pub enabled: bool,
    pub period: usize,
    pub k: f64,
}

impl Default for BollingerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: 20,
            k: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AtrConfig {
    pub enabled: bool,
    pub period: usize,
}

impl Default for AtrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 14,
        }
    }
}

// ─── Signals ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalConfig {
    pub crossover: bool,
    /// (fast, slow) pairs checked for crossovers. Pairs whose series are not
    /// computed are skipped.
    pub crossover_pairs: Vec<(MaKey, MaKey)>,
    pub rsi: bool,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_bias: bool,
    pub bollinger_touch: bool,
    pub breakout: bool,
    pub breakout_lookback: usize,
    pub pullback: bool,
    pub pullback_lookback: usize,
    /// Most recent bars left out of the pullback reference range.
    pub pullback_exclude: usize,
    pub pullback_min_bars: usize,
    /// Pullback tolerance in percent of the breakout level.
    pub pullback_tolerance_pct: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        use MaKey::{Ema, Sma};
        Self {
            crossover: true,
            crossover_pairs: vec![
                (Sma(5), Sma(10)),
                (Sma(5), Sma(20)),
                (Sma(5), Sma(50)),
                (Sma(5), Sma(200)),
                (Sma(10), Sma(20)),
                (Sma(10), Sma(50)),
                (Sma(10), Sma(200)),
                (Sma(20), Sma(50)),
                (Sma(20), Sma(200)),
                (Sma(50), Sma(200)),
                (Ema(12), Ema(26)),
            ],
            rsi: true,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_bias: true,
            bollinger_touch: true,
            breakout: true,
            breakout_lookback: 20,
            pullback: true,
            pullback_lookback: 25,
            pullback_exclude: 5,
            pullback_min_bars: 30,
            pullback_tolerance_pct: 0.5,
        }
    }
}

// ─── Order book / decision ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrderBookConfig {
    pub enabled: bool,
    pub depth: usize,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            depth: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    /// Local LLM served by Ollama.
    Ollama,
    /// Deterministic vote over detected signals.
    Rules,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub kind: DecisionKind,
    /// Previous decisions included in the prompt.
    pub history_len: usize,
    pub timeout_secs: u64,
    /// Signal vote margin the rules decision-maker needs before acting.
    pub min_margin: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            kind: DecisionKind::Rules,
            history_len: 10,
            timeout_secs: 60,
            min_margin: 2,
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl TradingConfig {
    /// Read and validate the config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), symbol = %config.symbol, "Trading config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lot_size.is_finite() || self.lot_size <= 0.0 {
            return Err(Error::Config("lot_size must be a positive number".into()));
        }
        if !self.interval_secs.is_finite()
            || self.interval_secs <= 0.0
            || self.interval_secs > MAX_INTERVAL_SECS
        {
            return Err(Error::Config(format!(
                "interval_secs must be in (0, {MAX_INTERVAL_SECS}]"
            )));
        }
        if self.timeframe_minutes == 0 {
            return Err(Error::Config("timeframe_minutes must be positive".into()));
        }
        if self.candle_count < 2 {
            return Err(Error::Config("candle_count must be at least 2".into()));
        }
        let macd = &self.indicators.macd;
        if macd.enabled && macd.fast >= macd.slow {
            return Err(Error::Config(format!(
                "macd.fast ({}) must be smaller than macd.slow ({})",
                macd.fast, macd.slow
            )));
        }
        if self.decision.timeout_secs == 0 {
            return Err(Error::Config("decision.timeout_secs must be positive".into()));
        }
        let signals = &self.signals;
        if signals.rsi_oversold >= signals.rsi_overbought {
            return Err(Error::Config(
                "rsi_oversold must be below rsi_overbought".into(),
            ));
        }
        Ok(())
    }

    /// Pause between decision cycles. Falls back to the default for a value
    /// that bypassed `validate`.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_interval_secs()))
    }

    /// Why the engine cannot enter monitoring mode yet, if anything is missing.
    pub fn monitor_blocker(&self) -> Option<&'static str> {
        if self.symbol.trim().is_empty() {
            return Some("no trading symbol configured");
        }
        if self.decision.kind == DecisionKind::Ollama && self.strategy.is_empty() {
            return Some("no long or short strategy configured");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = TradingConfig::from_toml_str("").unwrap();
        assert_eq!(config, TradingConfig::default());
        assert_eq!(config.indicators.sma, vec![5, 10, 20, 50]);
        assert!(config.indicators.rsi.enabled);
        assert!(!config.indicators.atr.enabled);
        assert_eq!(config.signals.crossover_pairs.len(), 11);
        assert_eq!(config.risk.max_positions, 1);
    }

    #[test]
    fn parses_full_file() {
        let config = TradingConfig::from_toml_str(
            r#"
            symbol = "BTCUSDT"
            lot_size = 0.002
            interval_secs = 2.5

            [strategy]
            long = "buy dips"

            [risk]
            max_positions = 2
            long = { stop_pct = 0.3, target_pct = 0.6 }

            [indicators]
            sma = [20]
            ema = [12, 26]
            atr = { enabled = true, period = 7 }

            [signals]
            crossover_pairs = [["ema12", "ema26"]]
            breakout = false

            [decision]
            kind = "ollama"
            "#,
        )
        .unwrap();

        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.risk.max_positions, 2);
        assert_eq!(config.risk.long.stop_pct, 0.3);
        assert_eq!(config.risk.short.stop_pct, 0.0);
        assert_eq!(
            config.indicators.ma_keys(),
            vec![MaKey::Sma(20), MaKey::Ema(12), MaKey::Ema(26)]
        );
        assert_eq!(config.indicators.atr.period, 7);
        assert_eq!(
            config.signals.crossover_pairs,
            vec![(MaKey::Ema(12), MaKey::Ema(26))]
        );
        assert!(!config.signals.breakout);
        assert_eq!(config.decision.kind, DecisionKind::Ollama);
        assert!(config.monitor_blocker().is_none());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(TradingConfig::from_toml_str("lot_size = 0").is_err());
        assert!(TradingConfig::from_toml_str("interval_secs = -1").is_err());
        assert!(TradingConfig::from_toml_str("interval_secs = inf").is_err());
        assert!(TradingConfig::from_toml_str("interval_secs = nan").is_err());
        assert!(TradingConfig::from_toml_str("interval_secs = 1e300").is_err());
        assert!(TradingConfig::from_toml_str("lot_size = inf").is_err());
        assert!(TradingConfig::from_toml_str("[decision]\ntimeout_secs = 0").is_err());
        assert!(TradingConfig::from_toml_str("[indicators.macd]\nfast = 26\nslow = 12").is_err());
        assert!(TradingConfig::from_toml_str("[signals]\ncrossover_pairs = [[\"wma\", \"sma5\"]]").is_err());
    }

    #[test]
    fn interval_never_panics() {
        let config = TradingConfig::from_toml_str("interval_secs = 2.5").unwrap();
        assert_eq!(config.interval(), Duration::from_millis(2500));

        let mut config = TradingConfig::default();
        for bad in [f64::INFINITY, f64::NAN, -1.0, 1e300] {
            config.interval_secs = bad;
            assert_eq!(config.interval(), Duration::from_secs(5));
        }
    }

    #[test]
    fn monitor_needs_symbol_and_strategy() {
        let mut config = TradingConfig::default();
        assert_eq!(config.monitor_blocker(), Some("no trading symbol configured"));

        config.symbol = "BTCUSDT".into();
        assert!(config.monitor_blocker().is_none(), "rules need no strategy text");

        config.decision.kind = DecisionKind::Ollama;
        assert_eq!(
            config.monitor_blocker(),
            Some("no long or short strategy configured")
        );
        config.strategy.short = "fade rallies".into();
        assert!(config.monitor_blocker().is_none());
    }

    #[test]
    fn shipped_example_is_valid() {
        let config =
            TradingConfig::from_toml_str(include_str!("../../../config/trading.toml")).unwrap();
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.decision.kind, DecisionKind::Rules);
        assert!(config.order_book.enabled);
        assert!(config.monitor_blocker().is_none());
    }
}
