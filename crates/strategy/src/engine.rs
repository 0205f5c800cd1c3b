use common::{IndicatorSnapshot, MaKey, PriceBar, SnapshotPair};

use crate::config::IndicatorConfig;
use crate::indicators::{ema, sma, AtrIndicator, BollingerIndicator, MacdIndicator, RsiIndicator};

/// Computes indicator snapshots from a bar window according to the enabled
/// indicator set.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Snapshot over the full window and over the window without its most
    /// recent bar.
    pub fn snapshots(&self, bars: &[PriceBar]) -> SnapshotPair {
        let previous = match bars.split_last() {
            Some((_, rest)) => self.snapshot(rest),
            None => IndicatorSnapshot::default(),
        };
        SnapshotPair {
            current: self.snapshot(bars),
            previous,
        }
    }

    /// Every value is computed independently; one that lacks data is simply
    /// absent.
    pub fn snapshot(&self, bars: &[PriceBar]) -> IndicatorSnapshot {
        let mut snap = IndicatorSnapshot {
            close: bars.last().map(|b| b.close),
            ..Default::default()
        };
        let cfg = &self.config;
        if !cfg.enabled || bars.is_empty() {
            return snap;
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        for key in cfg.ma_keys() {
            let value = match key {
                MaKey::Sma(period) => sma(&closes, period),
                MaKey::Ema(period) => ema(&closes, period),
            };
            if let Some(v) = value {
                snap.moving_averages.insert(key, v);
            }
        }
        if cfg.rsi.enabled {
            snap.rsi = RsiIndicator::new(cfg.rsi.period).compute(&closes);
        }
        if cfg.macd.enabled {
            snap.macd = MacdIndicator::new(cfg.macd.fast, cfg.macd.slow).compute(&closes);
        }
        if cfg.bollinger.enabled {
            snap.bollinger =
                BollingerIndicator::new(cfg.bollinger.period, cfg.bollinger.k).compute(&closes);
        }
        if cfg.atr.enabled {
            snap.atr = AtrIndicator::new(cfg.atr.period).compute(bars);
        }
        snap
    }
}
