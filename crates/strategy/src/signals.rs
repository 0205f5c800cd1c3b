use common::{Bias, IndicatorSnapshot, PriceBar, Signal, SignalKind, SnapshotPair};

use crate::config::SignalConfig;

/// Turns a snapshot pair plus the bar window into labeled evidence.
///
/// Signals are appended in detector order. There is no scoring or conflict
/// resolution: opposing signals in one cycle are all reported.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    config: SignalConfig,
}

impl SignalDetector {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, pair: &SnapshotPair, bars: &[PriceBar]) -> Vec<Signal> {
        let mut out = Vec::new();
        let cfg = &self.config;

        if cfg.crossover {
            self.crossovers(pair, &mut out);
        }
        if cfg.rsi {
            self.rsi(pair, &mut out);
        }
        if cfg.macd_bias {
            macd_bias(&pair.current, &mut out);
        }
        if cfg.bollinger_touch {
            bollinger_touch(&pair.current, &mut out);
        }
        if cfg.breakout {
            self.breakout(bars, &mut out);
        }
        if cfg.pullback {
            self.pullback(bars, &mut out);
        }
        out
    }

    fn crossovers(&self, pair: &SnapshotPair, out: &mut Vec<Signal>) {
        let (cur, prev) = (&pair.current, &pair.previous);
        for &(fast, slow) in &self.config.crossover_pairs {
            let (Some(pf), Some(ps), Some(cf), Some(cs)) =
                (prev.ma(fast), prev.ma(slow), cur.ma(fast), cur.ma(slow))
            else {
                continue;
            };
            if pf <= ps && cf > cs {
                out.push(Signal::new(
                    SignalKind::Crossover,
                    format!("{fast} crossed above {slow} (golden cross)"),
                    Bias::Long,
                ));
            } else if pf >= ps && cf < cs {
                out.push(Signal::new(
                    SignalKind::Crossover,
                    format!("{fast} crossed below {slow} (death cross)"),
                    Bias::Short,
                ));
            }
        }
    }

    fn rsi(&self, pair: &SnapshotPair, out: &mut Vec<Signal>) {
        let Some(rsi) = pair.current.rsi else {
            return;
        };
        let (low, high) = (self.config.rsi_oversold, self.config.rsi_overbought);

        if rsi < low {
            out.push(Signal::new(
                SignalKind::RsiOversold,
                format!("RSI oversold ({rsi:.1} < {low})"),
                Bias::Long,
            ));
        } else if rsi > high {
            out.push(Signal::new(
                SignalKind::RsiOverbought,
                format!("RSI overbought ({rsi:.1} > {high})"),
                Bias::Short,
            ));
        }

        if let Some(prev) = pair.previous.rsi {
            if prev < low && rsi >= low {
                out.push(Signal::new(
                    SignalKind::RsiRecovery,
                    format!("RSI recovered above {low} ({prev:.1} -> {rsi:.1})"),
                    Bias::Long,
                ));
            } else if prev > high && rsi <= high {
                out.push(Signal::new(
                    SignalKind::RsiRecovery,
                    format!("RSI fell back below {high} ({prev:.1} -> {rsi:.1})"),
                    Bias::Short,
                ));
            }
        }
    }

    /// Needs `lookback + 1` bars: the current one plus the reference range.
    fn breakout(&self, bars: &[PriceBar], out: &mut Vec<Signal>) {
        let lookback = self.config.breakout_lookback;
        if lookback == 0 || bars.len() < lookback + 1 {
            return;
        }
        let Some((current, rest)) = bars.split_last() else {
            return;
        };
        let Some((high, low)) = close_range(&rest[rest.len() - lookback..]) else {
            return;
        };

        if current.close > high && current.close > current.open {
            out.push(Signal::new(
                SignalKind::Breakout,
                format!(
                    "Breakout up: close {} above {lookback}-bar high {high}",
                    current.close
                ),
                Bias::Long,
            ));
        } else if current.close < low && current.close < current.open {
            out.push(Signal::new(
                SignalKind::Breakout,
                format!(
                    "Breakout down: close {} below {lookback}-bar low {low}",
                    current.close
                ),
                Bias::Short,
            ));
        }
    }

    /// Close held just beyond an earlier breakout level, within tolerance.
    fn pullback(&self, bars: &[PriceBar], out: &mut Vec<Signal>) {
        let cfg = &self.config;
        if bars.len() < cfg.pullback_min_bars.max(cfg.pullback_lookback) {
            return;
        }
        if cfg.pullback_exclude >= cfg.pullback_lookback {
            return;
        }
        let Some(current) = bars.last() else {
            return;
        };
        let window = &bars[bars.len() - cfg.pullback_lookback..];
        let reference = &window[..window.len() - cfg.pullback_exclude];
        let Some((high, low)) = close_range(reference) else {
            return;
        };
        let tol = cfg.pullback_tolerance_pct / 100.0;
        let close = current.close;

        if close > high && close <= high * (1.0 + tol) {
            out.push(Signal::new(
                SignalKind::Pullback,
                format!("Pullback holds above breakout level {high} (close {close})"),
                Bias::Long,
            ));
        } else if close < low && close >= low * (1.0 - tol) {
            out.push(Signal::new(
                SignalKind::Pullback,
                format!("Pullback holds below breakdown level {low} (close {close})"),
                Bias::Short,
            ));
        }
    }
}

fn macd_bias(cur: &IndicatorSnapshot, out: &mut Vec<Signal>) {
    let Some(macd) = cur.macd else {
        return;
    };
    if macd.fast > macd.slow {
        out.push(Signal::new(
            SignalKind::MacdBias,
            format!("MACD bullish (line {:.5})", macd.line),
            Bias::Long,
        ));
    } else {
        out.push(Signal::new(
            SignalKind::MacdBias,
            format!("MACD bearish (line {:.5})", macd.line),
            Bias::Short,
        ));
    }
}

fn bollinger_touch(cur: &IndicatorSnapshot, out: &mut Vec<Signal>) {
    let (Some(bb), Some(close)) = (cur.bollinger, cur.close) else {
        return;
    };
    if close < bb.lower {
        out.push(Signal::new(
            SignalKind::BollingerTouch,
            format!("Close {close} below lower Bollinger band {:.5}", bb.lower),
            Bias::Long,
        ));
    } else if close > bb.upper {
        out.push(Signal::new(
            SignalKind::BollingerTouch,
            format!("Close {close} above upper Bollinger band {:.5}", bb.upper),
            Bias::Short,
        ));
    }
}

/// (max close, min close), or `None` for an empty slice.
fn close_range(bars: &[PriceBar]) -> Option<(f64, f64)> {
    let first = bars.first()?.close;
    Some(bars.iter().fold((first, first), |(hi, lo), b| {
        (hi.max(b.close), lo.min(b.close))
    }))
}
