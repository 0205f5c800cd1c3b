use common::MacdValue;

use super::moving_average::ema;

/// MACD (Moving Average Convergence/Divergence), simplified.
///
/// Computes only the instantaneous MACD line = EMA(fast) − EMA(slow) together
/// with both EMAs. No signal line is smoothed.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }

    /// Compute from a slice of close prices (oldest first).
    /// Returns `None` unless both EMAs can be computed.
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValue> {
        let fast = ema(closes, self.fast)?;
        let slow = ema(closes, self.slow)?;
        Some(MacdValue {
            line: fast - slow,
            fast,
            slow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending_up(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    fn trending_down(n: usize) -> Vec<f64> {
        (0..n).map(|i| 200.0 - i as f64 * 0.5).collect()
    }

    #[test]
    fn macd_returns_none_with_insufficient_data() {
        let macd = MacdIndicator::new(12, 26);
        assert!(macd.compute(&[100.0; 25]).is_none());
        assert!(macd.compute(&[100.0; 26]).is_some());
    }

    #[test]
    fn macd_line_is_fast_minus_slow() {
        let macd = MacdIndicator::new(3, 6);
        let closes = trending_up(40);
        let value = macd.compute(&closes).unwrap();
        assert!((value.line - (value.fast - value.slow)).abs() < 1e-12);
        assert_eq!(Some(value.fast), ema(&closes, 3));
        assert_eq!(Some(value.slow), ema(&closes, 6));
    }

    #[test]
    fn macd_positive_in_uptrend_negative_in_downtrend() {
        let macd = MacdIndicator::new(12, 26);
        assert!(macd.compute(&trending_up(60)).unwrap().line > 0.0);
        assert!(macd.compute(&trending_down(60)).unwrap().line < 0.0);
    }
}
