use common::PriceBar;

/// Average True Range: mean of the last `period` true ranges.
/// Needs `period + 1` bars since every true range looks at the previous close.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    pub period: usize,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    pub fn compute(&self, bars: &[PriceBar]) -> Option<f64> {
        if self.period == 0 || bars.len() < self.period + 1 {
            return None;
        }
        let recent = &bars[bars.len() - self.period - 1..];
        let total: f64 = recent
            .windows(2)
            .map(|w| w[1].true_range(w[0].close))
            .sum();
        Some(total / self.period as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar::new(close, high, low, close, Utc::now())
    }

    #[test]
    fn atr_needs_period_plus_one_bars() {
        let atr = AtrIndicator::new(2);
        assert!(atr.compute(&[bar(2.0, 1.0, 1.5), bar(2.0, 1.0, 1.5)]).is_none());
    }

    #[test]
    fn atr_golden_value() {
        let bars = [
            bar(20.0, 1.0, 9.5),   // outside the period
            bar(10.0, 9.0, 9.5),   // previous close for the first counted bar
            bar(11.0, 10.0, 10.8), // TR = max(1.0, 1.5, 0.5) = 1.5
            bar(10.9, 9.8, 10.0),  // TR = max(1.1, 0.1, 1.0) = 1.1
        ];
        let value = AtrIndicator::new(2).compute(&bars).unwrap();
        assert!((value - 1.3).abs() < 1e-12, "got {value}");
    }
}
