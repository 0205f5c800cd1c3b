/// RSI (Relative Strength Index) indicator.
///
/// Uses simple averages of the last `period` gains and losses (no Wilder
/// smoothing). Returns `None` until at least `period + 1` closes are available.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
}

impl RsiIndicator {
    pub fn new(period: usize) -> Self {
        Self { period }
    }

    /// Compute RSI from a slice of close prices (oldest first).
    /// The result is always within `[0, 100]`.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        if self.period == 0 || closes.len() < self.period + 1 {
            return None;
        }

        let recent = &closes[closes.len() - self.period - 1..];
        let (gains, losses) = recent
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold((0.0, 0.0), |(g, l), change| {
                if change > 0.0 {
                    (g + change, l)
                } else {
                    (g, l - change)
                }
            });

        let avg_gain = gains / self.period as f64;
        let avg_loss = losses / self.period as f64;

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}
