/// Arithmetic mean of the last `period` closes.
pub fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average seeded with the oldest close in `closes`.
///
/// The seed is window-relative: the same bar sequence gives a different EMA
/// when the window is longer or shorter. This differs from a continuously
/// updated EMA and is kept on purpose pending product-owner confirmation.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut value = closes[0];
    for &close in &closes[1..] {
        value = (close - value) * k + value;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_absent_below_period() {
        assert!(sma(&[1.0, 2.0], 3).is_none());
        assert!(sma(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn sma_uses_last_period_closes() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&closes, 3), Some(4.0));
        assert_eq!(sma(&closes, 5), Some(3.0));
    }

    #[test]
    fn ema_golden_value() {
        // k = 0.5: 1 -> 1.5 -> 2.25 -> 3.125 -> 4.0625
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let value = ema(&closes, 3).unwrap();
        assert!((value - 4.0625).abs() < 1e-12, "got {value}");
    }

    #[test]
    fn ema_depends_on_window_start() {
        let long = [10.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let short = &long[1..];
        assert_ne!(ema(&long, 3), ema(short, 3));
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let closes = vec![42.0; 30];
        assert_eq!(ema(&closes, 12), Some(42.0));
    }
}
