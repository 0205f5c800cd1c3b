use common::BollingerBands;

use super::moving_average::sma;

/// Bollinger Bands: SMA(period) ± k × population standard deviation of the
/// last `period` closes.
#[derive(Debug, Clone)]
pub struct BollingerIndicator {
    pub period: usize,
    pub k: f64,
}

impl BollingerIndicator {
    pub fn new(period: usize, k: f64) -> Self {
        Self { period, k }
    }

    pub fn compute(&self, closes: &[f64]) -> Option<BollingerBands> {
        let middle = sma(closes, self.period)?;
        let window = &closes[closes.len() - self.period..];
        let variance = window
            .iter()
            .map(|c| {
                let diff = c - middle;
                diff * diff
            })
            .sum::<f64>()
            / self.period as f64;
        let band = self.k * variance.sqrt();

        Some(BollingerBands {
            upper: middle + band,
            middle,
            lower: middle - band,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_absent_below_period() {
        let bb = BollingerIndicator::new(20, 2.0);
        assert!(bb.compute(&[1.0; 19]).is_none());
        assert!(bb.compute(&[1.0; 20]).is_some());
    }

    #[test]
    fn bollinger_constant_series_collapses() {
        let bb = BollingerIndicator::new(3, 2.0);
        let bands = bb.compute(&[100.0; 5]).unwrap();
        assert_eq!(bands.upper, 100.0);
        assert_eq!(bands.middle, 100.0);
        assert_eq!(bands.lower, 100.0);
    }

    #[test]
    fn bollinger_golden_value() {
        // Window [3, 4, 5]: mean 4, population variance 2/3
        let bb = BollingerIndicator::new(3, 2.0);
        let bands = bb.compute(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let sigma = (2.0f64 / 3.0).sqrt();
        assert!((bands.middle - 4.0).abs() < 1e-12);
        assert!((bands.upper - (4.0 + 2.0 * sigma)).abs() < 1e-12);
        assert!((bands.lower - (4.0 - 2.0 * sigma)).abs() < 1e-12);
        assert!((bands.upper - 5.632993).abs() < 1e-6);
    }
}
