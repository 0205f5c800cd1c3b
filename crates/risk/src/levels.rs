use common::{Direction, LevelPreview, Quote, RiskConfig};

/// Round to the instrument's price precision.
pub fn round_to_digits(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Stop-loss price `pct` percent away from `reference`, on the losing side.
///
/// `None` for Standby or a non-positive percent.
pub fn stop_price(direction: Direction, reference: f64, pct: f64, digits: u32) -> Option<f64> {
    if pct.is_nan() || pct <= 0.0 {
        return None;
    }
    let offset = pct / 100.0;
    let raw = match direction {
        Direction::Long => reference * (1.0 - offset),
        Direction::Short => reference * (1.0 + offset),
        Direction::Standby => return None,
    };
    Some(round_to_digits(raw, digits))
}

/// Take-profit price `pct` percent away from `reference`, on the winning side.
pub fn target_price(direction: Direction, reference: f64, pct: f64, digits: u32) -> Option<f64> {
    if pct.is_nan() || pct <= 0.0 {
        return None;
    }
    let offset = pct / 100.0;
    let raw = match direction {
        Direction::Long => reference * (1.0 + offset),
        Direction::Short => reference * (1.0 - offset),
        Direction::Standby => return None,
    };
    Some(round_to_digits(raw, digits))
}

/// Configured stop/target prices for both directions at the current quote.
/// Longs reference the ask, shorts the bid.
pub fn preview(quote: &Quote, risk: &RiskConfig) -> LevelPreview {
    let long_ref = quote.reference_price(Direction::Long);
    let short_ref = quote.reference_price(Direction::Short);
    LevelPreview {
        long_stop: stop_price(Direction::Long, long_ref, risk.long.stop_pct, quote.digits),
        long_target: target_price(Direction::Long, long_ref, risk.long.target_pct, quote.digits),
        short_stop: stop_price(Direction::Short, short_ref, risk.short.stop_pct, quote.digits),
        short_target: target_price(
            Direction::Short,
            short_ref,
            risk.short.target_pct,
            quote.digits,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StopTarget;

    #[test]
    fn long_levels_at_two_digits() {
        assert_eq!(stop_price(Direction::Long, 1950.0, 0.3, 2), Some(1944.15));
        assert_eq!(target_price(Direction::Long, 1950.0, 0.6, 2), Some(1961.70));
    }

    #[test]
    fn short_levels_are_mirrored() {
        assert_eq!(stop_price(Direction::Short, 1950.0, 0.3, 2), Some(1955.85));
        assert_eq!(target_price(Direction::Short, 1950.0, 0.6, 2), Some(1938.30));
    }

    #[test]
    fn non_positive_percent_is_absent() {
        assert_eq!(stop_price(Direction::Long, 1950.0, 0.0, 2), None);
        assert_eq!(target_price(Direction::Short, 1950.0, -1.0, 2), None);
        assert_eq!(stop_price(Direction::Standby, 1950.0, 0.3, 2), None);
    }

    #[test]
    fn rounding_respects_digits() {
        assert_eq!(round_to_digits(1.234567, 3), 1.235);
        assert_eq!(round_to_digits(1.234567, 0), 1.0);
        assert_eq!(round_to_digits(0.000_123_45, 6), 0.000123);
    }

    #[test]
    fn preview_uses_direction_aware_reference() {
        let quote = Quote {
            bid: 1949.0,
            ask: 1950.0,
            digits: 2,
        };
        let side = StopTarget {
            stop_pct: 0.3,
            target_pct: 0.6,
        };
        let risk = RiskConfig {
            long: side,
            short: StopTarget {
                stop_pct: 0.0,
                target_pct: 0.6,
            },
            max_positions: 1,
        };
        let p = preview(&quote, &risk);
        assert_eq!(p.long_stop, Some(1944.15));
        assert_eq!(p.long_target, Some(1961.70));
        assert_eq!(p.short_stop, None);
        assert_eq!(p.short_target, Some(1937.31));
    }
}
