//! Trade-intent text protocol.
//!
//! Decision-makers answer in free text. [`parse`] picks the first line that
//! carries a direction marker and reads stop/target levels from it,
//! [`resolve`] turns percent levels into prices, and [`render`] produces the
//! canonical form, e.g. `LONG SL 1944.15 TP 1961.70`, which parses back to the
//! same intent.

use common::{Direction, RiskConfig, TradeIntent};

/// Markers matched at the start of a line (after list bullets) or anywhere in
/// it. ASCII markers are compared case-insensitively and must stand as whole
/// words; CJK markers match as plain substrings.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    pub prefix: Vec<String>,
    pub anywhere: Vec<String>,
}

impl MarkerSet {
    fn new(prefix: &[&str], anywhere: &[&str]) -> Self {
        Self {
            prefix: prefix.iter().map(|m| m.to_uppercase()).collect(),
            anywhere: anywhere.iter().map(|m| m.to_uppercase()).collect(),
        }
    }

    /// `line` must already be upper-cased.
    fn matches(&self, line: &str) -> bool {
        self.prefix
            .iter()
            .any(|m| line.starts_with(m.as_str()) && word_end(line, m.len()))
            || self.anywhere.iter().any(|m| find_marker(line, m).is_some())
    }
}

#[derive(Debug, Clone)]
pub struct Markers {
    pub close: MarkerSet,
    pub long: MarkerSet,
    pub short: MarkerSet,
    pub standby: MarkerSet,
    pub stop: Vec<String>,
    pub target: Vec<String>,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            close: MarkerSet::new(
                &["CLOSE"],
                &[
                    "平仓",
                    "CLOSE POSITION",
                    "CLOSE POSITIONS",
                    "CLOSE THE POSITION",
                    "CLOSE ALL",
                ],
            ),
            long: MarkerSet::new(&["做多", "LONG", "BUY"], &[]),
            short: MarkerSet::new(&["做空", "SHORT", "SELL"], &[]),
            standby: MarkerSet::new(&["待机", "STANDBY", "HOLD", "WAIT"], &["不操作", "观望"]),
            stop: ["止损", "STOP LOSS", "STOP-LOSS", "STOPLOSS", "SL"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            target: ["止盈", "TAKE PROFIT", "TAKE-PROFIT", "TAKEPROFIT", "TP"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// A stop or target as written by the decision-maker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Level {
    /// Absolute price, used verbatim.
    Price(f64),
    /// Distance from the reference price in percent.
    Percent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DraftLevels {
    /// Both markers were present; each value is absent if it was malformed.
    Explicit {
        stop: Option<Level>,
        target: Option<Level>,
    },
    /// Either marker was missing; use the configured percentages.
    Configured,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentDraft {
    pub direction: Direction,
    pub levels: DraftLevels,
}

impl IntentDraft {
    pub fn standby() -> Self {
        Self {
            direction: Direction::Standby,
            levels: DraftLevels::Configured,
        }
    }
}

/// Interpret decision text. Lines are scanned in order and the first one
/// carrying a marker decides; text without any marker is Standby.
pub fn parse(text: &str, markers: &Markers) -> IntentDraft {
    for raw in text.lines() {
        let line = strip_bullets(raw).to_uppercase();
        if line.is_empty() {
            continue;
        }

        if markers.close.matches(&line) {
            return IntentDraft::standby();
        }
        let direction = if markers.long.matches(&line) {
            Direction::Long
        } else if markers.short.matches(&line) {
            Direction::Short
        } else if markers.standby.matches(&line) {
            return IntentDraft::standby();
        } else {
            continue;
        };

        let stop = find_level(&line, &markers.stop);
        let target = find_level(&line, &markers.target);
        let levels = match (stop, target) {
            (Some(stop), Some(target)) => DraftLevels::Explicit { stop, target },
            _ => DraftLevels::Configured,
        };
        return IntentDraft { direction, levels };
    }
    IntentDraft::standby()
}

/// Turn a draft into absolute prices. Percent levels are measured from
/// `reference` and rounded to `digits`; a configured percent of zero or less
/// leaves that level absent.
pub fn resolve(draft: &IntentDraft, reference: f64, digits: u32, risk: &RiskConfig) -> TradeIntent {
    let direction = draft.direction;
    let Some(configured) = risk.for_direction(direction) else {
        return TradeIntent::standby();
    };

    let (stop, target) = match draft.levels {
        DraftLevels::Explicit { stop, target } => (stop, target),
        DraftLevels::Configured => (
            Some(Level::Percent(configured.stop_pct)),
            Some(Level::Percent(configured.target_pct)),
        ),
    };

    let stop_price = stop.and_then(|level| match level {
        Level::Price(p) => Some(p),
        Level::Percent(pct) => risk::stop_price(direction, reference, pct, digits),
    });
    let target_price = target.and_then(|level| match level {
        Level::Price(p) => Some(p),
        Level::Percent(pct) => risk::target_price(direction, reference, pct, digits),
    });

    TradeIntent {
        direction,
        stop_price,
        target_price,
    }
}

/// Canonical text, with prices printed at `digits` decimals.
pub fn render(intent: &TradeIntent, digits: u32) -> String {
    let digits = digits as usize;
    let mut out = intent.direction.to_string();
    if !intent.direction.is_actionable() {
        return out;
    }
    if let Some(sl) = intent.stop_price {
        out.push_str(&format!(" SL {sl:.digits$}"));
    }
    if let Some(tp) = intent.target_price {
        out.push_str(&format!(" TP {tp:.digits$}"));
    }
    out
}

// ─── Scanning helpers ────────────────────────────────────────────────────────

fn strip_bullets(line: &str) -> &str {
    line.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '*' | '#' | '>' | '•'))
        .trim_end()
}

/// True when nothing alphabetic follows the marker ending at byte `end`.
fn word_end(line: &str, end: usize) -> bool {
    line[end..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_ascii_alphabetic())
}

/// Byte offset just past the first whole-word occurrence of `marker`.
fn find_marker(line: &str, marker: &str) -> Option<usize> {
    let ascii = marker.is_ascii();
    line.match_indices(marker).find_map(|(start, m)| {
        let end = start + m.len();
        if !ascii {
            return Some(end);
        }
        let before_ok = line[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        (before_ok && word_end(line, end)).then_some(end)
    })
}

/// `None`: no marker on the line. `Some(None)`: marker present but the value
/// is missing or malformed.
fn find_level(line: &str, markers: &[String]) -> Option<Option<Level>> {
    let end = markers.iter().find_map(|m| find_marker(line, m))?;
    Some(read_level(&line[end..]))
}

fn read_level(rest: &str) -> Option<Level> {
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '：' | '=' | '@'));
    let len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let value: f64 = rest[..len].parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }
    if rest[len..].trim_start().starts_with(['%', '％']) {
        Some(Level::Percent(value))
    } else {
        Some(Level::Price(value))
    }
}
