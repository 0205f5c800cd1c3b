use common::{Bias, OrderBook, OrderBookImbalance};

/// Bid share above which the book leans long.
pub const BID_HEAVY_RATIO: f64 = 0.6;
/// Bid share below which the book leans short.
pub const ASK_HEAVY_RATIO: f64 = 0.4;

/// Volume balance over the top `depth` levels of each side.
/// An empty book is neutral with a bid ratio of 0.5.
pub fn imbalance(book: &OrderBook, depth: usize) -> OrderBookImbalance {
    let bid_volume: f64 = book.bids.iter().take(depth).map(|l| l.volume).sum();
    let ask_volume: f64 = book.asks.iter().take(depth).map(|l| l.volume).sum();
    let total = bid_volume + ask_volume;

    let bid_ratio = if total > 0.0 { bid_volume / total } else { 0.5 };
    let bias = if bid_ratio > BID_HEAVY_RATIO {
        Bias::Long
    } else if bid_ratio < ASK_HEAVY_RATIO {
        Bias::Short
    } else {
        Bias::Neutral
    };

    OrderBookImbalance {
        bid_volume,
        ask_volume,
        bid_ratio,
        best_bid: book.bids.first().map(|l| l.price),
        best_ask: book.asks.first().map(|l| l.price),
        bias,
    }
}
