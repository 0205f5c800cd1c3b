use std::collections::VecDeque;

use common::PriceBar;

/// Fixed-capacity chronological bar buffer; the oldest bar is evicted first.
#[derive(Debug, Clone)]
pub struct BarWindow {
    bars: VecDeque<PriceBar>,
    capacity: usize,
}

impl BarWindow {
    pub const DEFAULT_CAPACITY: usize = 200;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the contents with a freshly fetched sequence, keeping only the
    /// most recent `capacity` bars.
    pub fn replace(&mut self, bars: Vec<PriceBar>) {
        let skip = bars.len().saturating_sub(self.capacity);
        self.bars = bars.into_iter().skip(skip).collect();
    }

    /// Change the capacity, evicting the oldest bars if it shrinks.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Contiguous view, oldest first.
    pub fn bars(&mut self) -> &[PriceBar] {
        self.bars.make_contiguous()
    }
}

impl Default for BarWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
