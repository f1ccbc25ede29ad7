//! Candle data model and the fixed-capacity sliding window.
//!
//! The window is a ring buffer: one allocation at construction, O(1)
//! eviction of the oldest candle on insert when full. Everything downstream
//! (indicators, levels, scoring) reads only the window's current contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Default window capacity (candles kept per symbol/interval context).
pub const DEFAULT_WINDOW_CAPACITY: usize = 200;

/// One OHLCV aggregate over a fixed time interval. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Typical price (H+L+C)/3, used by CCI and VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Validate OHLCV fields. `prev_timestamp` enforces strictly increasing
    /// ordering within a sequence.
    pub fn validate(
        &self,
        index: usize,
        prev_timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), SignalError> {
        let fields = [self.open, self.high, self.low, self.close];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(SignalError::MalformedRecord {
                index,
                reason: "non-finite OHLC".to_string(),
            });
        }
        if self.volume < 0.0 || !self.volume.is_finite() {
            return Err(SignalError::MalformedRecord {
                index,
                reason: "negative or non-finite volume".to_string(),
            });
        }
        if let Some(prev) = prev_timestamp {
            if self.timestamp <= prev {
                return Err(SignalError::MalformedRecord {
                    index,
                    reason: "non-increasing timestamp".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Fixed-capacity ordered buffer of the most recent candles.
///
/// Backed by a pre-allocated arena plus a head index; `push` never
/// reallocates. Candles are exposed oldest-first.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    arena: Vec<Candle>,
    capacity: usize,
    /// Index of the oldest candle once the arena is full.
    head: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be positive");
        Self {
            arena: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }

    /// Insert a candle, evicting the oldest when at capacity.
    pub fn push(&mut self, candle: Candle) {
        if self.arena.len() < self.capacity {
            self.arena.push(candle);
        } else {
            self.arena[self.head] = candle;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Candle at logical position `i` (0 = oldest). Before the arena fills,
    /// head is 0 and logical position equals physical index.
    pub fn get(&self, i: usize) -> Option<&Candle> {
        if i >= self.arena.len() {
            return None;
        }
        self.arena.get((self.head + i) % self.capacity)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.get(self.len().checked_sub(1)?)
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Candle> + '_ {
        (0..self.len()).map(move |i| self.get(i).expect("index in range"))
    }

    /// Snapshot of the window contents, oldest-first. Evaluations recompute
    /// from this snapshot; nothing downstream holds cross-step state.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.iter().copied().collect()
    }

    /// Close prices, oldest-first.
    pub fn closes(&self) -> Vec<f64> {
        self.iter().map(|c| c.close).collect()
    }

    /// Close of the most recent candle, or 0.0 on an empty window.
    pub fn current_price(&self) -> f64 {
        self.last().map(|c| c.close).unwrap_or(0.0)
    }

    /// Build a full window from a slice, keeping the most recent `capacity`.
    pub fn from_candles(capacity: usize, candles: &[Candle]) -> Self {
        let mut window = Self::new(capacity);
        for candle in candles {
            window.push(*candle);
        }
        window
    }
}

/// Drop malformed candles from a raw sequence, returning the retained
/// candles and the number dropped. Never fails: a bad record is counted,
/// not fatal.
pub fn sanitize_sequence(candles: &[Candle]) -> (Vec<Candle>, usize) {
    let mut retained = Vec::with_capacity(candles.len());
    let mut dropped = 0usize;
    let mut prev_ts: Option<DateTime<Utc>> = None;

    for (i, candle) in candles.iter().enumerate() {
        match candle.validate(i, prev_ts) {
            Ok(()) => {
                prev_ts = Some(candle.timestamp);
                retained.push(*candle);
            }
            Err(e) => {
                tracing::warn!("dropping candle: {e}");
                dropped += 1;
            }
        }
    }

    (retained, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(ts_secs: i64, close: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn window_evicts_oldest_at_capacity() {
        let mut window = CandleWindow::new(3);
        for i in 0..5 {
            window.push(candle(i, 100.0 + i as f64));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.get(0).unwrap().close, 102.0);
        assert_eq!(window.last().unwrap().close, 104.0);
        let closes = window.closes();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn window_orders_oldest_first_before_full() {
        let mut window = CandleWindow::new(10);
        for i in 0..4 {
            window.push(candle(i, 100.0 + i as f64));
        }
        assert_eq!(window.closes(), vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn sanitize_drops_malformed_candles() {
        let mut seq = vec![candle(0, 100.0), candle(60, 101.0)];
        // Non-increasing timestamp.
        seq.push(candle(60, 102.0));
        // Negative volume.
        let mut bad = candle(120, 103.0);
        bad.volume = -5.0;
        seq.push(bad);
        // NaN close.
        let mut nan = candle(180, 104.0);
        nan.close = f64::NAN;
        seq.push(nan);
        seq.push(candle(240, 105.0));

        let (retained, dropped) = sanitize_sequence(&seq);
        assert_eq!(dropped, 3);
        assert_eq!(retained.len(), 3);
        assert_eq!(retained.last().unwrap().close, 105.0);
    }
}
