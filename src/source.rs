//! Market-data collaborator interface and retry policy.
//!
//! The core never fetches anything itself: a `MarketDataSource`
//! implementation hands it either a complete candle sequence or a declared
//! failure. Retries with bounded exponential backoff wrap only the
//! collaborator call and share no state with indicator computation.

use std::time::Duration;

use crate::candles::Candle;
use crate::error::SignalError;
use crate::orderbook::OrderBookSnapshot;

/// External data provider for candles and order-book snapshots.
pub trait MarketDataSource {
    /// Ordered candle sequence for (symbol, interval), most recent last.
    fn candles(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>, SignalError>;

    /// Current order-book snapshot for a symbol.
    fn order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, SignalError>;
}

/// Bounded exponential backoff for collaborator calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failures (attempt >= 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled =
            self.base_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Run `operation` up to `max_attempts` times, sleeping between
    /// failures. Exhaustion surfaces as `TransientSourceFailure`, which
    /// callers treat as an empty window.
    pub fn run<T>(
        &self,
        mut operation: impl FnMut() -> Result<T, SignalError>,
    ) -> Result<T, SignalError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts.max(1) {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!("source attempt {attempt}/{} failed: {e}", self.max_attempts);
                    last_error = e.to_string();
                    if attempt < self.max_attempts {
                        std::thread::sleep(self.delay_for(attempt));
                    }
                }
            }
        }
        Err(SignalError::TransientSourceFailure {
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}
