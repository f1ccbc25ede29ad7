//! Order-book snapshot analysis: imbalance, spread, and wall detection.
//!
//! Snapshots come from the market-data collaborator; the pipeline only
//! reads derived scalars (imbalance percent, spread percent) and treats a
//! missing book as "no order-flow input" rather than an error.

use serde::{Deserialize, Serialize};

/// One price level of the book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Bid/ask depth snapshot, best levels first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// Number of levels the imbalance is computed over.
const IMBALANCE_LEVELS: usize = 10;
/// A level this much larger than the local average is a wall.
const WALL_MULTIPLIER: f64 = 1.5;
/// Walls further than this fraction of price are ignored.
const WALL_DISTANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallSide {
    Support,
    Resistance,
}

/// Derived order-book metrics used by scoring and quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAnalysis {
    /// Bid-vs-ask size imbalance over the top levels, percent in [-100, 100].
    pub imbalance_percent: f64,
    /// Best bid/ask spread as a percent of the bid.
    pub spread_percent: f64,
    pub bid_ask_ratio: f64,
    pub wall: Option<(WallSide, f64)>,
}

impl OrderBookSnapshot {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }

    /// Analyze the book relative to the current price. `None` when either
    /// side is empty.
    pub fn analyze(&self, price: f64) -> Option<BookAnalysis> {
        if self.is_empty() {
            return None;
        }

        let bid_volume: f64 = self.bids.iter().take(IMBALANCE_LEVELS).map(|l| l.size).sum();
        let ask_volume: f64 = self.asks.iter().take(IMBALANCE_LEVELS).map(|l| l.size).sum();
        let total = bid_volume + ask_volume;
        let imbalance_percent = if total > 0.0 {
            (bid_volume - ask_volume) / total * 100.0
        } else {
            0.0
        };

        let best_bid = self.bids[0].price;
        let best_ask = self.asks[0].price;
        let spread_percent = if best_bid > 0.0 {
            (best_ask - best_bid) / best_bid * 100.0
        } else {
            0.0
        };

        let bid_ask_ratio = if ask_volume > 0.0 { bid_volume / ask_volume } else { 1.0 };

        let bid_wall = nearest_wall(&self.bids, price, |level| price - level);
        let ask_wall = nearest_wall(&self.asks, price, |level| level - price);
        let wall = match (bid_wall, ask_wall) {
            (Some((bp, bd)), Some((ap, ad))) => {
                if bd <= ad {
                    Some((WallSide::Support, bp))
                } else {
                    Some((WallSide::Resistance, ap))
                }
            }
            (Some((bp, _)), None) => Some((WallSide::Support, bp)),
            (None, Some((ap, _))) => Some((WallSide::Resistance, ap)),
            (None, None) => None,
        };

        Some(BookAnalysis {
            imbalance_percent,
            spread_percent,
            bid_ask_ratio,
            wall,
        })
    }
}

/// Find the nearest level whose size dwarfs the preceding levels' average.
/// `distance` maps a level price to its (signed) distance from the current
/// price; negative distances are behind the price and skipped.
fn nearest_wall(
    levels: &[BookLevel],
    price: f64,
    distance: impl Fn(f64) -> f64,
) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;

    for (i, level) in levels.iter().enumerate().take(20) {
        if level.size <= 0.0 || level.price <= 0.0 {
            continue;
        }
        let avg = if i > 0 {
            let prior = &levels[i.saturating_sub(5)..i];
            prior.iter().map(|l| l.size).sum::<f64>() / prior.len() as f64
        } else {
            level.size
        };
        let dist = distance(level.price);
        if dist < 0.0 || dist > price * WALL_DISTANCE {
            continue;
        }
        if level.size > avg * WALL_MULTIPLIER {
            match best {
                Some((_, d)) if d <= dist => {}
                _ => best = Some((level.price, dist)),
            }
        }
    }

    best
}
