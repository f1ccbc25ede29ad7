//! Support/resistance detection from the candle window.
//!
//! Combines swing highs/lows, a volume profile, multi-touch levels, and
//! pivot points into one clustered candidate set, then returns the five
//! supports and five resistances nearest to the current price.

use serde::{Deserialize, Serialize};

use crate::candles::{Candle, CandleWindow};

/// Swing neighborhood: a candle is a swing high/low if unexceeded within
/// this many positions on both sides.
pub const SWING_K: usize = 3;

/// How far from the current price (fraction) a level stays relevant.
const RELEVANCE_BAND: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelKind::Support => write!(f, "support"),
            LevelKind::Resistance => write!(f, "resistance"),
        }
    }
}

/// A detected price level. Ephemeral: recomputed per evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
    /// 0.0-1.0, touch count and volume weighted.
    pub strength: f64,
    pub touch_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassicPivots {
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FibonacciPivots {
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CamarillaPivots {
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub r4: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub s4: f64,
}

/// All three pivot methods, derived from the prior period's H/L/C.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PivotSet {
    pub pivot: f64,
    pub classic: ClassicPivots,
    pub fibonacci: FibonacciPivots,
    pub camarilla: CamarillaPivots,
}

/// A high-volume price bucket where the market spent time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsolidationZone {
    pub price: f64,
    pub volume: f64,
    /// Relative volume vs the mean bucket, capped at 3.0.
    pub strength: f64,
}

/// Point of control and value-area bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
}

/// Level detector output for one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelSet {
    /// Nearest-first supports below/around the current price (up to 5).
    pub supports: Vec<Level>,
    /// Nearest-first resistances (up to 5).
    pub resistances: Vec<Level>,
    pub pivots: Option<PivotSet>,
    pub zones: Vec<ConsolidationZone>,
    pub volume_profile: Option<VolumeProfile>,
    /// Round-number levels near the price, diagnostics only.
    pub psychological: Vec<f64>,
    /// Clustering tolerance used for this evaluation.
    pub tolerance: f64,
}

/// Internal candidate before final clustering.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    price: f64,
    strength: f64,
    touches: u32,
}

/// Detect all levels from the window. Returns an empty set when fewer than
/// 2K+1 candles are available; that is a degraded result, not a failure.
pub fn detect(window: &CandleWindow, atr: Option<f64>) -> LevelSet {
    let candles = window.to_vec();
    let price = window.current_price();

    if candles.len() < 2 * SWING_K + 1 || price <= 0.0 {
        return LevelSet::default();
    }

    // Clustering tolerance: half an ATR, floored at 0.1% of price so a dead
    // ATR cannot collapse every level into one cluster.
    let tolerance = atr.unwrap_or(0.0).max(0.0) * 0.5;
    let tolerance = tolerance.max(price * 0.001);

    let (swing_highs, swing_lows) = detect_swings(&candles, tolerance);
    let swing_highs = cluster_strongest(swing_highs, tolerance, price);
    let swing_lows = cluster_strongest(swing_lows, tolerance, price);

    let recent = &candles[candles.len().saturating_sub(100)..];
    let zones = consolidation_zones(recent, tolerance);
    let profile = volume_profile(&candles[candles.len().saturating_sub(50)..], tolerance);
    let touch_levels = multi_touch_levels(recent, tolerance);
    let pivots = pivot_set(&candles);

    // Assemble candidates on each side of the price.
    let below = |p: f64| p < price && p > price * (1.0 - RELEVANCE_BAND);
    let above = |p: f64| p > price && p < price * (1.0 + RELEVANCE_BAND);

    let mut support_candidates: Vec<Candidate> = Vec::new();
    let mut resistance_candidates: Vec<Candidate> = Vec::new();

    support_candidates.extend(swing_lows.iter().copied().filter(|c| below(c.price)));
    resistance_candidates.extend(swing_highs.iter().copied().filter(|c| above(c.price)));

    if let Some(vp) = &profile {
        for p in [vp.val, vp.poc] {
            if below(p) {
                support_candidates.push(Candidate { price: p, strength: 0.8, touches: 1 });
            }
        }
        for p in [vp.vah, vp.poc] {
            if above(p) {
                resistance_candidates.push(Candidate { price: p, strength: 0.8, touches: 1 });
            }
        }
    }

    for candidate in &touch_levels {
        if below(candidate.price) {
            support_candidates.push(*candidate);
        } else if above(candidate.price) {
            resistance_candidates.push(*candidate);
        }
    }

    if let Some(p) = &pivots {
        let pivot_supports = [p.classic.s1, p.classic.s2, p.fibonacci.s1, p.fibonacci.s2, p.camarilla.s1, p.camarilla.s2];
        let pivot_resists = [p.classic.r1, p.classic.r2, p.fibonacci.r1, p.fibonacci.r2, p.camarilla.r1, p.camarilla.r2];
        for s in pivot_supports {
            if s > 0.0 && s < price {
                support_candidates.push(Candidate { price: s, strength: 0.6, touches: 1 });
            }
        }
        for r in pivot_resists {
            if r > price {
                resistance_candidates.push(Candidate { price: r, strength: 0.6, touches: 1 });
            }
        }
    }

    let supports = finalize(support_candidates, tolerance, price, LevelKind::Support);
    let resistances = finalize(resistance_candidates, tolerance, price, LevelKind::Resistance);

    LevelSet {
        supports,
        resistances,
        pivots,
        zones,
        volume_profile: profile,
        psychological: psychological_levels(price),
        tolerance,
    }
}

/// Swing highs and lows with touch counts and volume-weighted strength.
fn detect_swings(
    candles: &[Candle],
    tolerance: f64,
) -> (Vec<Candidate>, Vec<Candidate>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    for i in SWING_K..candles.len() - SWING_K {
        let high = candles[i].high;
        let low = candles[i].low;

        let neighborhood = || (i - SWING_K..=i + SWING_K).filter(move |&j| j != i);

        // A strictly higher neighbor invalidates the swing high; an equal
        // high within tolerance counts as a touch of the same level.
        let is_swing_high = neighborhood().all(|j| candles[j].high <= high);
        if is_swing_high {
            let touches = 1 + neighborhood()
                .filter(|&j| (candles[j].high - high).abs() <= tolerance)
                .count() as u32;
            highs.push(Candidate {
                price: high,
                strength: swing_strength(candles, i, touches),
                touches,
            });
        }

        let is_swing_low = neighborhood().all(|j| candles[j].low >= low);
        if is_swing_low {
            let touches = 1 + neighborhood()
                .filter(|&j| (candles[j].low - low).abs() <= tolerance)
                .count() as u32;
            lows.push(Candidate {
                price: low,
                strength: swing_strength(candles, i, touches),
                touches,
            });
        }
    }

    (highs, lows)
}

/// Strength = 0.3 x normalized touches + 0.7 x relative volume at the swing.
fn swing_strength(candles: &[Candle], i: usize, touches: u32) -> f64 {
    let start = i.saturating_sub(10);
    let end = (i + 10).min(candles.len());
    let max_volume = candles[start..end]
        .iter()
        .map(|c| c.volume)
        .fold(0.0f64, f64::max)
        .max(1e-12);
    let volume_part = (candles[i].volume / max_volume).min(1.0);
    let touch_part = (touches as f64 / 3.0).min(1.0);
    0.3 * touch_part + 0.7 * volume_part
}

/// Merge candidates within `tolerance`, keeping the strongest member of
/// each cluster. Sorting by price first makes the result independent of
/// input order; a strength tie goes to the candidate nearest the current
/// price.
fn cluster_strongest(mut candidates: Vec<Candidate>, tolerance: f64, price: f64) -> Vec<Candidate> {
    if candidates.is_empty() {
        return candidates;
    }
    candidates.sort_by(|a, b| a.price.total_cmp(&b.price));

    let better = |a: &Candidate, b: &Candidate| -> bool {
        match a.strength.total_cmp(&b.strength) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => (a.price - price).abs() < (b.price - price).abs(),
        }
    };

    let mut clusters: Vec<Candidate> = Vec::new();
    let mut anchor = candidates[0];
    let mut best = candidates[0];

    for candidate in candidates.into_iter().skip(1) {
        if (candidate.price - anchor.price).abs() <= tolerance {
            if better(&candidate, &best) {
                best = candidate;
            }
        } else {
            clusters.push(best);
            anchor = candidate;
            best = candidate;
        }
    }
    clusters.push(best);
    clusters
}

/// Levels whose tolerance-rounded high/low was visited 3+ times recently.
fn multi_touch_levels(candles: &[Candle], tolerance: f64) -> Vec<Candidate> {
    use std::collections::BTreeMap;

    let mut touches: BTreeMap<i64, u32> = BTreeMap::new();
    for candle in candles {
        for value in [candle.high, candle.low] {
            let key = (value / tolerance).round() as i64;
            *touches.entry(key).or_insert(0) += 1;
        }
    }

    touches
        .into_iter()
        .filter(|(_, count)| *count >= 3)
        .map(|(key, count)| Candidate {
            price: key as f64 * tolerance,
            strength: 0.5,
            touches: count,
        })
        .collect()
}

/// Bucket recent volume at tolerance width and flag buckets well above the
/// mean. Top five by strength.
fn consolidation_zones(
    candles: &[Candle],
    tolerance: f64,
) -> Vec<ConsolidationZone> {
    use std::collections::BTreeMap;

    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for candle in candles {
        for value in [candle.high, candle.low, candle.close] {
            let key = (value / tolerance).round() as i64;
            *buckets.entry(key).or_insert(0.0) += candle.volume;
        }
    }
    if buckets.is_empty() {
        return Vec::new();
    }

    let mean = buckets.values().sum::<f64>() / buckets.len() as f64;
    if mean <= 0.0 {
        return Vec::new();
    }

    let mut zones: Vec<ConsolidationZone> = buckets
        .into_iter()
        .filter(|(_, volume)| *volume > mean * 1.5)
        .map(|(key, volume)| ConsolidationZone {
            price: key as f64 * tolerance,
            volume,
            strength: (volume / mean).min(3.0),
        })
        .collect();

    zones.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    zones.truncate(5);
    zones
}

/// Volume profile: POC is the max-volume bucket; the value area expands
/// outward from the POC, taking the larger neighbor first, until it holds
/// 68% of total volume.
fn volume_profile(candles: &[Candle], tolerance: f64) -> Option<VolumeProfile> {
    use std::collections::BTreeMap;

    if candles.is_empty() {
        return None;
    }

    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for candle in candles {
        let key = (candle.close / tolerance).round() as i64;
        *buckets.entry(key).or_insert(0.0) += candle.volume;
    }

    let sorted: Vec<(i64, f64)> = buckets.into_iter().collect();
    let total: f64 = sorted.iter().map(|(_, v)| v).sum();
    if total <= 0.0 {
        let price = candles.last()?.close;
        return Some(VolumeProfile { poc: price, vah: price, val: price });
    }

    let poc_idx = sorted
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)?;

    let target = total * 0.68;
    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;
    let mut accumulated = sorted[poc_idx].1;

    while accumulated < target {
        let lower = (low_idx > 0).then(|| sorted[low_idx - 1].1);
        let upper = (high_idx + 1 < sorted.len()).then(|| sorted[high_idx + 1].1);
        match (lower, upper) {
            (None, None) => break,
            (Some(l), None) => {
                low_idx -= 1;
                accumulated += l;
            }
            (None, Some(u)) => {
                high_idx += 1;
                accumulated += u;
            }
            (Some(l), Some(u)) => {
                if l >= u {
                    low_idx -= 1;
                    accumulated += l;
                } else {
                    high_idx += 1;
                    accumulated += u;
                }
            }
        }
    }

    Some(VolumeProfile {
        poc: sorted[poc_idx].0 as f64 * tolerance,
        vah: sorted[high_idx].0 as f64 * tolerance,
        val: sorted[low_idx].0 as f64 * tolerance,
    })
}

/// Classic, Fibonacci and Camarilla pivots from the prior period's H/L/C.
fn pivot_set(candles: &[Candle]) -> Option<PivotSet> {
    let prior = candles.last()?;
    let (high, low, close) = (prior.high, prior.low, prior.close);
    let pivot = (high + low + close) / 3.0;
    let range = high - low;

    Some(PivotSet {
        pivot,
        classic: ClassicPivots {
            r1: 2.0 * pivot - low,
            r2: pivot + range,
            r3: high + 2.0 * (pivot - low),
            s1: 2.0 * pivot - high,
            s2: pivot - range,
            s3: low - 2.0 * (high - pivot),
        },
        fibonacci: FibonacciPivots {
            r1: pivot + 0.382 * range,
            r2: pivot + 0.618 * range,
            r3: pivot + range,
            s1: pivot - 0.382 * range,
            s2: pivot - 0.618 * range,
            s3: pivot - range,
        },
        camarilla: CamarillaPivots {
            r1: close + range * 1.1 / 12.0,
            r2: close + range * 1.1 / 6.0,
            r3: close + range * 1.1 / 4.0,
            r4: close + range * 1.1 / 2.0,
            s1: close - range * 1.1 / 12.0,
            s2: close - range * 1.1 / 6.0,
            s3: close - range * 1.1 / 4.0,
            s4: close - range * 1.1 / 2.0,
        },
    })
}

/// Round-number levels scaled to the price's magnitude, within 10%.
fn psychological_levels(price: f64) -> Vec<f64> {
    let base = if price >= 1000.0 {
        100.0
    } else if price >= 100.0 {
        10.0
    } else if price >= 10.0 {
        1.0
    } else {
        0.1
    };

    let rounded = (price / base).round() * base;
    let mut levels = Vec::new();
    for i in -3i32..=3 {
        let level = rounded + i as f64 * base;
        if level > 0.0 && (level - price).abs() <= price * 0.1 {
            levels.push(level);
        }
    }
    levels.truncate(3);
    levels
}

/// Second clustering pass over the combined candidate set: merge within
/// tolerance by price averaging, then keep the five levels nearest the
/// current price, nearest first.
fn finalize(
    mut candidates: Vec<Candidate>,
    tolerance: f64,
    price: f64,
    kind: LevelKind,
) -> Vec<Level> {
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|a, b| a.price.total_cmp(&b.price));

    let mut merged: Vec<Candidate> = Vec::new();
    let mut current = candidates[0];

    for candidate in candidates.into_iter().skip(1) {
        if (candidate.price - current.price).abs() <= tolerance {
            current = Candidate {
                price: (current.price + candidate.price) / 2.0,
                strength: current.strength.max(candidate.strength),
                touches: current.touches + candidate.touches,
            };
        } else {
            merged.push(current);
            current = candidate;
        }
    }
    merged.push(current);

    merged.sort_by(|a, b| {
        (a.price - price)
            .abs()
            .total_cmp(&(b.price - price).abs())
    });
    merged.truncate(5);

    merged
        .into_iter()
        .map(|c| Level {
            price: c.price,
            kind,
            strength: c.strength.min(1.0),
            touch_count: c.touches,
        })
        .collect()
}
