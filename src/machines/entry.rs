//! Entry-setup detectors
//!
//! Concrete entry candidates read off the lookback window of one timeframe.
//! A detected setup supplies the entry, stop and price targets for the
//! aggregator's verdict; the cross-timeframe filters still gate whether the
//! verdict is actually emitted.

use serde::{Deserialize, Serialize};

use super::helpers::{crossed_above, crossed_below, is_shrinking};
use crate::params::StrategyParams;
use crate::BarSnapshot;

/// `dea` must sit within this fraction of the window extreme to count as
/// exhausted.
const DEA_EXTREME_FACTOR: f64 = 0.9;

/// Close-to-`ema_long` distance, as a fraction of `ema_long`, inside which
/// price counts as back at the zero axis.
const ZERO_AXIS_PROXIMITY: f64 = 0.01;

/// Bar-range multiple used for the exhaustion setup's stop.
const EXHAUSTION_STOP_RANGE_FACTOR: f64 = 2.0;

// ============================================================
// SETUP TYPES
// ============================================================

/// Entry setups in priority order: exhaustion buys outrank zero-axis buys,
/// which outrank zero-axis sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetupKind {
    /// Falling segment, `dea` near its window extreme, first bullish candle
    /// on a shrinking histogram.
    ExhaustionBuy,
    /// Rising segment with price back at the long EMA shortly after an
    /// upward zero-cross, bullish candle, shrinking histogram.
    ZeroAxisBuy,
    /// Mirror of [`SetupKind::ZeroAxisBuy`] on the short side.
    ZeroAxisSell,
}

impl SetupKind {
    #[inline]
    pub fn is_long(self) -> bool {
        matches!(self, SetupKind::ExhaustionBuy | SetupKind::ZeroAxisBuy)
    }
}

/// A fully priced entry candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySetup {
    pub kind: SetupKind,
    pub entry: f64,
    pub stop_loss: f64,
    /// First objective: the long EMA.
    pub target_near: f64,
    /// Second objective: the previous window high (low for sells).
    pub target_far: f64,
}

// ============================================================
// DETECTION
// ============================================================

/// Scan the window for the highest-priority setup on the latest candle.
///
/// Returns `None` until `min_history` candles have accumulated; a thin
/// window is not enough to call an extreme or a recent zero-cross.
pub fn detect_setup(bars: &[BarSnapshot], params: &StrategyParams) -> Option<EntrySetup> {
    let need = (params.min_history.get() as usize).max(2);
    if bars.len() < need {
        return None;
    }
    let curr = bars.last()?;
    let prev = &bars[bars.len() - 2];

    detect_exhaustion_buy(bars, curr, prev)
        .or_else(|| detect_zero_axis_buy(bars, curr, prev, params))
        .or_else(|| detect_zero_axis_sell(bars, curr, prev, params))
}

fn detect_exhaustion_buy(
    bars: &[BarSnapshot],
    curr: &BarSnapshot,
    prev: &BarSnapshot,
) -> Option<EntrySetup> {
    if curr.dea >= 0.0 {
        return None;
    }

    // dea must be near the window minimum: a shallow dip is not exhaustion.
    let min_dea = bars.iter().map(|b| b.dea).fold(f64::INFINITY, f64::min);
    if curr.dea > min_dea * DEA_EXTREME_FACTOR {
        return None;
    }

    if curr.close <= curr.open || !is_shrinking(prev.histogram, curr.histogram) {
        return None;
    }

    Some(EntrySetup {
        kind: SetupKind::ExhaustionBuy,
        entry: curr.close,
        stop_loss: curr.open - EXHAUSTION_STOP_RANGE_FACTOR * (curr.high - curr.low),
        target_near: curr.ema_long,
        target_far: previous_high(bars),
    })
}

fn detect_zero_axis_buy(
    bars: &[BarSnapshot],
    curr: &BarSnapshot,
    prev: &BarSnapshot,
    params: &StrategyParams,
) -> Option<EntrySetup> {
    if curr.dea <= 0.0 || !near_long_ema(curr) {
        return None;
    }
    if curr.close <= curr.open || !is_shrinking(prev.histogram, curr.histogram) {
        return None;
    }
    if !recent_zero_cross(bars, params, true) {
        return None;
    }

    Some(EntrySetup {
        kind: SetupKind::ZeroAxisBuy,
        entry: curr.close,
        stop_loss: curr.ema_long - params.stop_loss_offset.get(),
        target_near: curr.ema_long,
        target_far: previous_high(bars),
    })
}

fn detect_zero_axis_sell(
    bars: &[BarSnapshot],
    curr: &BarSnapshot,
    prev: &BarSnapshot,
    params: &StrategyParams,
) -> Option<EntrySetup> {
    if curr.dea >= 0.0 || !near_long_ema(curr) {
        return None;
    }
    if curr.close >= curr.open || !is_shrinking(prev.histogram, curr.histogram) {
        return None;
    }
    if !recent_zero_cross(bars, params, false) {
        return None;
    }

    Some(EntrySetup {
        kind: SetupKind::ZeroAxisSell,
        entry: curr.close,
        stop_loss: curr.ema_long + params.stop_loss_offset.get(),
        target_near: curr.ema_long,
        target_far: previous_low(bars),
    })
}

#[inline]
fn near_long_ema(bar: &BarSnapshot) -> bool {
    bar.ema_long.abs() > f64::EPSILON
        && ((bar.close - bar.ema_long) / bar.ema_long).abs() <= ZERO_AXIS_PROXIMITY
}

/// Did `dea` cross the zero axis (upward if `upward`) within the last
/// `min_history` bars?
fn recent_zero_cross(bars: &[BarSnapshot], params: &StrategyParams, upward: bool) -> bool {
    let n = params.min_history.get() as usize;
    let tail = &bars[bars.len().saturating_sub(n)..];
    tail.windows(2).any(|pair| {
        let prev = Some(pair[0].dea);
        if upward {
            crossed_above(prev, pair[1].dea, 0.0)
        } else {
            crossed_below(prev, pair[1].dea, 0.0)
        }
    })
}

fn previous_high(bars: &[BarSnapshot]) -> f64 {
    bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)
}

fn previous_low(bars: &[BarSnapshot]) -> f64 {
    bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min)
}

// ============================================================
// TESTS
// ============================================================
