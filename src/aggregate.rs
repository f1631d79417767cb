//! Multi-timeframe signal aggregation
//!
//! A pure reducer over the per-timeframe states: it reads the snapshot map,
//! the one-way `first_trade_opened` latch and the configuration, and
//! produces a fresh [`SignalVerdict`]. It owns no mutable state and never
//! updates a verdict in place; a new verdict replaces the old one.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::machines::{CrownPhase, EntrySetup, JumpEvent, SegmentState, SetupKind};
use crate::params::StrategyParams;
use crate::Timeframe;

// ============================================================
// SNAPSHOT INPUT
// ============================================================

/// One timeframe's state slot, as read by the aggregator.
///
/// Making the cross-timeframe dependency an explicit data contract: the
/// higher-timeframe filters read named fields out of this struct rather
/// than reaching into shared indicator storage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub timeframe: Timeframe,
    pub segment: SegmentState,
    pub crown: CrownPhase,
    pub jump: Option<JumpEvent>,
    pub setup: Option<EntrySetup>,
    pub close: f64,
    pub prev_close: Option<f64>,
    pub ema_short: f64,
    pub prev_ema_short: Option<f64>,
    pub ema_long: f64,
    pub dif: f64,
    pub dea: f64,
    pub bars_seen: u64,
    /// Open time of the latest accepted candle.
    pub last_open_ms: i64,
}

impl TimeframeSnapshot {
    /// Price crossed from at-or-below to above the short EMA on this candle.
    #[inline]
    pub fn crossed_above_short_ema(&self) -> bool {
        match (self.prev_close, self.prev_ema_short) {
            (Some(pc), Some(pe)) => pc <= pe && self.close > self.ema_short,
            _ => false,
        }
    }

    /// Price crossed from at-or-above to below the short EMA on this candle.
    #[inline]
    pub fn crossed_below_short_ema(&self) -> bool {
        match (self.prev_close, self.prev_ema_short) {
            (Some(pc), Some(pe)) => pc >= pe && self.close < self.ema_short,
            _ => false,
        }
    }

    /// Close time of the latest accepted candle.
    #[inline]
    pub fn last_close_ms(&self) -> i64 {
        self.last_open_ms + self.timeframe.duration_ms()
    }
}

// ============================================================
// VERDICT OUTPUT
// ============================================================

/// Which way the aggregator leans on this pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
    #[default]
    None,
}

/// Near/far price objectives attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceTargets {
    pub near: f64,
    pub far: f64,
}

/// One satisfied condition or blocking observation, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reason {
    TimeframeMissing(Timeframe),
    TimeframeNotCurrent { timeframe: Timeframe, last_close_ms: i64, as_of_ms: i64 },
    InsufficientHistory { timeframe: Timeframe, got: u64, need: u32 },
    SegmentObserved { timeframe: Timeframe, segment: SegmentState },
    CrossedAboveShortEma(Timeframe),
    CrossedBelowShortEma(Timeframe),
    HigherDifWithinCap { timeframe: Timeframe, dif: f64, cap: f64 },
    HigherDifOverCap { timeframe: Timeframe, dif: f64, cap: f64 },
    HigherDeaAboveFloor { timeframe: Timeframe, dea: f64, floor: f64 },
    HigherDeaUnderFloor { timeframe: Timeframe, dea: f64, floor: f64 },
    SetupDetected { timeframe: Timeframe, kind: SetupKind },
    TrailingStopActive { timeframe: Timeframe, level: f64 },
    ShortsNotUnlocked,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::TimeframeMissing(tf) => write!(f, "{tf} has produced no state"),
            Reason::TimeframeNotCurrent { timeframe, last_close_ms, as_of_ms } => write!(
                f,
                "{timeframe} is not current (last close {last_close_ms}, as-of {as_of_ms})"
            ),
            Reason::InsufficientHistory { timeframe, got, need } => {
                write!(f, "{timeframe} has {got} candles, needs {need}")
            },
            Reason::SegmentObserved { timeframe, segment } => {
                write!(f, "{timeframe} segment is {segment:?}")
            },
            Reason::CrossedAboveShortEma(tf) => write!(f, "{tf} close crossed above short EMA"),
            Reason::CrossedBelowShortEma(tf) => write!(f, "{tf} close crossed below short EMA"),
            Reason::HigherDifWithinCap { timeframe, dif, cap } => {
                write!(f, "{timeframe} dif {dif:.1} within cap {cap:.1}")
            },
            Reason::HigherDifOverCap { timeframe, dif, cap } => {
                write!(f, "{timeframe} dif {dif:.1} over cap {cap:.1}")
            },
            Reason::HigherDeaAboveFloor { timeframe, dea, floor } => {
                write!(f, "{timeframe} dea {dea:.1} above floor {floor:.1}")
            },
            Reason::HigherDeaUnderFloor { timeframe, dea, floor } => {
                write!(f, "{timeframe} dea {dea:.1} under floor {floor:.1}")
            },
            Reason::SetupDetected { timeframe, kind } => {
                write!(f, "{timeframe} setup {kind:?}")
            },
            Reason::TrailingStopActive { timeframe, level } => {
                write!(f, "{timeframe} trailing stop at {level:.1}")
            },
            Reason::ShortsNotUnlocked => {
                write!(f, "shorts locked until the first long trade opens")
            },
        }
    }
}

/// The aggregator's output for one pass. Recomputed fresh every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalVerdict {
    pub side: Side,
    /// Decision timeframe the verdict came from, if any.
    pub timeframe: Option<Timeframe>,
    pub entry_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub targets: Option<PriceTargets>,
    /// Satisfied conditions (for entries) or blocking observations (for
    /// `None` verdicts), in evaluation order.
    pub rationale: Vec<Reason>,
}

impl SignalVerdict {
    fn none(rationale: Vec<Reason>) -> Self {
        Self {
            side: Side::None,
            timeframe: None,
            entry_price: None,
            stop_loss_price: None,
            targets: None,
            rationale,
        }
    }

    #[inline]
    pub fn is_actionable(&self) -> bool {
        self.side != Side::None
    }
}

// ============================================================
// REDUCER
// ============================================================

/// Produce a verdict from the per-timeframe state map.
///
/// The most granular qualifying decision timeframe wins; on a single
/// timeframe Long outranks Short. A missing or non-current required
/// timeframe yields a `None` verdict whose rationale names the gap —
/// never a silently substituted default.
pub fn decide(
    snapshots: &BTreeMap<Timeframe, TimeframeSnapshot>,
    as_of_ms: i64,
    first_trade_opened: bool,
    params: &StrategyParams,
) -> SignalVerdict {
    let mut rationale = Vec::new();

    let Some(higher) = current_slot(snapshots, params.higher_timeframe, as_of_ms, &mut rationale)
    else {
        return SignalVerdict::none(rationale);
    };

    let mut decision_tfs = params.decision_timeframes.clone();
    decision_tfs.sort_unstable();

    for tf in decision_tfs {
        let Some(snap) = current_slot(snapshots, tf, as_of_ms, &mut rationale) else {
            continue;
        };

        let need = params.min_history.get();
        if snap.bars_seen < need as u64 {
            rationale.push(Reason::InsufficientHistory {
                timeframe: tf,
                got: snap.bars_seen,
                need,
            });
            continue;
        }

        // Long first: on one timeframe Long outranks Short.
        if snap.segment.is_rising() && snap.crossed_above_short_ema() {
            if higher.dif <= params.higher_tf_long_filter {
                return long_verdict(tf, snap, higher, params);
            }
            rationale.push(Reason::HigherDifOverCap {
                timeframe: higher.timeframe,
                dif: higher.dif,
                cap: params.higher_tf_long_filter,
            });
        }

        if snap.segment.is_falling() && snap.crossed_below_short_ema() {
            if !first_trade_opened {
                rationale.push(Reason::ShortsNotUnlocked);
            } else if higher.dea >= params.higher_tf_short_filter {
                return short_verdict(tf, snap, higher, params);
            } else {
                rationale.push(Reason::HigherDeaUnderFloor {
                    timeframe: higher.timeframe,
                    dea: higher.dea,
                    floor: params.higher_tf_short_filter,
                });
            }
        }

        rationale.push(Reason::SegmentObserved { timeframe: tf, segment: snap.segment });
    }

    SignalVerdict::none(rationale)
}

fn current_slot<'a>(
    snapshots: &'a BTreeMap<Timeframe, TimeframeSnapshot>,
    tf: Timeframe,
    as_of_ms: i64,
    rationale: &mut Vec<Reason>,
) -> Option<&'a TimeframeSnapshot> {
    let Some(snap) = snapshots.get(&tf) else {
        rationale.push(Reason::TimeframeMissing(tf));
        return None;
    };

    let close = snap.last_close_ms();
    let current = close <= as_of_ms && as_of_ms < close + tf.duration_ms();
    if !current {
        rationale.push(Reason::TimeframeNotCurrent {
            timeframe: tf,
            last_close_ms: close,
            as_of_ms,
        });
        return None;
    }

    Some(snap)
}

fn long_verdict(
    tf: Timeframe,
    snap: &TimeframeSnapshot,
    higher: &TimeframeSnapshot,
    params: &StrategyParams,
) -> SignalVerdict {
    let mut rationale = vec![
        Reason::SegmentObserved { timeframe: tf, segment: snap.segment },
        Reason::CrossedAboveShortEma(tf),
        Reason::HigherDifWithinCap {
            timeframe: higher.timeframe,
            dif: higher.dif,
            cap: params.higher_tf_long_filter,
        },
    ];

    let (entry, stop, targets) = match snap.setup.filter(|s| s.kind.is_long()) {
        Some(setup) => {
            rationale.push(Reason::SetupDetected { timeframe: tf, kind: setup.kind });
            (
                setup.entry,
                setup.stop_loss,
                Some(PriceTargets { near: setup.target_near, far: setup.target_far }),
            )
        },
        None => {
            let stop = match snap.jump {
                Some(event) => {
                    rationale.push(Reason::TrailingStopActive {
                        timeframe: tf,
                        level: event.trailing_stop_level,
                    });
                    event.trailing_stop_level
                },
                None => snap.ema_long - params.stop_loss_offset.get(),
            };
            (snap.close, stop, None)
        },
    };

    SignalVerdict {
        side: Side::Long,
        timeframe: Some(tf),
        entry_price: Some(entry),
        stop_loss_price: Some(stop),
        targets,
        rationale,
    }
}

fn short_verdict(
    tf: Timeframe,
    snap: &TimeframeSnapshot,
    higher: &TimeframeSnapshot,
    params: &StrategyParams,
) -> SignalVerdict {
    let mut rationale = vec![
        Reason::SegmentObserved { timeframe: tf, segment: snap.segment },
        Reason::CrossedBelowShortEma(tf),
        Reason::HigherDeaAboveFloor {
            timeframe: higher.timeframe,
            dea: higher.dea,
            floor: params.higher_tf_short_filter,
        },
    ];

    let (entry, stop, targets) = match snap.setup.filter(|s| s.kind == SetupKind::ZeroAxisSell) {
        Some(setup) => {
            rationale.push(Reason::SetupDetected { timeframe: tf, kind: setup.kind });
            (
                setup.entry,
                setup.stop_loss,
                Some(PriceTargets { near: setup.target_near, far: setup.target_far }),
            )
        },
        None => (snap.close, snap.ema_long + params.stop_loss_offset.get(), None),
    };

    SignalVerdict {
        side: Side::Short,
        timeframe: Some(tf),
        entry_price: Some(entry),
        stop_loss_price: Some(stop),
        targets,
        rationale,
    }
}

// ============================================================
// TESTS
// ============================================================
