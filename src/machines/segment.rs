//! Segment classifier
//!
//! Per-timeframe regime state machine over the `dea` line. Transitions are
//! committed only on closed candles and use confirmation-bar hysteresis, so
//! a single-bar cross never flips the regime on its own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::crown::{ConfirmationSource, CrownPhase};
use super::helpers::crossed_above;
use crate::params::{StrategyParams, TieBreak};

// ============================================================
// SEGMENT STATE
// ============================================================

/// Momentum regime of one timeframe.
///
/// Exactly one state is active per timeframe at any time. `Unknown` is the
/// insufficient-history state: it is reported until the first candle of the
/// timeframe has been accepted, and no signal is produced from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    #[default]
    Unknown,
    /// `dea` above zero and confirmed.
    Uptrend,
    /// `dea` dropped back to or below zero; fixed-duration holding state.
    Transition,
    /// `dea` above the negative threshold but still at or below zero,
    /// trying to reclaim the zero axis.
    BreakthroughAttempt,
    /// `dea` below zero and committed.
    Downtrend,
}

impl SegmentState {
    /// True for the regimes in which Long entries are considered.
    #[inline]
    pub fn is_rising(self) -> bool {
        matches!(self, SegmentState::Uptrend | SegmentState::BreakthroughAttempt)
    }

    #[inline]
    pub fn is_falling(self) -> bool {
        matches!(self, SegmentState::Downtrend)
    }
}

/// Closed-candle values the classifier reads.
///
/// `prev_dea` is `None` on the first accepted candle of a timeframe;
/// crossing triggers cannot fire without it.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInput {
    pub dea: f64,
    pub prev_dea: Option<f64>,
}

// ============================================================
// TRANSITION FUNCTION
// ============================================================

/// Advance the segment state machine by one closed candle.
///
/// Pure function of its inputs: the caller threads the returned
/// `(state, counter)` back in on the next candle. The counter is scoped to
/// the state that produced it and is reset on every state switch:
///
/// - `Downtrend`: consecutive candles with `dea > 0` so far.
/// - `Transition`: candles elapsed since entering the holding state.
/// - `BreakthroughAttempt`: candles elapsed since the attempt started.
/// - `Uptrend` / `Unknown`: unused, always zero.
///
/// The crown sub-machine is consulted as a read-only corroborating signal:
/// with `require_crown` set, an `Uptrend` commit is held back while the
/// crown phase is `Expired`.
pub fn classify_segment<C: ConfirmationSource>(
    state: SegmentState,
    counter: u32,
    input: SegmentInput,
    crown: &C,
    params: &StrategyParams,
) -> (SegmentState, u32) {
    let dea = input.dea;
    let vetoed = params.require_crown && crown.confirmation() == CrownPhase::Expired;

    let (next, next_counter) = match state {
        // First accepted candle seeds the regime from the dea sign alone.
        SegmentState::Unknown => {
            if dea > 0.0 {
                (SegmentState::Uptrend, 0)
            } else {
                (SegmentState::Downtrend, 0)
            }
        },

        SegmentState::Uptrend => {
            if dea <= 0.0 {
                (SegmentState::Transition, 0)
            } else {
                (SegmentState::Uptrend, 0)
            }
        },

        SegmentState::Transition => {
            let breakthrough = entered_breakthrough(input, params);
            if dea > 0.0 {
                // Zero-cross outranks both the threshold trigger and the
                // delay expiry; the delay counter is discarded.
                (SegmentState::Uptrend, 0)
            } else if breakthrough {
                (SegmentState::BreakthroughAttempt, 0)
            } else if counter + 1 >= params.delay_bars.get() {
                (SegmentState::Downtrend, 0)
            } else {
                (SegmentState::Transition, counter + 1)
            }
        },

        SegmentState::BreakthroughAttempt => {
            let reclaimed = dea > 0.0 && !vetoed;
            let fell_back = dea <= params.below_zero_threshold;
            let timed_out = counter + 1 >= params.below_zero_timeout.get();

            match params.tie_break {
                TieBreak::ZeroCrossFirst => {
                    if reclaimed {
                        (SegmentState::Uptrend, 0)
                    } else if fell_back || timed_out {
                        (SegmentState::Downtrend, 0)
                    } else {
                        (SegmentState::BreakthroughAttempt, counter + 1)
                    }
                },
                TieBreak::ThresholdFirst => {
                    if fell_back || timed_out {
                        (SegmentState::Downtrend, 0)
                    } else if reclaimed {
                        (SegmentState::Uptrend, 0)
                    } else {
                        (SegmentState::BreakthroughAttempt, counter + 1)
                    }
                },
            }
        },

        SegmentState::Downtrend => {
            if dea > 0.0 {
                let streak = counter + 1;
                if streak >= params.min_downtrend_bars.get() && !vetoed {
                    (SegmentState::Uptrend, 0)
                } else {
                    // Pending confirmation: stay put, keep counting.
                    (SegmentState::Downtrend, streak)
                }
            } else if entered_breakthrough(input, params) {
                (SegmentState::BreakthroughAttempt, 0)
            } else {
                (SegmentState::Downtrend, 0)
            }
        },
    };

    if next != state {
        debug!(from = ?state, to = ?next, dea, "segment transition");
    }

    (next, next_counter)
}

/// Breakthrough entry is a crossing: previous `dea` at or below the
/// threshold, current `dea` above it but still at or below zero.
#[inline]
fn entered_breakthrough(input: SegmentInput, params: &StrategyParams) -> bool {
    input.dea <= 0.0 && crossed_above(input.prev_dea, input.dea, params.below_zero_threshold)
}

// ============================================================
// TESTS
// ============================================================
