//! Histogram jump detector
//!
//! Watches an uptrend for a histogram pullback immediately followed by an
//! open-price gap, opens a tracked continuation event when one lands, and
//! manages the event's trailing protective level. The level only ever moves
//! upward; leaving the uptrend discards the event on the next evaluation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::segment::SegmentState;
use crate::params::StrategyParams;
use crate::BarSnapshot;

// ============================================================
// EVENT TYPES
// ============================================================

/// How a jump event was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JumpKind {
    /// Pullback in the positive histogram followed by an open-price gap.
    GapContinuation,
    /// `dea` hugging the zero axis while the negative histogram shrinks;
    /// proximity to the axis stands in for the pullback.
    ZeroAxisReclaim,
}

/// A tracked pullback-then-gap continuation event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JumpEvent {
    pub kind: JumpKind,
    /// Absolute index of the first bar of the pullback run.
    pub pullback_start_index: u64,
    /// Open of the bar that completed the most recent gap.
    pub gap_open: f64,
    /// Open of the bar preceding the gap; the stop hangs off this price.
    pub gap_reference_open: f64,
    /// Protective level; non-decreasing for the lifetime of the event.
    pub trailing_stop_level: f64,
}

/// What the detector observed on this candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JumpSignal {
    /// A new event was opened.
    Opened(JumpEvent),
    /// A subsequent qualifying gap raised the trailing stop.
    StopRaised { event: JumpEvent, previous_level: f64 },
    /// Price closed below the trailing stop; the event is closed out.
    StopHit(JumpEvent),
    /// The segment left `Uptrend`; the event is discarded.
    Abandoned(JumpEvent),
}

// ============================================================
// DETECTOR
// ============================================================

/// Advance jump tracking by one closed candle.
///
/// `bars` is the pipeline's history window, oldest first, with the current
/// candle last. Active only while the segment is `Uptrend`: in any other
/// regime the in-flight event is discarded and nothing new is opened.
pub fn track_jump(
    segment: SegmentState,
    current: Option<JumpEvent>,
    bars: &[BarSnapshot],
    params: &StrategyParams,
) -> (Option<JumpEvent>, Option<JumpSignal>) {
    if segment != SegmentState::Uptrend {
        return match current {
            Some(event) => {
                debug!(kind = ?event.kind, "jump event abandoned with segment");
                (None, Some(JumpSignal::Abandoned(event)))
            },
            None => (None, None),
        };
    }

    let Some((curr, rest)) = bars.split_last() else {
        return (current, None);
    };
    let prev = rest.last();

    // Stop breach closes the event before anything else is considered.
    if let Some(event) = current {
        if curr.close < event.trailing_stop_level {
            debug!(level = event.trailing_stop_level, close = curr.close, "jump stop hit");
            return (None, Some(JumpSignal::StopHit(event)));
        }
    }

    let Some(prev) = prev else {
        return (current, None);
    };

    let offset = params.stop_loss_offset.get();
    let gapped = curr.open > prev.open + params.gap_margin.get()
        && curr.histogram > prev.histogram;

    match current {
        Some(mut event) => {
            // Subsequent qualifying gap: tighten the stop, never loosen it.
            if gapped {
                let candidate = prev.open - offset;
                if candidate > event.trailing_stop_level {
                    let previous_level = event.trailing_stop_level;
                    event.gap_open = curr.open;
                    event.gap_reference_open = prev.open;
                    event.trailing_stop_level = candidate;
                    debug!(from = previous_level, to = candidate, "jump stop raised");
                    return (Some(event), Some(JumpSignal::StopRaised { event, previous_level }));
                }
            }
            (Some(event), None)
        },
        None => {
            if gapped {
                if let Some(start) = pullback_start(bars) {
                    let event = JumpEvent {
                        kind: JumpKind::GapContinuation,
                        pullback_start_index: start,
                        gap_open: curr.open,
                        gap_reference_open: prev.open,
                        trailing_stop_level: prev.open - offset,
                    };
                    debug!(start, open = curr.open, "jump event opened");
                    return (Some(event), Some(JumpSignal::Opened(event)));
                }
            }

            // Zero-axis variant: dea near zero with the negative histogram
            // shrinking in magnitude; no prior pullback required.
            if curr.dea.abs() <= params.zero_axis_threshold.get()
                && curr.histogram < 0.0
                && curr.histogram.abs() < prev.histogram.abs()
            {
                let event = JumpEvent {
                    kind: JumpKind::ZeroAxisReclaim,
                    pullback_start_index: curr.index,
                    gap_open: curr.open,
                    gap_reference_open: prev.open,
                    trailing_stop_level: prev.open - offset,
                };
                debug!(dea = curr.dea, "zero-axis jump event opened");
                return (Some(event), Some(JumpSignal::Opened(event)));
            }

            (None, None)
        },
    }
}

/// Absolute index of the first bar of the decreasing positive-histogram run
/// that ends immediately before the current (last) bar. `None` if the bar
/// before the gap was not a positive, shrinking histogram bar.
fn pullback_start(bars: &[BarSnapshot]) -> Option<u64> {
    let n = bars.len();
    if n < 3 {
        return None;
    }
    let hist = |i: usize| bars[i].histogram;

    let mut start = n - 2;
    if !(hist(start) > 0.0 && hist(start) < hist(start - 1)) {
        return None;
    }
    while start >= 2 && hist(start - 1) > 0.0 && hist(start - 1) < hist(start - 2) {
        start -= 1;
    }
    Some(bars[start].index)
}

// ============================================================
// TESTS
// ============================================================
