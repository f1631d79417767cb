//! Crown confirmation sub-machine
//!
//! A lower-level state machine over the histogram series that flags
//! pattern-confirmed turning points: a shrinking run of one sign followed by
//! a sustained run of the opposite sign ("yin-yang crown"). The classifier
//! and the jump detector consult it as a read-only corroborating signal
//! through [`ConfirmationSource`]; neither ever mutates it.

use serde::{Deserialize, Serialize};

use super::helpers::{is_shrinking, opposite_sign, same_sign};
use crate::params::StrategyParams;

// ============================================================
// STATE
// ============================================================

/// Crown state with its counters embedded in the variants.
///
/// The counters are meaningless outside the variant that carries them;
/// every transition rebuilds them from scratch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum CrownState {
    /// Watching for a shrinking run; `shrink_run` counts consecutive bars
    /// whose histogram shrank in magnitude without changing sign.
    #[default]
    Idle,
    /// Same as [`CrownState::Idle`] with a shrink streak in progress.
    Arming { shrink_run: u32 },
    /// The sign flipped after a shrinking run; counting bars of the new sign.
    Forming { run: u32, age: u32, bullish: bool },
    /// The new sign held for at least `crown_min_run` bars.
    Confirmed { age: u32, bullish: bool },
    /// The run broke before confirmation or the crown aged out.
    /// Re-arms to `Idle` on the following bar.
    Expired,
}

/// Data-free view of [`CrownState`], the shape consumers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrownPhase {
    Idle,
    Forming,
    Confirmed,
    Expired,
}

impl CrownState {
    #[inline]
    pub fn phase(self) -> CrownPhase {
        match self {
            CrownState::Idle | CrownState::Arming { .. } => CrownPhase::Idle,
            CrownState::Forming { .. } => CrownPhase::Forming,
            CrownState::Confirmed { .. } => CrownPhase::Confirmed,
            CrownState::Expired => CrownPhase::Expired,
        }
    }
}

// ============================================================
// CONFIRMATION SEAM
// ============================================================

/// Read-only corroboration capability injected into the classifier.
///
/// Keeping this a trait (rather than passing the concrete machine around)
/// keeps the state machines decoupled and independently replaceable.
pub trait ConfirmationSource {
    fn confirmation(&self) -> CrownPhase;
}

impl ConfirmationSource for CrownState {
    fn confirmation(&self) -> CrownPhase {
        self.phase()
    }
}

impl ConfirmationSource for CrownPhase {
    fn confirmation(&self) -> CrownPhase {
        *self
    }
}

// ============================================================
// TRANSITION FUNCTION
// ============================================================

/// Advance the crown sub-machine by one closed candle.
///
/// Pure function of its inputs. `prev_hist` is the previous candle's
/// histogram (`None` on the first candle of a timeframe). A zero histogram
/// carries no sign: it resets the shrink streak and breaks runs.
pub fn crown_step(
    state: CrownState,
    prev_hist: Option<f64>,
    hist: f64,
    params: &StrategyParams,
) -> CrownState {
    let min_run = params.crown_min_run.get();
    let max_age = params.crown_max_age.get();

    match state {
        CrownState::Idle | CrownState::Arming { .. } => {
            let shrink_run = match state {
                CrownState::Arming { shrink_run } => shrink_run,
                _ => 0,
            };
            let Some(prev) = prev_hist else {
                return CrownState::Idle;
            };
            if same_sign(prev, hist) {
                if is_shrinking(prev, hist) {
                    CrownState::Arming { shrink_run: shrink_run + 1 }
                } else {
                    CrownState::Idle
                }
            } else if opposite_sign(prev, hist) && shrink_run >= 1 {
                if min_run <= 1 {
                    CrownState::Confirmed { age: 1, bullish: hist > 0.0 }
                } else {
                    CrownState::Forming { run: 1, age: 1, bullish: hist > 0.0 }
                }
            } else {
                CrownState::Idle
            }
        },

        CrownState::Forming { run, age, bullish } => {
            let holds = (bullish && hist > 0.0) || (!bullish && hist < 0.0);
            if age + 1 > max_age || !holds {
                CrownState::Expired
            } else if run + 1 >= min_run {
                CrownState::Confirmed { age: age + 1, bullish }
            } else {
                CrownState::Forming { run: run + 1, age: age + 1, bullish }
            }
        },

        CrownState::Confirmed { age, bullish } => {
            let holds = (bullish && hist > 0.0) || (!bullish && hist < 0.0);
            if age + 1 > max_age || !holds {
                CrownState::Expired
            } else {
                CrownState::Confirmed { age: age + 1, bullish }
            }
        },

        CrownState::Expired => CrownState::Idle,
    }
}

// ============================================================
// TESTS
// ============================================================
