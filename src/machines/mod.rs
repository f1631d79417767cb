//! Regime state machines
//!
//! Each machine is a pure transition function: state in, candle data in,
//! state out. The per-timeframe pipeline threads the returned values back
//! in on the next candle close, so every machine is independently
//! constructible and replayable over historical data.
//!
//! # Machines
//!
//! - **Segment classifier**: Uptrend / Transition / BreakthroughAttempt /
//!   Downtrend regime with confirmation-bar hysteresis.
//! - **Jump detector**: pullback-then-gap continuation events inside an
//!   uptrend, managing a monotonic trailing stop.
//! - **Crown sub-machine**: histogram sign-reversal confirmation, read by
//!   the classifier as a corroborating signal.
//! - **Entry setups**: exhaustion and zero-axis entry candidates derived
//!   from the lookback window.

pub mod helpers;

pub mod crown;
pub mod entry;
pub mod jump;
pub mod segment;

// Re-export the machine types for convenience
pub use crown::*;
pub use entry::*;
pub use helpers::*;
pub use jump::*;
pub use segment::*;
