//! # macd-regime
//!
//! Multi-timeframe MACD regime classification and trading-signal engine.
//!
//! The crate consumes an already-enriched candle stream (EMA and MACD
//! fields precomputed), classifies each timeframe's momentum regime with a
//! hysteresis state machine, tracks pullback-then-gap continuation events
//! with a monotonic trailing stop, and reduces the per-timeframe states
//! into a single entry/exit verdict gated by cross-timeframe filters.
//!
//! ## Quick Start
//!
//! ```rust
//! use macd_regime::prelude::*;
//!
//! // Define your enriched candle type
//! struct Bar { ts: i64, close: f64, dif: f64, dea: f64 }
//!
//! impl Candle for Bar {
//!     fn timestamp_ms(&self) -> i64 { self.ts }
//!     fn open(&self) -> f64 { self.close - 5.0 }
//!     fn high(&self) -> f64 { self.close + 10.0 }
//!     fn low(&self) -> f64 { self.close - 10.0 }
//!     fn close(&self) -> f64 { self.close }
//!     fn volume(&self) -> f64 { 1000.0 }
//!     fn ema_short(&self) -> f64 { self.close - 1.0 }
//!     fn ema_mid(&self) -> f64 { self.close - 2.0 }
//!     fn ema_long(&self) -> f64 { self.close - 3.0 }
//!     fn dif(&self) -> f64 { self.dif }
//!     fn dea(&self) -> f64 { self.dea }
//! }
//!
//! // One pipeline per subscribed timeframe, validated up front
//! let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
//!
//! let bar = Bar { ts: 0, close: 50_000.0, dif: 20.0, dea: 12.0 };
//! let outcome = engine.push(Timeframe::H1, &bar).unwrap();
//! assert_eq!(outcome.segment, SegmentState::Uptrend);
//! ```

pub mod aggregate;
pub mod machines;
pub mod params;

pub mod prelude {
    pub use crate::{
        // Aggregation
        aggregate::{decide, PriceTargets, Reason, Side, SignalVerdict, TimeframeSnapshot},
        // Machines
        machines::{
            classify_segment, crown_step, detect_setup, track_jump, ConfirmationSource,
            CrownPhase, CrownState, EntrySetup, JumpEvent, JumpKind, JumpSignal, SegmentInput,
            SegmentState, SetupKind,
        },
        // Parameters
        params::{ParamKind, ParamMeta, StrategyParams, TieBreak},
        // Parallel
        advance_parallel,
        // Engine
        BarCount,
        BarOutcome,
        BarSnapshot,
        Candle,
        CandleExt,
        EngineBuilder,
        FeedError,
        FeedOutcome,
        PriceDelta,
        RegimeEngine,
        RegimeError,
        Result,
        Timeframe,
        TimeframePipeline,
    };
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::aggregate::{decide, SignalVerdict, TimeframeSnapshot};
use crate::machines::{
    classify_segment, crown_step, detect_setup, track_jump, CrownState, JumpEvent, JumpSignal,
    SegmentInput, SegmentState,
};
use crate::params::StrategyParams;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, RegimeError>;

/// Errors that can occur during configuration or candle processing
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegimeError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Malformed candle at {timestamp_ms}: {reason}")]
    MalformedCandle { timestamp_ms: i64, reason: &'static str },

    #[error("Out-of-order candle: last open {last_ms}, got {got_ms}")]
    OutOfOrderCandle { last_ms: i64, got_ms: i64 },

    #[error("Timeframe {0} is not subscribed")]
    UnsubscribedTimeframe(Timeframe),

    #[error("Unknown timeframe literal: {0}")]
    UnknownTimeframe(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Whole number of candles (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BarCount(u32);

impl BarCount {
    /// Create a new BarCount, validating the value is > 0
    pub fn new(value: u32) -> Result<Self> {
        if value == 0 {
            return Err(RegimeError::InvalidValue("BarCount must be > 0"));
        }
        Ok(Self(value))
    }

    /// Create a BarCount from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl serde::Serialize for BarCount {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for BarCount {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = u32::deserialize(d)?;
        BarCount::new(value).map_err(serde::de::Error::custom)
    }
}

/// Positive, finite price distance
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PriceDelta(f64);

impl PriceDelta {
    /// Create a new PriceDelta, validating the value is finite and > 0
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(RegimeError::InvalidValue("PriceDelta cannot be NaN or infinite"));
        }
        if value <= 0.0 {
            return Err(RegimeError::InvalidValue("PriceDelta must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for PriceDelta {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for PriceDelta {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        PriceDelta::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// TIMEFRAME
// ============================================================

/// Candle interval, ordered by duration: the smallest timeframe is the
/// most granular and wins when several decision timeframes qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timeframe(u32);

impl Timeframe {
    pub const M1: Timeframe = Timeframe(1);
    pub const M5: Timeframe = Timeframe(5);
    pub const M15: Timeframe = Timeframe(15);
    pub const M30: Timeframe = Timeframe(30);
    pub const H1: Timeframe = Timeframe(60);
    pub const H4: Timeframe = Timeframe(240);
    pub const D1: Timeframe = Timeframe(1440);

    /// Create a timeframe from whole minutes (must be > 0)
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(RegimeError::InvalidValue("Timeframe must be > 0 minutes"));
        }
        Ok(Self(minutes))
    }

    #[inline]
    pub fn minutes(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn duration_ms(self) -> i64 {
        self.0 as i64 * 60_000
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1440 == 0 {
            write!(f, "{}d", self.0 / 1440)
        } else if self.0 % 60 == 0 {
            write!(f, "{}h", self.0 / 60)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl FromStr for Timeframe {
    type Err = RegimeError;

    fn from_str(s: &str) -> Result<Self> {
        let (digits, unit) = s.split_at(s.len().saturating_sub(1));
        let scale = match unit {
            "m" => 1,
            "h" => 60,
            "d" => 1440,
            _ => return Err(RegimeError::UnknownTimeframe(s.to_string())),
        };
        let count: u32 = digits
            .parse()
            .map_err(|_| RegimeError::UnknownTimeframe(s.to_string()))?;
        Timeframe::from_minutes(count.saturating_mul(scale))
    }
}

impl serde::Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(d)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================
// CANDLE TRAITS
// ============================================================

/// Enriched candle input contract.
///
/// Each record carries the price fields plus the precomputed moving
/// averages and MACD lines; the crate does not compute indicators itself.
/// `timestamp_ms` is the candle's open time.
pub trait Candle {
    fn timestamp_ms(&self) -> i64;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
    fn ema_short(&self) -> f64;
    fn ema_mid(&self) -> f64;
    fn ema_long(&self) -> f64;
    fn dif(&self) -> f64;
    fn dea(&self) -> f64;

    fn histogram(&self) -> f64 {
        self.dif() - self.dea()
    }
}

/// Extension trait with derived properties for enriched candles
pub trait CandleExt: Candle {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate candle consistency: every field finite, high >= low.
    fn validate(&self) -> Result<()> {
        let fields = [
            ("open", self.open()),
            ("high", self.high()),
            ("low", self.low()),
            ("close", self.close()),
            ("volume", self.volume()),
            ("ema_short", self.ema_short()),
            ("ema_mid", self.ema_mid()),
            ("ema_long", self.ema_long()),
            ("dif", self.dif()),
            ("dea", self.dea()),
            ("histogram", self.histogram()),
        ];
        for (reason, value) in fields {
            if !value.is_finite() {
                return Err(RegimeError::MalformedCandle {
                    timestamp_ms: self.timestamp_ms(),
                    reason,
                });
            }
        }
        if self.high() < self.low() {
            return Err(RegimeError::MalformedCandle {
                timestamp_ms: self.timestamp_ms(),
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: Candle> CandleExt for T {}

// ============================================================
// BAR SNAPSHOT - the pipeline's stored view of one candle
// ============================================================

/// Compact copy of the candle fields the machines read, stored in each
/// pipeline's bounded history window.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BarSnapshot {
    /// Absolute candle index within the timeframe (0-based).
    pub index: u64,
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ema_short: f64,
    pub ema_long: f64,
    pub dif: f64,
    pub dea: f64,
    pub histogram: f64,
}

impl BarSnapshot {
    pub fn from_candle<T: Candle>(index: u64, candle: &T) -> Self {
        Self {
            index,
            timestamp_ms: candle.timestamp_ms(),
            open: candle.open(),
            high: candle.high(),
            low: candle.low(),
            close: candle.close(),
            ema_short: candle.ema_short(),
            ema_long: candle.ema_long(),
            dif: candle.dif(),
            dea: candle.dea(),
            histogram: candle.histogram(),
        }
    }
}

// ============================================================
// PER-TIMEFRAME PIPELINE
// ============================================================

/// What one candle close produced on one timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarOutcome {
    pub timeframe: Timeframe,
    pub timestamp_ms: i64,
    pub segment: SegmentState,
    pub segment_changed: bool,
    pub crown: machines::CrownPhase,
    pub jump: Option<JumpSignal>,
}

/// Sequential state pipeline for a single timeframe: classifier, crown
/// sub-machine and jump tracking, fed strictly in timestamp order.
///
/// Pipelines share only the configuration; each owns its state slot
/// outright, so different timeframes can advance on parallel tasks.
#[derive(Debug)]
pub struct TimeframePipeline {
    timeframe: Timeframe,
    params: Arc<StrategyParams>,
    window: Vec<BarSnapshot>,
    segment: SegmentState,
    counter: u32,
    crown: CrownState,
    jump: Option<JumpEvent>,
    bars_seen: u64,
}

impl TimeframePipeline {
    pub fn new(timeframe: Timeframe, params: Arc<StrategyParams>) -> Self {
        Self {
            timeframe,
            params,
            window: Vec::new(),
            segment: SegmentState::Unknown,
            counter: 0,
            crown: CrownState::default(),
            jump: None,
            bars_seen: 0,
        }
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    #[inline]
    pub fn segment(&self) -> SegmentState {
        self.segment
    }

    #[inline]
    pub fn crown(&self) -> CrownState {
        self.crown
    }

    #[inline]
    pub fn jump(&self) -> Option<JumpEvent> {
        self.jump
    }

    #[inline]
    pub fn bars_seen(&self) -> u64 {
        self.bars_seen
    }

    /// Process one closed candle.
    ///
    /// A malformed or out-of-order candle is rejected without advancing any
    /// state: the error is returned and a warning is emitted, and the next
    /// well-formed candle picks up exactly where the last accepted one
    /// left off.
    pub fn push<T: Candle>(&mut self, candle: &T) -> Result<BarOutcome> {
        if let Err(error) = candle.validate() {
            warn!(timeframe = %self.timeframe, %error, "rejected candle");
            return Err(error);
        }
        let ts = candle.timestamp_ms();
        if let Some(last) = self.window.last() {
            if ts <= last.timestamp_ms {
                warn!(timeframe = %self.timeframe, last = last.timestamp_ms, got = ts, "out-of-order candle");
                return Err(RegimeError::OutOfOrderCandle { last_ms: last.timestamp_ms, got_ms: ts });
            }
        }

        let prev = self.window.last().copied();

        // Crown first: the classifier reads it as a corroborating signal
        // for this same candle close.
        self.crown =
            crown_step(self.crown, prev.map(|b| b.histogram), candle.histogram(), &self.params);

        let input = SegmentInput { dea: candle.dea(), prev_dea: prev.map(|b| b.dea) };
        let (segment, counter) =
            classify_segment(self.segment, self.counter, input, &self.crown, &self.params);
        let segment_changed = segment != self.segment;
        self.segment = segment;
        self.counter = counter;

        self.window.push(BarSnapshot::from_candle(self.bars_seen, candle));
        let cap = self.params.lookback.get() as usize;
        if self.window.len() > cap {
            let excess = self.window.len() - cap;
            self.window.drain(..excess);
        }

        let (jump, signal) =
            track_jump(self.segment, self.jump.take(), &self.window, &self.params);
        self.jump = jump;
        self.bars_seen += 1;

        Ok(BarOutcome {
            timeframe: self.timeframe,
            timestamp_ms: ts,
            segment: self.segment,
            segment_changed,
            crown: self.crown.phase(),
            jump: signal,
        })
    }

    /// Current state slot for the aggregator, or `None` before the first
    /// accepted candle.
    pub fn snapshot(&self) -> Option<TimeframeSnapshot> {
        let last = self.window.last()?;
        let prev = self.window.len().checked_sub(2).map(|i| self.window[i]);

        Some(TimeframeSnapshot {
            timeframe: self.timeframe,
            segment: self.segment,
            crown: self.crown.phase(),
            jump: self.jump,
            setup: detect_setup(&self.window, &self.params),
            close: last.close,
            prev_close: prev.map(|b| b.close),
            ema_short: last.ema_short,
            prev_ema_short: prev.map(|b| b.ema_short),
            ema_long: last.ema_long,
            dif: last.dif,
            dea: last.dea,
            bars_seen: self.bars_seen,
            last_open_ms: last.timestamp_ms,
        })
    }
}

// ============================================================
// ENGINE
// ============================================================

/// Multi-timeframe signal engine.
///
/// Owns one [`TimeframePipeline`] per subscribed timeframe plus the single
/// cross-timeframe mutable resource: the `first_trade_opened` latch, a
/// one-way atomic false-to-true transition.
pub struct RegimeEngine {
    params: Arc<StrategyParams>,
    pipelines: BTreeMap<Timeframe, TimeframePipeline>,
    first_trade_opened: AtomicBool,
}

impl RegimeEngine {
    /// Build an engine, validating the configuration before any candle can
    /// be processed.
    pub fn new(params: StrategyParams) -> Result<Self> {
        params.validate()?;
        let params = Arc::new(params);
        let pipelines = params
            .subscribed_timeframes
            .iter()
            .map(|tf| (*tf, TimeframePipeline::new(*tf, Arc::clone(&params))))
            .collect();

        Ok(Self { params, pipelines, first_trade_opened: AtomicBool::new(false) })
    }

    #[inline]
    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Feed one closed candle into the pipeline for `timeframe`.
    pub fn push<T: Candle>(&mut self, timeframe: Timeframe, candle: &T) -> Result<BarOutcome> {
        let pipeline = self
            .pipelines
            .get_mut(&timeframe)
            .ok_or(RegimeError::UnsubscribedTimeframe(timeframe))?;
        pipeline.push(candle)
    }

    pub fn pipeline(&self, timeframe: Timeframe) -> Option<&TimeframePipeline> {
        self.pipelines.get(&timeframe)
    }

    /// State slots of every pipeline that has accepted at least one candle.
    pub fn snapshots(&self) -> BTreeMap<Timeframe, TimeframeSnapshot> {
        self.pipelines
            .iter()
            .filter_map(|(tf, pipeline)| pipeline.snapshot().map(|s| (*tf, s)))
            .collect()
    }

    /// Run an aggregation pass as of the given instant.
    ///
    /// Every required timeframe must have a candle that closed at or
    /// before `as_of_ms` and is still the freshest one covering it;
    /// otherwise the verdict is `None`-side with the gap named in the
    /// rationale. Each pass recomputes the verdict from scratch, so a
    /// newer as-of request simply supersedes the previous pass.
    pub fn verdict_at(&self, as_of_ms: i64) -> SignalVerdict {
        decide(&self.snapshots(), as_of_ms, self.first_trade_opened(), &self.params)
    }

    #[inline]
    pub fn first_trade_opened(&self) -> bool {
        self.first_trade_opened.load(Ordering::Acquire)
    }

    /// Record that a Long verdict was acted upon, unlocking Short verdicts.
    ///
    /// Idempotent one-way latch; returns `true` only for the call that
    /// performed the false-to-true transition.
    pub fn mark_first_trade(&self) -> bool {
        !self.first_trade_opened.swap(true, Ordering::AcqRel)
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`RegimeEngine`] instances
pub struct EngineBuilder {
    params: StrategyParams,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { params: StrategyParams::default() }
    }

    /// Replace the whole parameter set
    pub fn params(mut self, params: StrategyParams) -> Self {
        self.params = params;
        self
    }

    /// Set the decision timeframes, subscribing them as needed
    pub fn decision_timeframes(mut self, timeframes: impl IntoIterator<Item = Timeframe>) -> Self {
        self.params.decision_timeframes = timeframes.into_iter().collect();
        for tf in self.params.decision_timeframes.clone() {
            self = self.subscribe(tf);
        }
        self
    }

    /// Set the gating higher timeframe, subscribing it as needed
    pub fn higher_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.params.higher_timeframe = timeframe;
        self.subscribe(timeframe)
    }

    /// Add a timeframe to the subscription set
    pub fn subscribe(mut self, timeframe: Timeframe) -> Self {
        if !self.params.subscribed_timeframes.contains(&timeframe) {
            self.params.subscribed_timeframes.push(timeframe);
        }
        self
    }

    /// Require crown corroboration for uptrend commits
    pub fn require_crown(mut self, enable: bool) -> Self {
        self.params.require_crown = enable;
        self
    }

    /// Set the same-candle trigger resolution policy
    pub fn tie_break(mut self, tie_break: params::TieBreak) -> Self {
        self.params.tie_break = tie_break;
        self
    }

    /// Build the engine, validating the assembled configuration
    pub fn build(self) -> Result<RegimeEngine> {
        RegimeEngine::new(self.params)
    }
}

// ============================================================
// PARALLEL ADVANCE
// ============================================================

use rayon::prelude::*;

/// Outcomes of feeding one timeframe's batch
#[derive(Debug)]
pub struct FeedOutcome {
    pub timeframe: Timeframe,
    pub outcomes: Vec<BarOutcome>,
}

/// A candle rejected while feeding one timeframe's batch
#[derive(Debug)]
pub struct FeedError {
    pub timeframe: Timeframe,
    pub timestamp_ms: i64,
    pub error: RegimeError,
}

/// Advance several timeframes' pipelines in parallel.
///
/// Each pipeline consumes its own batch sequentially (candles within a
/// timeframe are strictly ordered); distinct timeframes run on rayon
/// worker threads since they share nothing but the configuration.
/// Rejected candles are collected as [`FeedError`]s without aborting the
/// rest of their batch.
pub fn advance_parallel<T>(
    engine: &mut RegimeEngine,
    feeds: &[(Timeframe, &[T])],
) -> (Vec<FeedOutcome>, Vec<FeedError>)
where
    T: Candle + Sync,
{
    let results: Vec<(FeedOutcome, Vec<FeedError>)> = engine
        .pipelines
        .par_iter_mut()
        .map(|(tf, pipeline)| {
            let mut outcomes = Vec::new();
            let mut errors = Vec::new();

            for (feed_tf, batch) in feeds {
                if feed_tf != tf {
                    continue;
                }
                for candle in *batch {
                    match pipeline.push(candle) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(error) => errors.push(FeedError {
                            timeframe: *tf,
                            timestamp_ms: candle.timestamp_ms(),
                            error,
                        }),
                    }
                }
            }

            (FeedOutcome { timeframe: *tf, outcomes }, errors)
        })
        .collect();

    let mut fed = Vec::new();
    let mut errors = Vec::new();
    for (outcome, errs) in results {
        if !outcome.outcomes.is_empty() || !errs.is_empty() {
            fed.push(outcome);
        }
        errors.extend(errs);
    }

    (fed, errors)
}

// ============================================================
// TESTS
// ============================================================
