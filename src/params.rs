//! Strategy parameters and their metadata
//!
//! This module provides the strategy configuration consumed by the regime
//! state machines and the aggregator, plus parameter metadata enabling:
//! - Grid search optimization
//! - Parameter documentation
//! - Construction from untyped key/value maps
//!
//! # Example
//!
//! ```rust
//! use macd_regime::params::StrategyParams;
//!
//! let params = StrategyParams::default();
//! params.validate().unwrap();
//!
//! for meta in StrategyParams::param_meta() {
//!     println!("{}: {:?} (default: {})", meta.name, meta.kind, meta.default);
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{BarCount, PriceDelta, RegimeError, Result, Timeframe};

// ============================================================
// TIE-BREAK POLICY
// ============================================================

/// Resolution order when a zero-cross commit and a threshold/timeout
/// reversion fire on the same candle inside `BreakthroughAttempt`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
  /// A full reclaim of the zero axis outranks the timeout/threshold reversion.
  #[default]
  ZeroCrossFirst,
  /// The timeout/threshold reversion is evaluated before the zero-cross commit.
  ThresholdFirst,
}

// ============================================================
// STRATEGY PARAMETERS
// ============================================================

/// Full configuration for one strategy variant.
///
/// Invalid combinations are rejected by [`StrategyParams::validate`], which
/// runs before any candle is processed (engine construction fails fast).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
  /// Consecutive `dea > 0` candles required to commit `Downtrend -> Uptrend`.
  pub min_downtrend_bars: BarCount,
  /// Candles spent in `Transition` before committing to `Downtrend`.
  pub delay_bars: BarCount,
  /// Negative `dea` level whose upward crossing starts a breakthrough attempt.
  /// Must be strictly below zero.
  pub below_zero_threshold: f64,
  /// Candles a breakthrough attempt may spend below zero before reverting.
  pub below_zero_timeout: BarCount,
  /// Distance subtracted from the reference open to place a protective stop.
  pub stop_loss_offset: PriceDelta,
  /// `|dea|` band around zero inside which the zero-axis jump variant arms.
  pub zero_axis_threshold: PriceDelta,
  /// Minimum open-to-open jump that qualifies as a gap.
  pub gap_margin: PriceDelta,
  /// Upper bound on the higher timeframe's `dif` for Long entries.
  pub higher_tf_long_filter: f64,
  /// Lower bound on the higher timeframe's `dea` for Short entries.
  pub higher_tf_short_filter: f64,
  /// Bars of the new histogram sign required to confirm a crown.
  pub crown_min_run: BarCount,
  /// Maximum crown age in bars before it expires.
  pub crown_max_age: BarCount,
  /// Candles a timeframe must accumulate before it may produce signals.
  pub min_history: BarCount,
  /// Window length for previous-high/low and `dea`-extreme searches.
  pub lookback: BarCount,
  /// Veto `Uptrend` commits while the crown phase is `Expired`.
  pub require_crown: bool,
  /// Same-candle trigger resolution inside `BreakthroughAttempt`.
  pub tie_break: TieBreak,
  /// Timeframes whose regime state decides entries, most granular first.
  pub decision_timeframes: Vec<Timeframe>,
  /// Timeframe whose `dif`/`dea` gate entries on the decision timeframes.
  pub higher_timeframe: Timeframe,
  /// All timeframes the engine runs a pipeline for.
  pub subscribed_timeframes: Vec<Timeframe>,
}

impl Default for StrategyParams {
  fn default() -> Self {
    Self {
      min_downtrend_bars: BarCount::new_const(2),
      delay_bars: BarCount::new_const(25),
      below_zero_threshold: -60.0,
      below_zero_timeout: BarCount::new_const(8),
      stop_loss_offset: PriceDelta::new_const(300.0),
      zero_axis_threshold: PriceDelta::new_const(300.0),
      gap_margin: PriceDelta::new_const(100.0),
      higher_tf_long_filter: 500.0,
      higher_tf_short_filter: -500.0,
      crown_min_run: BarCount::new_const(3),
      crown_max_age: BarCount::new_const(6),
      min_history: BarCount::new_const(10),
      lookback: BarCount::new_const(50),
      require_crown: false,
      tie_break: TieBreak::ZeroCrossFirst,
      decision_timeframes: vec![Timeframe::H1],
      higher_timeframe: Timeframe::H4,
      subscribed_timeframes: vec![Timeframe::H1, Timeframe::H4],
    }
  }
}

impl StrategyParams {
  /// Check cross-field consistency. Called by the engine before any candle
  /// is accepted; a failure here is fatal at initialization.
  pub fn validate(&self) -> Result<()> {
    if !self.below_zero_threshold.is_finite() {
      return Err(RegimeError::InvalidValue("below_zero_threshold must be finite"));
    }
    if self.below_zero_threshold >= 0.0 {
      return Err(RegimeError::InvalidConfig(format!(
        "below_zero_threshold must be < 0, got {}",
        self.below_zero_threshold
      )));
    }
    if !self.higher_tf_long_filter.is_finite() || !self.higher_tf_short_filter.is_finite() {
      return Err(RegimeError::InvalidValue("timeframe filters must be finite"));
    }
    if self.decision_timeframes.is_empty() {
      return Err(RegimeError::InvalidConfig(
        "at least one decision timeframe is required".into(),
      ));
    }
    for tf in &self.decision_timeframes {
      if !self.subscribed_timeframes.contains(tf) {
        return Err(RegimeError::InvalidConfig(format!(
          "decision timeframe {tf} is not subscribed"
        )));
      }
      if self.higher_timeframe <= *tf {
        return Err(RegimeError::InvalidConfig(format!(
          "higher timeframe {} must exceed decision timeframe {tf}",
          self.higher_timeframe
        )));
      }
    }
    if !self.subscribed_timeframes.contains(&self.higher_timeframe) {
      return Err(RegimeError::InvalidConfig(format!(
        "higher timeframe {} is not subscribed",
        self.higher_timeframe
      )));
    }
    if self.lookback.get() < self.min_history.get() {
      return Err(RegimeError::InvalidConfig(format!(
        "lookback ({}) must cover min_history ({})",
        self.lookback.get(),
        self.min_history.get()
      )));
    }
    Ok(())
  }

  /// Returns metadata for all numeric parameters.
  pub fn param_meta() -> &'static [ParamMeta] {
    STRATEGY_PARAMS
  }

  /// Build parameters from an untyped map, as produced by a grid search.
  ///
  /// Missing keys use their default values; timeframe sets keep the defaults.
  /// The result is validated before being returned.
  pub fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let built = Self {
      min_downtrend_bars: get_bars(params, "min_downtrend_bars", 2)?,
      delay_bars: get_bars(params, "delay_bars", 25)?,
      below_zero_threshold: get_level(params, "below_zero_threshold", -60.0)?,
      below_zero_timeout: get_bars(params, "below_zero_timeout", 8)?,
      stop_loss_offset: get_delta(params, "stop_loss_offset", 300.0)?,
      zero_axis_threshold: get_delta(params, "zero_axis_threshold", 300.0)?,
      gap_margin: get_delta(params, "gap_margin", 100.0)?,
      higher_tf_long_filter: get_level(params, "higher_tf_long_filter", 500.0)?,
      higher_tf_short_filter: get_level(params, "higher_tf_short_filter", -500.0)?,
      crown_min_run: get_bars(params, "crown_min_run", 3)?,
      crown_max_age: get_bars(params, "crown_max_age", 6)?,
      min_history: get_bars(params, "min_history", 10)?,
      lookback: get_bars(params, "lookback", 50)?,
      ..Self::default()
    };
    built.validate()?;
    Ok(built)
  }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
  /// Whole number of candles (positive integer)
  Bars,
  /// Positive price distance
  Price,
  /// Signed indicator level
  Level,
}

/// Metadata for a single strategy parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "delay_bars")
  pub name: &'static str,
  /// Parameter type
  pub kind: ParamKind,
  /// Default value
  pub default: f64,
  /// Range for optimization: (min, max, step)
  pub range: (f64, f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn bars(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, kind: ParamKind::Bars, default, range, description }
  }

  pub const fn price(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, kind: ParamKind::Price, default, range, description }
  }

  pub const fn level(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, kind: ParamKind::Level, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    let mut values = Vec::new();
    let mut v = min;
    while v <= max + f64::EPSILON {
      values.push(v);
      v += step;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(RegimeError::OutOfRange { field: self.name, value, min, max });
    }
    match self.kind {
      ParamKind::Bars => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(RegimeError::InvalidValue("bar counts must be positive integers"));
        }
        Ok(())
      },
      ParamKind::Price => {
        if value <= 0.0 {
          return Err(RegimeError::InvalidValue("price distances must be > 0"));
        }
        Ok(())
      },
      ParamKind::Level => Ok(()),
    }
  }
}

static STRATEGY_PARAMS: &[ParamMeta] = &[
  ParamMeta::bars(
    "min_downtrend_bars",
    2.0,
    (1.0, 6.0, 1.0),
    "Consecutive dea > 0 candles before an uptrend commits",
  ),
  ParamMeta::bars(
    "delay_bars",
    25.0,
    (5.0, 50.0, 5.0),
    "Candles held in transition before committing to a downtrend",
  ),
  ParamMeta::level(
    "below_zero_threshold",
    -60.0,
    (-200.0, -10.0, 10.0),
    "Negative dea level that arms a breakthrough attempt",
  ),
  ParamMeta::bars(
    "below_zero_timeout",
    8.0,
    (2.0, 20.0, 2.0),
    "Candles a breakthrough attempt may spend below zero",
  ),
  ParamMeta::price(
    "stop_loss_offset",
    300.0,
    (50.0, 1000.0, 50.0),
    "Distance below the reference open for protective stops",
  ),
  ParamMeta::price(
    "zero_axis_threshold",
    300.0,
    (50.0, 1000.0, 50.0),
    "dea band around zero arming the zero-axis jump variant",
  ),
  ParamMeta::price(
    "gap_margin",
    100.0,
    (10.0, 500.0, 10.0),
    "Minimum open-to-open jump that counts as a gap",
  ),
  ParamMeta::level(
    "higher_tf_long_filter",
    500.0,
    (100.0, 2000.0, 100.0),
    "Upper dif bound on the higher timeframe for Long entries",
  ),
  ParamMeta::level(
    "higher_tf_short_filter",
    -500.0,
    (-2000.0, -100.0, 100.0),
    "Lower dea bound on the higher timeframe for Short entries",
  ),
  ParamMeta::bars(
    "crown_min_run",
    3.0,
    (1.0, 8.0, 1.0),
    "Bars of the new histogram sign required to confirm a crown",
  ),
  ParamMeta::bars("crown_max_age", 6.0, (2.0, 16.0, 2.0), "Crown lifetime in bars"),
  ParamMeta::bars(
    "min_history",
    10.0,
    (5.0, 50.0, 5.0),
    "Candles required before a timeframe may signal",
  ),
  ParamMeta::bars(
    "lookback",
    50.0,
    (20.0, 200.0, 10.0),
    "Window for previous-high/low and dea-extreme searches",
  ),
];

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a BarCount from params with default fallback
pub fn get_bars(params: &HashMap<&str, f64>, key: &str, default: u32) -> Result<BarCount> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 1.0 || value.fract() != 0.0 {
    return Err(RegimeError::InvalidValue("bar counts must be positive integers"));
  }
  BarCount::new(value as u32)
}

/// Helper to get a PriceDelta from params with default fallback
pub fn get_delta(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<PriceDelta> {
  let value = params.get(key).copied().unwrap_or(default);
  PriceDelta::new(value)
}

/// Helper to get a signed level from params with default fallback
pub fn get_level(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  if !value.is_finite() {
    return Err(RegimeError::InvalidValue("levels must be finite"));
  }
  Ok(value)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    assert!(StrategyParams::default().validate().is_ok());
  }

  #[test]
  fn test_threshold_must_be_negative() {
    let mut params = StrategyParams::default();
    params.below_zero_threshold = 0.0;
    assert!(params.validate().is_err());

    params.below_zero_threshold = 15.0;
    assert!(params.validate().is_err());

    params.below_zero_threshold = -0.5;
    assert!(params.validate().is_ok());
  }

  #[test]
  fn test_decision_timeframe_must_be_subscribed() {
    let mut params = StrategyParams::default();
    params.decision_timeframes = vec![Timeframe::M15];
    assert!(params.validate().is_err());

    params.subscribed_timeframes.push(Timeframe::M15);
    assert!(params.validate().is_ok());
  }

  #[test]
  fn test_higher_timeframe_must_exceed_decision() {
    let mut params = StrategyParams::default();
    params.higher_timeframe = Timeframe::H1;
    assert!(params.validate().is_err());
  }

  #[test]
  fn test_lookback_covers_min_history() {
    let mut params = StrategyParams::default();
    params.lookback = BarCount::new(5).unwrap();
    assert!(params.validate().is_err());
  }

  #[test]
  fn test_with_params_overrides() {
    let mut overrides = HashMap::new();
    overrides.insert("min_downtrend_bars", 4.0);
    overrides.insert("stop_loss_offset", 150.0);

    let params = StrategyParams::with_params(&overrides).unwrap();
    assert_eq!(params.min_downtrend_bars.get(), 4);
    assert!((params.stop_loss_offset.get() - 150.0).abs() < f64::EPSILON);
    assert_eq!(params.delay_bars.get(), 25);
  }

  #[test]
  fn test_with_params_rejects_invalid() {
    let mut overrides = HashMap::new();
    overrides.insert("below_zero_threshold", 10.0);
    assert!(StrategyParams::with_params(&overrides).is_err());

    let mut overrides = HashMap::new();
    overrides.insert("delay_bars", 2.5);
    assert!(StrategyParams::with_params(&overrides).is_err());
  }

  #[test]
  fn test_generate_grid() {
    let meta = ParamMeta::bars("test", 2.0, (1.0, 3.0, 1.0), "Test");

    let grid = meta.generate_grid();
    assert_eq!(grid.len(), 3);
    assert!((grid[0] - 1.0).abs() < f64::EPSILON);
    assert!((grid[2] - 3.0).abs() < f64::EPSILON);
  }

  #[test]
  fn test_validate_bars_meta() {
    let meta = ParamMeta::bars("test", 2.0, (1.0, 6.0, 1.0), "Test");

    assert!(meta.validate(2.0).is_ok());
    assert!(meta.validate(6.0).is_ok());
    assert!(meta.validate(0.0).is_err());
    assert!(meta.validate(2.5).is_err());
    assert!(meta.validate(7.0).is_err());
  }

  #[test]
  fn test_param_meta_covers_numeric_fields() {
    let names: Vec<_> = StrategyParams::param_meta().iter().map(|m| m.name).collect();
    for name in [
      "min_downtrend_bars",
      "delay_bars",
      "below_zero_threshold",
      "below_zero_timeout",
      "stop_loss_offset",
      "zero_axis_threshold",
      "gap_margin",
      "lookback",
    ] {
      assert!(names.contains(&name), "missing metadata for {name}");
    }
  }

  #[test]
  fn test_serde_round_trip() {
    let params = StrategyParams::default();
    let json = serde_json::to_string(&params).unwrap();
    let back: StrategyParams = serde_json::from_str(&json).unwrap();
    assert_eq!(back.delay_bars.get(), params.delay_bars.get());
    assert_eq!(back.higher_timeframe, params.higher_timeframe);
  }

  #[test]
  fn test_serde_rejects_zero_bar_count() {
    let err = serde_json::from_str::<StrategyParams>(r#"{"delay_bars": 0}"#);
    assert!(err.is_err());
  }
}
