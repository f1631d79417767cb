//! Property tests for the regime machinery.

use std::collections::BTreeMap;

use proptest::prelude::*;

use macd_regime::prelude::*;

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy)]
struct TestCandle {
    ts: i64,
    open: f64,
    close: f64,
    dea: f64,
    histogram: f64,
}

impl Candle for TestCandle {
    fn timestamp_ms(&self) -> i64 {
        self.ts
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.open.max(self.close) + 1.0
    }

    fn low(&self) -> f64 {
        self.open.min(self.close) - 1.0
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        1000.0
    }

    fn ema_short(&self) -> f64 {
        self.close
    }

    fn ema_mid(&self) -> f64 {
        self.close
    }

    fn ema_long(&self) -> f64 {
        self.close
    }

    fn dif(&self) -> f64 {
        self.dea + self.histogram
    }

    fn dea(&self) -> f64 {
        self.dea
    }
}

/// Replay a dea series through the pure classifier.
fn classify_series(deas: &[f64], params: &StrategyParams) -> Vec<SegmentState> {
    let mut state = SegmentState::Unknown;
    let mut counter = 0;
    let mut prev = None;
    deas.iter()
        .map(|&dea| {
            let input = SegmentInput { dea, prev_dea: prev };
            (state, counter) =
                classify_segment(state, counter, input, &CrownPhase::Idle, params);
            prev = Some(dea);
            state
        })
        .collect()
}

fn snapshot_for(
    tf: Timeframe,
    segment: SegmentState,
    close: f64,
    prev_close: f64,
    dif: f64,
    dea: f64,
    as_of_ms: i64,
) -> TimeframeSnapshot {
    TimeframeSnapshot {
        timeframe: tf,
        segment,
        crown: CrownPhase::Idle,
        jump: None,
        setup: None,
        close,
        prev_close: Some(prev_close),
        ema_short: 1000.0,
        prev_ema_short: Some(1000.0),
        ema_long: 1000.0,
        dif,
        dea,
        bars_seen: 100,
        last_open_ms: as_of_ms - tf.duration_ms(),
    }
}

proptest! {
    /// Replaying the same dea sequence twice yields identical trajectories.
    #[test]
    fn prop_classifier_replay_is_deterministic(
        deas in prop::collection::vec(-150.0f64..150.0, 1..200)
    ) {
        let params = StrategyParams::default();
        prop_assert_eq!(classify_series(&deas, &params), classify_series(&deas, &params));
    }

    /// Isolated single-bar zero-crosses never commit an uptrend while the
    /// confirmation requirement is two bars and the series stays clear of
    /// the breakthrough threshold.
    #[test]
    fn prop_single_bar_crosses_never_commit(
        pattern in prop::collection::vec((-59.0f64..-1.0, any::<bool>()), 1..80)
    ) {
        let mut deas = Vec::new();
        for (neg, spike) in pattern {
            deas.push(neg);
            if spike {
                deas.push(5.0); // a lone positive bar, always reverted next
            }
        }

        let params = StrategyParams::default();
        let trajectory = classify_series(&deas, &params);
        prop_assert!(!trajectory.contains(&SegmentState::Uptrend));
    }

    /// The trailing stop never decreases over the lifetime of one event.
    #[test]
    fn prop_trailing_stop_is_monotonic(
        steps in prop::collection::vec((0.0f64..200.0, -60.0f64..60.0), 3..120)
    ) {
        let mut params = StrategyParams::default();
        params.gap_margin = PriceDelta::new(20.0).unwrap();
        params.stop_loss_offset = PriceDelta::new(50.0).unwrap();
        let mut engine = RegimeEngine::new(params).unwrap();

        let mut open = 10_000.0;
        let mut histogram = 10.0;
        let mut tracked: Option<f64> = None;

        for (i, (jump, dh)) in steps.into_iter().enumerate() {
            open += jump - 40.0; // drifts up and down, sometimes gapping
            histogram = (histogram + dh).clamp(-500.0, 500.0);
            let candle = TestCandle {
                ts: (i as i64 + 1) * HOUR_MS,
                open,
                close: open + 5.0,
                dea: 10.0, // permanently in an uptrend
                histogram,
            };
            let outcome = engine.push(Timeframe::H1, &candle).unwrap();

            match outcome.jump {
                Some(JumpSignal::Opened(event)) => {
                    tracked = Some(event.trailing_stop_level);
                },
                Some(JumpSignal::StopRaised { event, previous_level }) => {
                    let last = tracked.expect("raise without open");
                    prop_assert!((previous_level - last).abs() < 1e-9);
                    prop_assert!(event.trailing_stop_level >= last);
                    tracked = Some(event.trailing_stop_level);
                },
                Some(JumpSignal::StopHit(_)) | Some(JumpSignal::Abandoned(_)) => {
                    tracked = None;
                },
                None => {
                    // No signal: the level must be exactly where it was.
                    if let (Some(last), Some(event)) =
                        (tracked, engine.pipeline(Timeframe::H1).unwrap().jump())
                    {
                        prop_assert!((event.trailing_stop_level - last).abs() < 1e-9);
                    }
                },
            }
        }
    }

    /// No input map can produce a Short verdict while the latch is closed.
    #[test]
    fn prop_no_short_before_first_trade(
        segment_idx in 0usize..5,
        close in 900.0f64..1100.0,
        prev_close in 900.0f64..1100.0,
        dif in -1000.0f64..1000.0,
        dea in -1000.0f64..1000.0,
    ) {
        let segment = [
            SegmentState::Unknown,
            SegmentState::Uptrend,
            SegmentState::Transition,
            SegmentState::BreakthroughAttempt,
            SegmentState::Downtrend,
        ][segment_idx];

        let as_of = 100 * HOUR_MS;
        let mut map = BTreeMap::new();
        map.insert(
            Timeframe::H1,
            snapshot_for(Timeframe::H1, segment, close, prev_close, dif, dea, as_of),
        );
        map.insert(
            Timeframe::H4,
            snapshot_for(Timeframe::H4, segment, close, prev_close, dif, dea, as_of),
        );

        let params = StrategyParams::default();
        let verdict = decide(&map, as_of, false, &params);
        prop_assert_ne!(verdict.side, Side::Short);
    }

    /// The latch is one-way: no input sequence flips it back to false.
    #[test]
    fn prop_first_trade_latch_never_resets(
        deas in prop::collection::vec(-100.0f64..100.0, 1..50)
    ) {
        let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
        engine.mark_first_trade();

        for (i, dea) in deas.into_iter().enumerate() {
            let candle = TestCandle {
                ts: (i as i64 + 1) * HOUR_MS,
                open: 1000.0,
                close: 1001.0,
                dea,
                histogram: 1.0,
            };
            engine.push(Timeframe::H1, &candle).unwrap();
            engine.verdict_at((i as i64 + 2) * HOUR_MS);
            prop_assert!(engine.first_trade_opened());
        }
    }

    /// Rejected candles leave the pipeline exactly where it was.
    #[test]
    fn prop_rejected_candles_do_not_advance_state(
        deas in prop::collection::vec(-100.0f64..100.0, 2..40)
    ) {
        let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
        for (i, &dea) in deas.iter().enumerate() {
            let candle = TestCandle {
                ts: (i as i64 + 1) * HOUR_MS,
                open: 1000.0,
                close: 1001.0,
                dea,
                histogram: 1.0,
            };
            engine.push(Timeframe::H1, &candle).unwrap();
        }

        let segment = engine.pipeline(Timeframe::H1).unwrap().segment();
        let bars = engine.pipeline(Timeframe::H1).unwrap().bars_seen();

        // Duplicate timestamp and NaN field: both must bounce.
        let dup = TestCandle {
            ts: deas.len() as i64 * HOUR_MS,
            open: 1000.0,
            close: 1001.0,
            dea: 50.0,
            histogram: 1.0,
        };
        prop_assert!(engine.push(Timeframe::H1, &dup).is_err());

        let bad = TestCandle {
            ts: (deas.len() as i64 + 1) * HOUR_MS,
            open: f64::NAN,
            close: 1001.0,
            dea: 50.0,
            histogram: 1.0,
        };
        prop_assert!(engine.push(Timeframe::H1, &bad).is_err());

        prop_assert_eq!(engine.pipeline(Timeframe::H1).unwrap().segment(), segment);
        prop_assert_eq!(engine.pipeline(Timeframe::H1).unwrap().bars_seen(), bars);
    }
}
