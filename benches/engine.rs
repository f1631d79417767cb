//! Benchmarks for the regime engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use macd_regime::prelude::*;

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy)]
struct TestCandle {
  ts: i64,
  open: f64,
  close: f64,
  ema_short: f64,
  ema_long: f64,
  dif: f64,
  dea: f64,
}

impl Candle for TestCandle {
  fn timestamp_ms(&self) -> i64 {
    self.ts
  }

  fn open(&self) -> f64 {
    self.open
  }

  fn high(&self) -> f64 {
    self.open.max(self.close) + 20.0
  }

  fn low(&self) -> f64 {
    self.open.min(self.close) - 20.0
  }

  fn close(&self) -> f64 {
    self.close
  }

  fn volume(&self) -> f64 {
    1000.0
  }

  fn ema_short(&self) -> f64 {
    self.ema_short
  }

  fn ema_mid(&self) -> f64 {
    (self.ema_short + self.ema_long) / 2.0
  }

  fn ema_long(&self) -> f64 {
    self.ema_long
  }

  fn dif(&self) -> f64 {
    self.dif
  }

  fn dea(&self) -> f64 {
    self.dea
  }
}

/// Generate realistic candles with drifting dea (deterministic "random")
fn generate_candles(n: usize, step_ms: i64) -> Vec<TestCandle> {
  let mut candles = Vec::with_capacity(n);
  let mut price = 50_000.0;
  let mut dea = -50.0;

  for i in 0..n {
    let drift = ((i * 7 + 13) % 100) as f64 / 2.0 - 24.0;
    let wave = ((i * 3) % 41) as f64 - 20.0;

    price += drift * 4.0;
    dea += wave / 3.0;
    let dif = dea + wave;

    candles.push(TestCandle {
      ts: (i as i64 + 1) * step_ms,
      open: price,
      close: price + drift,
      ema_short: price - wave,
      ema_long: price - 200.0,
      dif,
      dea,
    });
  }

  candles
}

fn bench_single_pipeline(c: &mut Criterion) {
  let mut group = c.benchmark_group("pipeline_push");

  for n in [1_000usize, 10_000] {
    let candles = generate_candles(n, HOUR_MS);
    group.bench_with_input(BenchmarkId::from_parameter(n), &candles, |b, candles| {
      b.iter(|| {
        let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
        for candle in candles {
          let _ = black_box(engine.push(Timeframe::H1, candle));
        }
        black_box(engine.pipeline(Timeframe::H1).unwrap().segment())
      });
    });
  }

  group.finish();
}

fn bench_parallel_advance(c: &mut Criterion) {
  let hourly = generate_candles(10_000, HOUR_MS);
  let four_hourly = generate_candles(2_500, 4 * HOUR_MS);

  c.bench_function("advance_parallel_two_timeframes", |b| {
    b.iter(|| {
      let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
      let feeds = [
        (Timeframe::H1, hourly.as_slice()),
        (Timeframe::H4, four_hourly.as_slice()),
      ];
      let (fed, errors) = advance_parallel(&mut engine, &feeds);
      black_box((fed.len(), errors.len()))
    });
  });
}

fn bench_verdict(c: &mut Criterion) {
  let mut engine = RegimeEngine::new(StrategyParams::default()).unwrap();
  // The last 4h candle closes at 5000h and the last 1h candle at 5001h,
  // so both slots are current at the benchmarked as-of instant.
  let hourly = generate_candles(5_000, HOUR_MS);
  let four_hourly = generate_candles(1_249, 4 * HOUR_MS);
  let feeds = [
    (Timeframe::H1, hourly.as_slice()),
    (Timeframe::H4, four_hourly.as_slice()),
  ];
  advance_parallel(&mut engine, &feeds);

  let as_of = 5_001 * HOUR_MS;
  c.bench_function("verdict_at", |b| {
    b.iter(|| black_box(engine.verdict_at(black_box(as_of))));
  });
}

criterion_group!(benches, bench_single_pipeline, bench_parallel_advance, bench_verdict);
criterion_main!(benches);
