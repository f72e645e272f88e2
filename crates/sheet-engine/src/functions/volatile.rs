//! Volatile builtins (`NOW`, `TODAY`, `RAND`) and the injected clock and
//! random-number capabilities they consume.
//!
//! `NOW` and `TODAY` return a floating date serial:
//! `(epoch_millis - SERIAL_EPOCH_MS) / MS_PER_DAY`, anchored at
//! 1899-12-30T00:00:00Z. `TODAY` floors to midnight local time.

use chrono::offset::LocalResult;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use rand::Rng;
use sheet_model::CellValue;

use crate::functions::{ArgValue, FunctionContext, FunctionSpec, Volatility};

/// Millisecond timestamp of 1899-12-30T00:00:00Z, the serial-date anchor.
pub const SERIAL_EPOCH_MS: i64 = -2_209_161_600_000;

/// Milliseconds in a day.
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Time source consulted by `NOW` and `TODAY`. Hosts (and tests) may inject
/// a deterministic implementation.
pub trait Clock {
    fn now(&self) -> DateTime<Local>;
}

/// Default wall-clock implementation.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Random source consulted by `RAND`; yields floats in `[0, 1)`.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

/// Default source backed by the thread-local RNG.
pub struct ThreadRandom(rand::rngs::ThreadRng);

impl ThreadRandom {
    pub fn new() -> Self {
        Self(rand::thread_rng())
    }
}

impl Default for ThreadRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        self.0.gen()
    }
}

/// Days since the serial anchor for an instant.
fn serial_for(instant: DateTime<Local>) -> f64 {
    (instant.timestamp_millis() - SERIAL_EPOCH_MS) as f64 / MS_PER_DAY
}

inventory::submit! {
    FunctionSpec {
        name: "NOW",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::Volatile,
        implementation: now,
    }
}

fn now(ctx: &dyn FunctionContext, _args: &[ArgValue]) -> CellValue {
    CellValue::Number(serial_for(ctx.now()))
}

inventory::submit! {
    FunctionSpec {
        name: "TODAY",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::Volatile,
        implementation: today,
    }
}

fn today(ctx: &dyn FunctionContext, _args: &[ArgValue]) -> CellValue {
    let now = ctx.now();
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let midnight = match Local.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t,
        // DST transitions can make local midnight ambiguous or missing.
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => now,
    };
    CellValue::Number(serial_for(midnight).floor())
}

inventory::submit! {
    FunctionSpec {
        name: "RAND",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::Volatile,
        implementation: rand_fn,
    }
}

fn rand_fn(ctx: &dyn FunctionContext, _args: &[ArgValue]) -> CellValue {
    CellValue::Number(ctx.next_random())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::call_function;
    use crate::functions::testing::GridContext;

    #[test]
    fn now_matches_the_injected_clock() {
        let mut ctx = GridContext::default();
        // 2024-01-01T00:00:00Z, whose date serial is 45292.
        ctx.now = Local.timestamp_millis_opt(1_704_067_200_000).unwrap();

        let out = call_function(&ctx, "NOW", &[]);
        let CellValue::Number(serial) = out else {
            panic!("NOW must return a number, got {out:?}");
        };
        assert!((serial - 45_292.0).abs() < 2.0, "serial {serial}");
    }

    #[test]
    fn today_is_a_whole_day_at_or_before_now() {
        let ctx = GridContext::default();

        let CellValue::Number(now) = call_function(&ctx, "NOW", &[]) else {
            panic!("NOW must return a number");
        };
        let CellValue::Number(today) = call_function(&ctx, "TODAY", &[]) else {
            panic!("TODAY must return a number");
        };

        assert_eq!(today, today.floor());
        assert!(today <= now);
        assert!(now - today < 2.0);
    }

    #[test]
    fn rand_uses_the_injected_source() {
        let ctx = GridContext {
            randoms: std::cell::RefCell::new(vec![0.125]),
            ..GridContext::default()
        };
        assert_eq!(call_function(&ctx, "RAND", &[]), CellValue::Number(0.125));
    }
}
