//! Wall-clock access and the fixed-point arithmetic behind every time field.
//!
//! Timestamps are taken as `f64` seconds, but sums and differences of them are never computed
//! in binary floating point. Each operand is carried into decimal arithmetic at
//! [`SIGNIFICANT_DIGITS`] significant digits, combined exactly, and the result is truncated to
//! [`SCALE`] fractional digits.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;
use web_time::{SystemTime, UNIX_EPOCH};

/// Significant digits kept when a float enters decimal arithmetic.
pub const SIGNIFICANT_DIGITS: usize = 14;

/// Fractional digits of every computed time field.
pub const SCALE: u32 = 4;

/// Source of wall-clock time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default()
    }
}

impl<F> Clock for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn now(&self) -> f64 {
        self()
    }
}

/// `end - start`, truncated to [`SCALE`] digits.
pub fn elapsed(start: f64, end: f64) -> f64 {
    to_f64(truncate(decimal(end) - decimal(start)))
}

/// `start + duration`, truncated to [`SCALE`] digits.
pub fn offset(start: f64, duration: f64) -> f64 {
    to_f64(truncate(decimal(start) + decimal(duration)))
}

fn decimal(value: f64) -> Decimal {
    let scientific = format!("{:.*e}", SIGNIFICANT_DIGITS - 1, value);
    Decimal::from_scientific(&scientific).unwrap_or_else(|error| {
        warn!(value, error = %error, "Time value cannot be represented as a decimal");
        Decimal::ZERO
    })
}

fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::ToZero)
}

fn to_f64(value: Decimal) -> f64 {
    // Going through the decimal string gives the nearest double to the exact decimal value.
    f64::from_str(&value.to_string()).unwrap_or_default()
}
