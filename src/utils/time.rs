//! Time-base arithmetic and clock formatting

use serde::{Deserialize, Serialize};

/// Ticks per second of the canonical time base (microseconds).
pub const TIME_BASE: i64 = 1_000_000;

/// A rational time base: one tick lasts `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    /// The canonical microsecond time base.
    pub const MICROSECONDS: Rational = Rational { num: 1, den: 1_000_000 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

/// Rescale a timestamp from one time base to another.
///
/// Rounds to the nearest representable tick, half away from zero, with a
/// 128-bit intermediate so no realistic timestamp can overflow.
pub fn rescale(ts: i64, from: Rational, to: Rational) -> i64 {
    let num = ts as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    debug_assert!(den != 0, "time base with zero ticks");
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let q = if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    };
    q as i64
}

/// Rescale a timestamp from its own time base to microseconds.
pub fn to_micros(ts: i64, tb: Rational) -> i64 {
    rescale(ts, tb, Rational::MICROSECONDS)
}

/// Format a microsecond clock value as `[-]HH:MM:SS.cc` (centiseconds).
pub fn format_clock_centi(us: i64) -> String {
    let (sign, (hours, mins, secs, rem_us)) = clock_parts(us);
    format!(
        "{}{:02}:{:02}:{:02}.{:02}",
        sign,
        hours,
        mins,
        secs,
        (100 * rem_us) / TIME_BASE
    )
}

/// Format a microsecond clock value as `[-]HH:MM:SS.uuuuuu`.
pub fn format_clock_micro(us: i64) -> String {
    let (sign, (hours, mins, secs, rem_us)) = clock_parts(us);
    format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mins, secs, rem_us)
}

fn clock_parts(us: i64) -> (&'static str, (i64, i64, i64, i64)) {
    let sign = if us < 0 { "-" } else { "" };
    let abs = us.unsigned_abs() as i64;
    let mut secs = abs / TIME_BASE;
    let rem_us = abs % TIME_BASE;
    let mut mins = secs / 60;
    secs %= 60;
    let hours = mins / 60;
    mins %= 60;
    (sign, (hours, mins, secs, rem_us))
}
