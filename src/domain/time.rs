//! Timeframe parsing and boundary alignment (C1).
//!
//! All functions here are pure and deterministic given their inputs —
//! no wall-clock reads except where the caller explicitly passes `now`.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Shanghai;
use std::fmt;

/// Direction used by [`align_to_timeframe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignDirection {
    Floor,
    Ceil,
    Round,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("invalid timeframe format: {0}")]
    InvalidFormat(String),
    #[error("unsupported timeframe unit: {0}")]
    UnsupportedUnit(char),
}

/// A candle interval such as `15m`, `1h`, `4h`, `1d`, `1w`, `1M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    value: u32,
    unit: char,
}

impl Timeframe {
    pub fn new(value: u32, unit: char) -> Result<Self, TimeframeError> {
        if !matches!(unit, 'm' | 'h' | 'd' | 'w' | 'M') {
            return Err(TimeframeError::UnsupportedUnit(unit));
        }
        Ok(Self { value, unit })
    }

    /// `m=60, h=3600, d=86400, w=604800, M=2592000`.
    pub fn as_seconds(&self) -> i64 {
        let multiplier: i64 = match self.unit {
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 604800,
            'M' => 2592000,
            _ => unreachable!("constructor validates unit"),
        };
        self.value as i64 * multiplier
    }

    pub fn as_binance_interval(&self) -> String {
        format!("{}{}", self.value, self.unit)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

impl std::str::FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_timeframe(s)
    }
}

/// `parseTimeframe(s)`: maps `15m` → value=15, unit='m'.
pub fn parse_timeframe(s: &str) -> Result<Timeframe, TimeframeError> {
    let s = s.trim();
    let unit = s
        .chars()
        .last()
        .ok_or_else(|| TimeframeError::InvalidFormat(s.to_string()))?;
    if !unit.is_ascii_alphabetic() {
        return Err(TimeframeError::InvalidFormat(s.to_string()));
    }
    let digits = &s[..s.len() - unit.len_utf8()];
    let value: u32 = digits
        .parse()
        .map_err(|_| TimeframeError::InvalidFormat(s.to_string()))?;
    Timeframe::new(value, unit)
}

/// Floors/ceils/rounds `t` (unix millis) to a timeframe boundary, reconstructed
/// in the fixed Asia/Shanghai zone as `spec.md` §4.1 requires.
pub fn align_to_timeframe(
    t_unix_ms: i64,
    tf: Timeframe,
    dir: AlignDirection,
) -> DateTime<Utc> {
    let period = tf.as_seconds();
    let t_secs = t_unix_ms.div_euclid(1000);

    let aligned_secs = match dir {
        AlignDirection::Floor => t_secs.div_euclid(period) * period,
        AlignDirection::Ceil => {
            let floor = t_secs.div_euclid(period) * period;
            if floor == t_secs {
                floor
            } else {
                floor + period
            }
        }
        AlignDirection::Round => {
            let floor = t_secs.div_euclid(period) * period;
            let remainder = t_secs - floor;
            if remainder * 2 >= period {
                floor + period
            } else {
                floor
            }
        }
    };

    // Reconstructing in Shanghai and converting back to UTC is a no-op for
    // instant arithmetic (a fixed-offset zone shifts wall-clock display, not
    // the underlying instant) but documents the zone the boundary is defined
    // relative to, matching the Python original's `astimezone(SHANGHAI)` step.
    let shanghai_dt = Shanghai
        .timestamp_opt(aligned_secs, 0)
        .single()
        .expect("aligned_secs is always in range");
    shanghai_dt.with_timezone(&Utc)
}

/// `timeUntilNextKline(tf, now)`.
pub fn time_until_next_kline(tf: Timeframe, now_unix_ms: i64) -> chrono::Duration {
    let next = align_to_timeframe(now_unix_ms, tf, AlignDirection::Ceil);
    let now = DateTime::<Utc>::from_timestamp_millis(now_unix_ms).expect("valid millis");
    if next > now { next - now } else { chrono::Duration::zero() }
}

/// `isKlineClosed(openTime, tf, now)`: `now ≥ openTime + period`.
pub fn is_kline_closed(open_time_ms: i64, tf: Timeframe, now_unix_ms: i64) -> bool {
    let close_time_ms = open_time_ms + tf.as_seconds() * 1000;
    now_unix_ms >= close_time_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_hour_day_week_month() {
        assert_eq!(parse_timeframe("15m").unwrap().as_seconds(), 900);
        assert_eq!(parse_timeframe("1h").unwrap().as_seconds(), 3600);
        assert_eq!(parse_timeframe("4h").unwrap().as_seconds(), 14400);
        assert_eq!(parse_timeframe("1d").unwrap().as_seconds(), 86400);
        assert_eq!(parse_timeframe("1w").unwrap().as_seconds(), 604800);
        assert_eq!(parse_timeframe("1M").unwrap().as_seconds(), 2592000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timeframe("").is_err());
        assert!(parse_timeframe("1x").is_err());
        assert!(parse_timeframe("abc").is_err());
    }

    #[test]
    fn floor_on_exact_boundary_is_identity() {
        let tf = parse_timeframe("1h").unwrap();
        let exact = 3_600_000 * 5; // exactly 5 hours since epoch
        let aligned = align_to_timeframe(exact, tf, AlignDirection::Floor);
        assert_eq!(aligned.timestamp_millis(), exact);
    }

    #[test]
    fn ceil_on_exact_boundary_is_identity() {
        let tf = parse_timeframe("15m").unwrap();
        let exact = 900_000 * 7;
        let aligned = align_to_timeframe(exact, tf, AlignDirection::Ceil);
        assert_eq!(aligned.timestamp_millis(), exact);
    }

    #[test]
    fn floor_rounds_down_within_period() {
        let tf = parse_timeframe("1h").unwrap();
        let t = 3_600_000 * 5 + 1_800_000; // 5h30m
        let aligned = align_to_timeframe(t, tf, AlignDirection::Floor);
        assert_eq!(aligned.timestamp_millis(), 3_600_000 * 5);
    }

    #[test]
    fn ceil_rounds_up_within_period() {
        let tf = parse_timeframe("1h").unwrap();
        let t = 3_600_000 * 5 + 1_800_000;
        let aligned = align_to_timeframe(t, tf, AlignDirection::Ceil);
        assert_eq!(aligned.timestamp_millis(), 3_600_000 * 6);
    }

    #[test]
    fn is_kline_closed_boundary() {
        let tf = parse_timeframe("1h").unwrap();
        let open = 0i64;
        assert!(!is_kline_closed(open, tf, 3_600_000 - 1));
        assert!(is_kline_closed(open, tf, 3_600_000));
    }

    #[test]
    fn time_until_next_kline_is_nonnegative_and_bounded() {
        let tf = parse_timeframe("15m").unwrap();
        let now = 900_000 * 3 + 100_000;
        let remaining = time_until_next_kline(tf, now);
        assert!(remaining.num_milliseconds() > 0);
        assert!(remaining.num_milliseconds() <= 900_000);
    }
}
