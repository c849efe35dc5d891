//! Indicator engine (C4): batch computation over a candle slice with stable
//! NaN/warm-up semantics (`spec.md` §4.4). `f64::NAN` is the "undefined"
//! sentinel; it survives serialization as JSON `null` (see [`to_json_value`]).

use crate::domain::types::Candle;
use serde_json::Value;
use std::collections::HashMap;

/// One named output array, parallel to the input candle slice.
pub type Series = Vec<f64>;

/// `name → [numeric params]`, parsed from the grammar in `spec.md` §3.
#[derive(Debug, Clone, Default)]
pub struct IndicatorConfig {
    pub entries: Vec<(String, Vec<f64>)>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndicatorConfigError {
    #[error("unknown indicator name: {0}")]
    UnknownName(String),
}

const KNOWN_NAMES: &[&str] = &["ma", "ema", "rsi", "macd", "bbands", "kdj", "atr"];

impl IndicatorConfig {
    /// Parses `name=p1,p2,...;name2=p1,...`. Commented (`#`) and empty
    /// entries are silently dropped; unknown names are rejected with a
    /// warning (caller logs it — this function returns the error so the
    /// caller decides whether to skip or fail the whole config).
    pub fn parse(spec_str: &str) -> Result<Self, IndicatorConfigError> {
        let mut entries = Vec::new();
        for raw_entry in spec_str.split(';') {
            let entry = raw_entry.trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let Some((name, params_str)) = entry.split_once('=') else {
                continue;
            };
            let name = name.trim().to_lowercase();
            if !KNOWN_NAMES.contains(&name.as_str()) {
                return Err(IndicatorConfigError::UnknownName(name));
            }
            let params = params_str
                .split(',')
                .filter_map(|p| p.trim().parse::<f64>().ok())
                .collect();
            entries.push((name, params));
        }
        Ok(Self { entries })
    }
}

/// Simple moving average; warm-up of `n-1` positions is undefined.
pub fn ma(closes: &[f64], n: usize) -> Series {
    let mut out = vec![f64::NAN; closes.len()];
    if n == 0 {
        return out;
    }
    for i in (n - 1)..closes.len() {
        let window = &closes[i + 1 - n..=i];
        out[i] = window.iter().sum::<f64>() / n as f64;
    }
    out
}

/// Exponential moving average. `α = 2/(n+1)`, seeded from the first valid
/// close (no simple-average seeding), warm-up `n-1` positions undefined to
/// match [`ma`]'s convention.
pub fn ema(closes: &[f64], n: usize) -> Series {
    let mut out = vec![f64::NAN; closes.len()];
    if n == 0 || closes.is_empty() {
        return out;
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut prev = closes[0];
    for (i, &close) in closes.iter().enumerate() {
        if i == 0 {
            prev = close;
        } else {
            prev = alpha * close + (1.0 - alpha) * prev;
        }
        if i >= n - 1 {
            out[i] = prev;
        }
    }
    out
}

/// Wilder-smoothed RSI; output in `[0,100]`; warm-up `n` positions undefined.
pub fn rsi(closes: &[f64], n: usize) -> Series {
    let len = closes.len();
    let mut out = vec![f64::NAN; len];
    if n == 0 || len <= n {
        return out;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=n {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let mut avg_gain = gains / n as f64;
    let mut avg_loss = losses / n as f64;
    out[n] = rsi_from_averages(avg_gain, avg_loss);

    for i in (n + 1)..len {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (n as f64 - 1.0) + gain) / n as f64;
        avg_loss = (avg_loss * (n as f64 - 1.0) + loss) / n as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }

    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

pub struct Macd {
    pub macd_line: Series,
    pub signal: Series,
    pub histogram: Series,
}

/// `EMA(f) − EMA(s)`, signal `= EMA_g(macd)`, hist `= macd − signal`.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let macd_line: Series = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(&f, &s)| if f.is_nan() || s.is_nan() { f64::NAN } else { f - s })
        .collect();

    let signal = ema_of_series(&macd_line, signal_period);
    let histogram: Series = macd_line
        .iter()
        .zip(signal.iter())
        .map(|(&m, &s)| if m.is_nan() || s.is_nan() { f64::NAN } else { m - s })
        .collect();

    Macd { macd_line, signal, histogram }
}

/// EMA over a series that may itself start with leading NaNs (used for the
/// MACD signal line, whose input is the macd line rather than raw closes).
fn ema_of_series(series: &[f64], n: usize) -> Series {
    let mut out = vec![f64::NAN; series.len()];
    let Some(first_valid) = series.iter().position(|v| !v.is_nan()) else {
        return out;
    };
    if n == 0 {
        return out;
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut prev = series[first_valid];
    for i in first_valid..series.len() {
        let v = series[i];
        if i == first_valid {
            prev = v;
        } else {
            prev = alpha * v + (1.0 - alpha) * prev;
        }
        if i >= first_valid + n - 1 {
            out[i] = prev;
        }
    }
    out
}

pub struct BollingerBands {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
}

/// middle `= MA(n)`, upper `= middle + σup·stdev`, lower `= middle − σdn·stdev`.
pub fn bbands(closes: &[f64], n: usize, sigma_up: f64, sigma_down: f64) -> BollingerBands {
    let middle = ma(closes, n);
    let mut upper = vec![f64::NAN; closes.len()];
    let mut lower = vec![f64::NAN; closes.len()];

    if n == 0 {
        return BollingerBands { upper, middle, lower };
    }

    for i in (n - 1)..closes.len() {
        let window = &closes[i + 1 - n..=i];
        let mean = middle[i];
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let stdev = variance.sqrt();
        upper[i] = mean + sigma_up * stdev;
        lower[i] = mean - sigma_down * stdev;
    }

    BollingerBands { upper, middle, lower }
}

pub struct Kdj {
    pub k: Series,
    pub d: Series,
    pub j: Series,
}

/// `RSV = 100·(close − minLow_kP)/(maxHigh_kP − minLow_kP)`;
/// `K = EWMA_{1/dP}(RSV)`, `D = EWMA_{1/jP}(K)`, `J = 3K − 2D`.
pub fn kdj(candles: &[Candle], k_period: usize, d_period: usize, j_period: usize) -> Kdj {
    let len = candles.len();
    let mut k = vec![f64::NAN; len];
    let mut d = vec![f64::NAN; len];
    let mut j = vec![f64::NAN; len];

    if k_period == 0 || len < k_period {
        return Kdj { k, d, j };
    }

    let mut prev_k = 0.0;
    let mut prev_d = 0.0;
    let mut seeded = false;

    for i in (k_period - 1)..len {
        let window = &candles[i + 1 - k_period..=i];
        let min_low = window
            .iter()
            .map(|c| c.low.to_string().parse::<f64>().unwrap_or(f64::NAN))
            .fold(f64::INFINITY, f64::min);
        let max_high = window
            .iter()
            .map(|c| c.high.to_string().parse::<f64>().unwrap_or(f64::NAN))
            .fold(f64::NEG_INFINITY, f64::max);
        let close: f64 = candles[i].close.to_string().parse().unwrap_or(f64::NAN);

        let rsv = if (max_high - min_low).abs() < f64::EPSILON {
            50.0
        } else {
            100.0 * (close - min_low) / (max_high - min_low)
        };

        let alpha_k = 1.0 / d_period.max(1) as f64;
        let alpha_d = 1.0 / j_period.max(1) as f64;

        if !seeded {
            // Matches pandas' `ewm(adjust=False)`: the series is seeded from
            // its own first value rather than a neutral constant.
            prev_k = rsv;
            prev_d = prev_k;
            seeded = true;
        } else {
            prev_k = alpha_k * rsv + (1.0 - alpha_k) * prev_k;
            prev_d = alpha_d * prev_k + (1.0 - alpha_d) * prev_d;
        }

        k[i] = prev_k;
        d[i] = prev_d;
        j[i] = 3.0 * prev_k - 2.0 * prev_d;
    }

    Kdj { k, d, j }
}

/// Moving mean of true range over `n`.
pub fn atr(candles: &[Candle], n: usize) -> Series {
    let len = candles.len();
    let mut tr = vec![f64::NAN; len];
    for i in 0..len {
        let high: f64 = candles[i].high.to_string().parse().unwrap_or(f64::NAN);
        let low: f64 = candles[i].low.to_string().parse().unwrap_or(f64::NAN);
        if i == 0 {
            tr[i] = high - low;
        } else {
            let prev_close: f64 = candles[i - 1].close.to_string().parse().unwrap_or(f64::NAN);
            tr[i] = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
        }
    }
    ma(&tr, n)
}

/// `{latestCross, crossIndex, goldenCrosses[], deathCrosses[], currentPosition}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrossKind {
    Golden,
    Death,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Above,
    Below,
}

#[derive(Debug, Clone)]
pub struct CrossSignal {
    pub latest_cross: CrossKind,
    pub cross_index: Option<usize>,
    pub golden_crosses: Vec<usize>,
    pub death_crosses: Vec<usize>,
    pub current_position: Option<Position>,
}

/// Identifies sign-changes of `fast − slow`, ignoring leading undefined
/// positions.
pub fn detect_cross(fast: &[f64], slow: &[f64]) -> CrossSignal {
    let len = fast.len().min(slow.len());
    let mut golden = Vec::new();
    let mut death = Vec::new();
    let mut prev_sign: Option<bool> = None; // true = fast above slow

    for i in 0..len {
        let f = fast[i];
        let s = slow[i];
        if f.is_nan() || s.is_nan() {
            continue;
        }
        let sign = f > s;
        if let Some(prev) = prev_sign {
            if !prev && sign {
                golden.push(i);
            } else if prev && !sign {
                death.push(i);
            }
        }
        prev_sign = Some(sign);
    }

    let latest_golden = golden.last().copied();
    let latest_death = death.last().copied();
    let (latest_cross, cross_index) = match (latest_golden, latest_death) {
        (Some(g), Some(d)) if g > d => (CrossKind::Golden, Some(g)),
        (Some(g), Some(d)) if d > g => (CrossKind::Death, Some(d)),
        (Some(g), None) => (CrossKind::Golden, Some(g)),
        (None, Some(d)) => (CrossKind::Death, Some(d)),
        _ => (CrossKind::None, None),
    };

    let current_position = prev_sign.map(|above| if above { Position::Above } else { Position::Below });

    CrossSignal {
        latest_cross,
        cross_index,
        golden_crosses: golden,
        death_crosses: death,
        current_position,
    }
}

/// Counts indicator keys whose latest value is defined (not NaN). The
/// advisor continues with a "system note" if this is zero rather than
/// failing — see `application::advisor`.
pub fn validate_indicators(map: &HashMap<String, Series>) -> usize {
    map.values()
        .filter(|series| series.last().is_some_and(|v| !v.is_nan()))
        .count()
}

/// NaN serializes as JSON `null`, which round-trips back to NaN on read —
/// the "undefined" sentinel must survive persistence per `spec.md` §4.4.
pub fn to_json_value(series: &[f64]) -> Value {
    Value::Array(
        series
            .iter()
            .map(|&v| {
                if v.is_nan() {
                    Value::Null
                } else {
                    serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
                }
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open: Decimal::try_from(o).unwrap(),
            high: Decimal::try_from(h).unwrap(),
            low: Decimal::try_from(l).unwrap(),
            close: Decimal::try_from(c).unwrap(),
            volume: dec!(1),
            is_closed: true,
        }
    }
    use rust_decimal::Decimal;

    #[test]
    fn ma_warmup_is_n_minus_1() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = ma(&closes, 3);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert!(!out[2].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[4], 4.0);
    }

    #[test]
    fn ema_finite_count_matches_len_minus_n_minus_1() {
        let n = 10usize;
        let closes: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let out = ema(&closes, n);
        let finite_count = out.iter().filter(|v| !v.is_nan()).count();
        assert_eq!(finite_count, closes.len() - (n - 1));
    }

    #[test]
    fn rsi_bounds_and_warmup() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0).collect();
        let out = rsi(&closes, 14);
        for i in 0..=14 {
            assert!(out[i].is_nan());
        }
        for &v in out.iter().skip(15) {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(out[19], 100.0);
    }

    #[test]
    fn macd_three_parallel_outputs_same_length() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.1).collect();
        let m = macd(&closes, 12, 26, 9);
        assert_eq!(m.macd_line.len(), closes.len());
        assert_eq!(m.signal.len(), closes.len());
        assert_eq!(m.histogram.len(), closes.len());
        assert!(m.macd_line.iter().skip(40).all(|v| !v.is_nan()));
    }

    #[test]
    fn bbands_middle_matches_ma() {
        let closes = vec![10.0, 11.0, 12.0, 9.0, 10.0, 13.0];
        let bb = bbands(&closes, 3, 2.0, 2.0);
        let m = ma(&closes, 3);
        for i in 0..closes.len() {
            if m[i].is_nan() {
                assert!(bb.middle[i].is_nan());
            } else {
                assert_eq!(bb.middle[i], m[i]);
                assert!(bb.upper[i] >= bb.middle[i]);
                assert!(bb.lower[i] <= bb.middle[i]);
            }
        }
    }

    #[test]
    fn kdj_bounds_on_valid_range() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 + i as f64;
                candle(base, base + 2.0, base - 2.0, base + 0.5)
            })
            .collect();
        let out = kdj(&candles, 9, 3, 3);
        for i in 8..20 {
            assert!(!out.k[i].is_nan());
        }
    }

    #[test]
    fn atr_nonnegative() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.3).sin() * 3.0;
                candle(base, base + 1.5, base - 1.5, base)
            })
            .collect();
        let out = atr(&candles, 14);
        for &v in out.iter().filter(|v| !v.is_nan()) {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn detect_cross_finds_golden_and_death() {
        // fast crosses above slow at index 2, back below at index 5.
        let fast = vec![1.0, 1.0, 3.0, 3.0, 3.0, 1.0];
        let slow = vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        let signal = detect_cross(&fast, &slow);
        assert_eq!(signal.golden_crosses, vec![2]);
        assert_eq!(signal.death_crosses, vec![5]);
        assert_eq!(signal.latest_cross, CrossKind::Death);
    }

    #[test]
    fn detect_cross_ignores_leading_nan() {
        let fast = vec![f64::NAN, f64::NAN, 3.0, 1.0];
        let slow = vec![f64::NAN, 2.0, 2.0, 2.0];
        let signal = detect_cross(&fast, &slow);
        assert_eq!(signal.death_crosses, vec![3]);
    }

    #[test]
    fn validate_indicators_counts_defined_latest_values() {
        let mut map = HashMap::new();
        map.insert("rsi".to_string(), vec![f64::NAN, 55.0]);
        map.insert("atr".to_string(), vec![f64::NAN, f64::NAN]);
        assert_eq!(validate_indicators(&map), 1);
    }

    #[test]
    fn validate_indicators_zero_when_all_undefined() {
        let mut map = HashMap::new();
        map.insert("rsi".to_string(), vec![f64::NAN, f64::NAN]);
        assert_eq!(validate_indicators(&map), 0);
    }

    #[test]
    fn nan_round_trips_through_json_as_null() {
        let series = vec![f64::NAN, 1.5];
        let json = to_json_value(&series);
        assert_eq!(json, serde_json::json!([null, 1.5]));
    }

    #[test]
    fn config_parses_known_names_and_skips_comments() {
        let cfg = IndicatorConfig::parse("rsi=14; # comment\n;ema=20,5;macd=12,26,9").unwrap();
        let names: Vec<_> = cfg.entries.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec!["rsi", "ema", "macd"]);
    }

    #[test]
    fn config_rejects_unknown_name() {
        assert!(IndicatorConfig::parse("wobble=1,2").is_err());
    }
}
