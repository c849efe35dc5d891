//! C4 orchestration: resolves `IndicatorConfig` entries against a candle
//! slice and hands back the full named output map the advisor prompts from.

use crate::domain::indicators::{self, IndicatorConfig, Series};
use crate::domain::types::Candle;
use std::collections::HashMap;
use tracing::warn;

pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    /// Parses `spec_str` and logs (does not fail) on any entry this build
    /// doesn't recognize — `spec.md` §4.4 treats an unknown indicator name
    /// as configuration the engine should warn about and skip.
    pub fn from_spec_str(spec_str: &str) -> Self {
        match IndicatorConfig::parse(spec_str) {
            Ok(config) => Self::new(config),
            Err(e) => {
                warn!("indicator config parse error, falling back to defaults: {}", e);
                Self::new(default_config())
            }
        }
    }

    /// Runs every configured indicator over `candles`, returning named
    /// series plus, when both a fast/slow MA or EMA pair exists in the
    /// config, a derived cross-signal series under `"cross"`.
    pub fn compute(&self, candles: &[Candle]) -> HashMap<String, Series> {
        let closes: Vec<f64> = candles
            .iter()
            .map(|c| c.close.to_string().parse().unwrap_or(f64::NAN))
            .collect();

        let mut out = HashMap::new();
        let mut ema_periods: Vec<usize> = Vec::new();

        for (name, params) in &self.config.entries {
            match name.as_str() {
                "ma" => {
                    if let Some(&n) = params.first() {
                        out.insert(format!("ma_{}", n as usize), indicators::ma(&closes, n as usize));
                    }
                }
                "ema" => {
                    if let Some(&n) = params.first() {
                        let period = n as usize;
                        ema_periods.push(period);
                        out.insert(format!("ema_{period}"), indicators::ema(&closes, period));
                    }
                }
                "rsi" => {
                    if let Some(&n) = params.first() {
                        out.insert("rsi".to_string(), indicators::rsi(&closes, n as usize));
                    }
                }
                "macd" => {
                    if params.len() >= 3 {
                        let m = indicators::macd(&closes, params[0] as usize, params[1] as usize, params[2] as usize);
                        out.insert("macd".to_string(), m.macd_line);
                        out.insert("macd_signal".to_string(), m.signal);
                        out.insert("macd_hist".to_string(), m.histogram);
                    }
                }
                "bbands" => {
                    if params.len() >= 3 {
                        let bb = indicators::bbands(&closes, params[0] as usize, params[1], params[2]);
                        out.insert("bb_upper".to_string(), bb.upper);
                        out.insert("bb_middle".to_string(), bb.middle);
                        out.insert("bb_lower".to_string(), bb.lower);
                    }
                }
                "kdj" => {
                    if params.len() >= 3 {
                        let k = indicators::kdj(candles, params[0] as usize, params[1] as usize, params[2] as usize);
                        out.insert("kdj_k".to_string(), k.k);
                        out.insert("kdj_d".to_string(), k.d);
                        out.insert("kdj_j".to_string(), k.j);
                    }
                }
                "atr" => {
                    if let Some(&n) = params.first() {
                        out.insert("atr".to_string(), indicators::atr(candles, n as usize));
                    }
                }
                other => warn!("unhandled indicator entry in compute: {}", other),
            }
        }

        if ema_periods.len() >= 2 {
            ema_periods.sort_unstable();
            let (fast, slow) = (ema_periods[0], *ema_periods.last().unwrap());
            if let (Some(fast_series), Some(slow_series)) =
                (out.get(&format!("ema_{fast}")).cloned(), out.get(&format!("ema_{slow}")).cloned())
            {
                let cross = indicators::detect_cross(&fast_series, &slow_series);
                out.insert("cross_position".to_string(), vec![match cross.current_position {
                    Some(indicators::Position::Above) => 1.0,
                    Some(indicators::Position::Below) => -1.0,
                    None => f64::NAN,
                }]);
            }
        }

        out
    }

    /// Count of indicators with a defined latest value — forwarded to the
    /// advisor so it can attach a "system note" when this is zero.
    pub fn defined_count(&self, computed: &HashMap<String, Series>) -> usize {
        indicators::validate_indicators(computed)
    }
}

fn default_config() -> IndicatorConfig {
    IndicatorConfig {
        entries: vec![
            ("ema".to_string(), vec![12.0]),
            ("ema".to_string(), vec![26.0]),
            ("rsi".to_string(), vec![14.0]),
            ("macd".to_string(), vec![12.0, 26.0, 9.0]),
            ("bbands".to_string(), vec![20.0, 2.0, 2.0]),
            ("atr".to_string(), vec![14.0]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(close: f64) -> Candle {
        Candle {
            open_time_ms: 0,
            open: dec!(1),
            high: rust_decimal::Decimal::try_from(close + 1.0).unwrap(),
            low: rust_decimal::Decimal::try_from(close - 1.0).unwrap(),
            close: rust_decimal::Decimal::try_from(close).unwrap(),
            volume: dec!(1),
            is_closed: true,
        }
    }

    #[test]
    fn computes_all_configured_series() {
        let candles: Vec<Candle> = (0..60).map(|i| candle(100.0 + i as f64 * 0.2)).collect();
        let engine = IndicatorEngine::from_spec_str("ema=12;ema=26;rsi=14;macd=12,26,9;bbands=20,2,2;atr=14");
        let computed = engine.compute(&candles);
        assert!(computed.contains_key("ema_12"));
        assert!(computed.contains_key("ema_26"));
        assert!(computed.contains_key("rsi"));
        assert!(computed.contains_key("macd"));
        assert!(computed.contains_key("bb_upper"));
        assert!(computed.contains_key("atr"));
        assert!(computed.contains_key("cross_position"));
    }

    #[test]
    fn falls_back_to_defaults_on_bad_config() {
        let engine = IndicatorEngine::from_spec_str("bogus=1,2,3");
        let candles: Vec<Candle> = (0..30).map(|i| candle(100.0 + i as f64)).collect();
        let computed = engine.compute(&candles);
        assert!(computed.contains_key("rsi"));
    }

    #[test]
    fn defined_count_reflects_warm_up() {
        let engine = IndicatorEngine::from_spec_str("rsi=14");
        let candles: Vec<Candle> = (0..5).map(|i| candle(100.0 + i as f64)).collect();
        let computed = engine.compute(&candles);
        assert_eq!(engine.defined_count(&computed), 0);
    }
}
