//! Risk calculator (C7): pure functions, `spec.md` §4.7. All math in `f64`
//! since these operate on advisor-facing prices/percentages, not wire
//! quantities (those are re-quantized to `Decimal` at the trader boundary).

use crate::domain::types::PositionSide;

/// Assumed in the fixed fractional-Kelly shape `spec.md` §4.7 specifies.
const ASSUMED_WIN_RATE: f64 = 0.55;
const ASSUMED_RR: f64 = 2.0;
const KELLY_SAFETY_FACTOR: f64 = 0.5;
const KELLY_MIN: f64 = 0.001;
const KELLY_MAX: f64 = 0.05;

/// `entry ∓ k·atr`, clamped ≥ 0.
pub fn stop_loss(entry: f64, atr: f64, k: f64, side: PositionSide) -> f64 {
    let distance = k * atr;
    let raw = match side {
        PositionSide::Long => entry - distance,
        PositionSide::Short => entry + distance,
    };
    raw.max(0.0)
}

/// `entry ± rr·|entry−stop|`, clamped ≥ 0.
pub fn take_profit(entry: f64, stop: f64, rr: f64, side: PositionSide) -> f64 {
    let distance = (entry - stop).abs() * rr;
    let raw = match side {
        PositionSide::Long => entry + distance,
        PositionSide::Short => entry - distance,
    };
    raw.max(0.0)
}

/// `riskAmount / stopDistancePct`, capped so required margin ≤ balance;
/// returns coin quantity.
pub fn position_size(balance: f64, risk_pct: f64, entry: f64, stop: f64, leverage: u32) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    let risk_amount = balance * (risk_pct / 100.0);
    let stop_distance_pct = (entry - stop).abs() / entry;
    if stop_distance_pct <= 0.0 {
        return 0.0;
    }

    let mut position_value = risk_amount / stop_distance_pct;
    let lev = leverage.max(1) as f64;
    let mut margin_required = position_value / lev;

    if margin_required > balance {
        margin_required = balance;
        position_value = margin_required * lev;
    }

    position_value / entry
}

/// Fractional-Kelly leverage shape: Kelly fraction `f = p − (1−p)/b`, halved
/// for safety, clamped to `[0.001, 0.05]`, divided by stop-distance percent,
/// then mapped via `1 + ln(x+1)/ln(maxLev+1) · (maxLev − 1)` to an integer in
/// `[1, maxLev]`.
pub fn leverage(entry: f64, stop: f64, max_leverage: u32) -> u32 {
    if entry <= 0.0 || max_leverage == 0 {
        return 1;
    }
    let stop_distance_pct = (entry - stop).abs() / entry;
    if stop_distance_pct <= 0.0 {
        return max_leverage.max(1);
    }

    let p = ASSUMED_WIN_RATE;
    let b = ASSUMED_RR;
    let kelly_fraction = p - (1.0 - p) / b;
    let safe_fraction = (kelly_fraction * KELLY_SAFETY_FACTOR).clamp(KELLY_MIN, KELLY_MAX);

    let x = safe_fraction / stop_distance_pct;
    let max_lev_f = max_leverage as f64;
    let mapped = 1.0 + (x + 1.0).ln() / (max_lev_f + 1.0).ln() * (max_lev_f - 1.0);

    (mapped.round() as i64).clamp(1, max_leverage as i64) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct RiskMetrics {
    pub position_size: f64,
    pub margin_required: f64,
    pub potential_loss: f64,
    pub potential_profit: f64,
    pub loss_percent: f64,
    pub profit_percent: f64,
    pub risk_reward_ratio: f64,
}

/// Missing ATR in the indicators triggers the estimate `atr = 0.02·entry`
/// at the call site (see `application::advisor`), not here — this function
/// assumes a resolved ATR has already been supplied.
pub fn risk_metrics(
    entry: f64,
    stop: f64,
    take_profit_price: f64,
    balance: f64,
    risk_pct: f64,
    lev: u32,
) -> RiskMetrics {
    let size = position_size(balance, risk_pct, entry, stop, lev);
    let position_value = size * entry;
    let margin_required = position_value / lev.max(1) as f64;
    let potential_loss = size * (entry - stop).abs();
    let potential_profit = size * (take_profit_price - entry).abs();

    let stop_distance_pct = (entry - stop).abs() / entry * 100.0;
    let profit_distance_pct = (take_profit_price - entry).abs() / entry * 100.0;
    let risk_reward_ratio = if stop_distance_pct > 0.0 {
        profit_distance_pct / stop_distance_pct
    } else {
        0.0
    };

    RiskMetrics {
        position_size: size,
        margin_required,
        potential_loss,
        potential_profit,
        loss_percent: if balance > 0.0 { potential_loss / balance * 100.0 } else { 0.0 },
        profit_percent: if balance > 0.0 { potential_profit / balance * 100.0 } else { 0.0 },
        risk_reward_ratio,
    }
}

/// `atr = 0.02·entry` — the fallback when the indicator engine produced no
/// valid ATR value.
pub fn estimated_atr(entry: f64) -> f64 {
    0.02 * entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_single_buy_triple() {
        let entry = 50000.0;
        let atr_val = 100.0;
        let sl = stop_loss(entry, atr_val, 2.0, PositionSide::Long);
        assert_eq!(sl, 49800.0);

        let tp = take_profit(entry, sl, 2.0, PositionSide::Long);
        assert_eq!(tp, 50400.0);

        let lev = leverage(entry, sl, 10);
        assert!(lev >= 1 && lev <= 10);

        let qty = position_size(10000.0, 1.0, entry, sl, lev);
        // risk_amount = 100, stop_distance_pct = 200/50000 = 0.004
        // position_value = 100 / 0.004 = 25000, qty = 25000/entry before margin cap
        assert!(qty > 0.0);
    }

    #[test]
    fn stop_loss_never_negative() {
        let sl = stop_loss(10.0, 1000.0, 2.0, PositionSide::Long);
        assert_eq!(sl, 0.0);
    }

    #[test]
    fn short_side_inverts_direction() {
        let entry = 100.0;
        let sl = stop_loss(entry, 5.0, 1.0, PositionSide::Short);
        assert_eq!(sl, 105.0);
        let tp = take_profit(entry, sl, 2.0, PositionSide::Short);
        assert_eq!(tp, 90.0);
    }

    #[test]
    fn leverage_clamped_to_range() {
        let lev = leverage(100.0, 99.999, 20);
        assert!(lev >= 1 && lev <= 20);
        let lev_wide_stop = leverage(100.0, 50.0, 20);
        assert!(lev_wide_stop >= 1 && lev_wide_stop <= 20);
    }

    #[test]
    fn position_size_capped_by_balance() {
        let qty = position_size(1000.0, 50.0, 100.0, 99.0, 1);
        // risk_amount huge relative to stop distance; margin should be capped at balance
        let margin_implied = qty * 100.0;
        assert!(margin_implied <= 1000.0 + 1e-6);
    }

    #[test]
    fn risk_metrics_consistent() {
        let m = risk_metrics(50000.0, 49800.0, 50400.0, 10000.0, 1.0, 5);
        assert!(m.potential_loss > 0.0);
        assert!(m.potential_profit > 0.0);
        assert!((m.risk_reward_ratio - 2.0).abs() < 0.01);
    }

    #[test]
    fn estimated_atr_is_two_percent_of_entry() {
        assert_eq!(estimated_atr(1000.0), 20.0);
    }
}
