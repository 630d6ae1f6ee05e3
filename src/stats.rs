// ===============================
// src/stats.rs
// ===============================
//
// Performance metrics over the closed-trade sequence. Pure read: recomputed
// on demand, no state of its own, safe to call from the process loop at any
// time. Sharpe annualization assumes 1-minute samples (sqrt of minutes/year).
//
use serde::Serialize;

use crate::domain::TradeRecord;

pub const SAMPLES_PER_YEAR: f64 = 525_600.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_trades: usize,
    pub win_rate_pct: f64,
    pub avg_pnl_pct: f64,
    pub avg_winner_pct: f64,
    pub avg_loser_pct: f64,
    /// |avg_winner / avg_loser|; None until there is at least one of each.
    pub profit_factor: Option<f64>,
    /// mean(returns)/stdev(returns)*sqrt(SAMPLES_PER_YEAR); 0 with fewer than
    /// two trades or zero dispersion. Sample (n-1) standard deviation.
    pub sharpe_ratio: f64,
    pub total_pnl_usd: f64,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

pub fn summarize<'a, I>(trades: I) -> MetricsSnapshot
where
    I: IntoIterator<Item = &'a TradeRecord>,
{
    let mut pnl_pcts = Vec::new();
    let mut total_pnl_usd = 0.0;
    for t in trades {
        pnl_pcts.push(t.pnl_pct);
        total_pnl_usd += t.pnl_usd;
    }

    let total = pnl_pcts.len();
    if total == 0 {
        return MetricsSnapshot {
            total_trades: 0,
            win_rate_pct: 0.0,
            avg_pnl_pct: 0.0,
            avg_winner_pct: 0.0,
            avg_loser_pct: 0.0,
            profit_factor: None,
            sharpe_ratio: 0.0,
            total_pnl_usd: 0.0,
        };
    }

    let winners: Vec<f64> = pnl_pcts.iter().copied().filter(|&p| p > 0.0).collect();
    let losers: Vec<f64> = pnl_pcts.iter().copied().filter(|&p| p <= 0.0).collect();

    let avg_winner_pct = mean(&winners);
    let avg_loser_pct = mean(&losers);
    let profit_factor = if !winners.is_empty() && !losers.is_empty() && avg_loser_pct != 0.0 {
        Some((avg_winner_pct / avg_loser_pct).abs())
    } else {
        None
    };

    let returns: Vec<f64> = pnl_pcts.iter().map(|p| p / 100.0).collect();
    let r_mean = mean(&returns);
    let sharpe_ratio = if total >= 2 {
        let var = returns.iter().map(|r| (r - r_mean).powi(2)).sum::<f64>() / (total - 1) as f64;
        let std = var.sqrt();
        if std > 0.0 {
            r_mean / std * SAMPLES_PER_YEAR.sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    MetricsSnapshot {
        total_trades: total,
        win_rate_pct: winners.len() as f64 / total as f64 * 100.0,
        avg_pnl_pct: mean(&pnl_pcts),
        avg_winner_pct,
        avg_loser_pct,
        profit_factor,
        sharpe_ratio,
        total_pnl_usd,
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "total trades:  {}", self.total_trades)?;
        writeln!(f, "win rate:      {:.1}%", self.win_rate_pct)?;
        writeln!(f, "avg p&l/trade: {:.2}%", self.avg_pnl_pct)?;
        writeln!(f, "avg winner:    {:.2}%", self.avg_winner_pct)?;
        writeln!(f, "avg loser:     {:.2}%", self.avg_loser_pct)?;
        match self.profit_factor {
            Some(pf) => writeln!(f, "profit factor: {pf:.2}")?,
            None => writeln!(f, "profit factor: n/a")?,
        }
        writeln!(f, "sharpe ratio:  {:.2}", self.sharpe_ratio)?;
        write!(f, "total p&l:     ${:.2}", self.total_pnl_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(pnl_pct: f64, pnl_usd: f64) -> TradeRecord {
        TradeRecord {
            timestamp: 0.0,
            strategy_name: "test".to_string(),
            symbol: "BTCUSDT".to_string(),
            order_type: "CLOSE_LONG".to_string(),
            entry_price: 100.0,
            amount: 1.0,
            exit_price: 100.0 * (1.0 + pnl_pct / 100.0),
            exit_time: 0.0,
            pnl_pct,
            pnl_usd,
            order_id: None,
            fee: None,
            exchange: None,
            status: None,
        }
    }

    #[test]
    fn aggregate_fixture() {
        let trades = vec![trade(5.0, 5.0), trade(-2.0, -2.0), trade(3.0, 3.0)];
        let snap = summarize(&trades);
        assert_eq!(snap.total_trades, 3);
        assert!((snap.win_rate_pct - 200.0 / 3.0).abs() < 1e-9);
        assert!((snap.avg_pnl_pct - 2.0).abs() < 1e-9);
        assert!((snap.avg_winner_pct - 4.0).abs() < 1e-9);
        assert!((snap.avg_loser_pct + 2.0).abs() < 1e-9);
        assert!((snap.profit_factor.unwrap() - 2.0).abs() < 1e-9);
        assert!((snap.total_pnl_usd - 6.0).abs() < 1e-9);
    }

    #[test]
    fn summarize_is_idempotent() {
        let trades = vec![trade(5.0, 5.0), trade(-2.0, -2.0), trade(3.0, 3.0)];
        assert_eq!(summarize(&trades), summarize(&trades));
    }

    #[test]
    fn empty_sequence_yields_zeroes() {
        let snap = summarize(std::iter::empty());
        assert_eq!(snap.total_trades, 0);
        assert_eq!(snap.win_rate_pct, 0.0);
        assert_eq!(snap.profit_factor, None);
        assert_eq!(snap.sharpe_ratio, 0.0);
    }

    #[test]
    fn profit_factor_undefined_without_both_sides() {
        let all_winners = vec![trade(1.0, 1.0), trade(2.0, 2.0)];
        assert_eq!(summarize(&all_winners).profit_factor, None);
        let all_losers = vec![trade(-1.0, -1.0)];
        assert_eq!(summarize(&all_losers).profit_factor, None);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        // returns 0.01 and 0.03: mean 0.02, sample std sqrt(0.0002)
        let trades = vec![trade(1.0, 1.0), trade(3.0, 3.0)];
        let expected = 0.02 / 0.0002_f64.sqrt() * SAMPLES_PER_YEAR.sqrt();
        assert!((summarize(&trades).sharpe_ratio - expected).abs() < 1e-9);
    }

    #[test]
    fn sharpe_zero_on_flat_returns() {
        let trades = vec![trade(2.0, 2.0), trade(2.0, 2.0)];
        assert_eq!(summarize(&trades).sharpe_ratio, 0.0);
        // single trade: undefined, reported as 0
        assert_eq!(summarize(&trades[..1]).sharpe_ratio, 0.0);
    }

    #[test]
    fn display_renders_the_report() {
        let out = summarize(&vec![trade(5.0, 5.0), trade(-2.0, -2.0), trade(3.0, 3.0)]).to_string();
        assert!(out.contains("total trades:  3"));
        assert!(out.contains("win rate:      66.7%"));
        assert!(out.contains("profit factor: 2.00"));
    }
}
