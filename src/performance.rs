use crate::models::*;
use statrs::statistics::Statistics;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate_stats(
        trades: Vec<TradeRecord>,
        equity_curve: Vec<EquityPoint>,
        initial_capital: f64,
        periods_per_year: f64,
        exposure_bars: usize,
    ) -> BacktestStats {
        let total_trades = trades.len();
        let final_equity = equity_curve
            .last()
            .map(|point| point.equity)
            .filter(|equity| equity.is_finite())
            .unwrap_or(initial_capital);

        let return_percent = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };

        let trade_percents: Vec<f64> = trades
            .iter()
            .map(|trade| trade.pnl_percent)
            .filter(|pct| pct.is_finite())
            .collect();
        let best_trade_percent = if trade_percents.is_empty() {
            0.0
        } else {
            trade_percents
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max)
        };
        let worst_trade_percent = if trade_percents.is_empty() {
            0.0
        } else {
            trade_percents.iter().copied().fold(f64::INFINITY, f64::min)
        };

        let winning_trades = trades.iter().filter(|trade| trade.pnl > 0.0).count();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let sharpe_ratio = Self::calculate_sharpe_ratio(&equity_curve, periods_per_year);
        let max_drawdown_percent = Self::calculate_max_drawdown_percent(&equity_curve);

        BacktestStats {
            initial_capital,
            total_trades,
            final_equity,
            return_percent,
            roi_percent: return_percent,
            best_trade_percent,
            worst_trade_percent,
            win_rate,
            sharpe_ratio,
            max_drawdown_percent,
            exposure_bars,
            trades,
            equity_curve,
        }
    }

    /// Annualised mean over sample std of per-bar equity returns; 0 when the
    /// curve is too short or flat.
    pub fn calculate_sharpe_ratio(equity_curve: &[EquityPoint], periods_per_year: f64) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                let prev_value = window[0].equity;
                let curr_value = window[1].equity;
                if prev_value > 0.0 {
                    (curr_value - prev_value) / prev_value
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        if !std_dev.is_finite() || std_dev <= f64::EPSILON || !mean_return.is_finite() {
            return 0.0;
        }

        mean_return / std_dev * periods_per_year.sqrt()
    }

    pub fn calculate_max_drawdown_percent(equity_curve: &[EquityPoint]) -> f64 {
        let Some(first) = equity_curve.first() else {
            return 0.0;
        };

        let mut max_drawdown_percent = 0.0;
        let mut peak_value = first.equity;

        for point in equity_curve {
            if point.equity > peak_value {
                peak_value = point.equity;
            } else if peak_value > 0.0 {
                let drawdown_percent = (peak_value - point.equity) / peak_value * 100.0;
                if drawdown_percent > max_drawdown_percent {
                    max_drawdown_percent = drawdown_percent;
                }
            }
        }

        max_drawdown_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                date: start + Duration::days(i as i64),
                equity,
                cash: equity,
            })
            .collect()
    }

    #[test]
    fn drawdown_tracks_peak_to_trough() {
        let points = curve(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        let drawdown = PerformanceCalculator::calculate_max_drawdown_percent(&points);
        assert!((drawdown - 25.0).abs() < 1e-9);
    }

    #[test]
    fn flat_curve_has_zero_sharpe() {
        let points = curve(&[100.0; 10]);
        assert_eq!(PerformanceCalculator::calculate_sharpe_ratio(&points, 252.0), 0.0);
    }

    #[test]
    fn best_and_worst_trades_convert_to_dollars() {
        let start = Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap();
        let trade = |pnl_percent: f64| TradeRecord {
            entry_date: start,
            entry_price: 100.0,
            exit_date: start + Duration::days(1),
            exit_price: 100.0 + pnl_percent,
            size: 10,
            pnl: pnl_percent * 10.0,
            pnl_percent,
            exit_reason: ExitReason::Signal,
        };
        let stats = PerformanceCalculator::calculate_stats(
            vec![trade(5.0), trade(-2.0)],
            curve(&[1_000.0, 1_050.0, 1_030.0]),
            1_000.0,
            252.0,
            2,
        );
        assert_eq!(stats.total_trades, 2);
        assert!((stats.return_percent - 3.0).abs() < 1e-9);
        assert_eq!(stats.roi_percent, stats.return_percent);
        assert!((stats.best_trade_dollars() - 50.0).abs() < 1e-9);
        assert!((stats.worst_trade_dollars() + 20.0).abs() < 1e-9);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        let report = stats.report();
        assert_eq!(report.number_of_trades, 2);
    }
}
