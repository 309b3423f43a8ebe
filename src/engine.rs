use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::*;
use crate::performance::PerformanceCalculator;
use crate::policy::{BarContext, DecisionPolicy};
use chrono::{DateTime, Utc};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Position {
    Flat,
    Long {
        size: u64,
        entry_price: f64,
        entry_date: DateTime<Utc>,
    },
}

struct AccountState {
    cash: f64,
    position: Position,
    trades: Vec<TradeRecord>,
}

impl AccountState {
    fn equity(&self, close: f64) -> f64 {
        match self.position {
            Position::Flat => self.cash,
            Position::Long { size, .. } => self.cash + size as f64 * close,
        }
    }

    fn open_long(&mut self, candle: &Candle, commission_rate: f64) -> bool {
        let close = candle.close;
        let fill_price = close * (1.0 + commission_rate);
        let mut size = (self.equity(close) / close).floor();
        if size * fill_price > self.cash {
            size = (self.cash / fill_price).floor();
        }
        if !size.is_finite() || size < 1.0 {
            return false;
        }

        let size = size as u64;
        self.cash -= size as f64 * fill_price;
        self.position = Position::Long {
            size,
            entry_price: fill_price,
            entry_date: candle.date,
        };
        true
    }

    fn close_long(&mut self, candle: &Candle, commission_rate: f64, exit_reason: ExitReason) {
        let Position::Long {
            size,
            entry_price,
            entry_date,
        } = self.position
        else {
            return;
        };

        let exit_price = candle.close * (1.0 - commission_rate);
        self.cash += size as f64 * exit_price;
        self.trades.push(TradeRecord {
            entry_date,
            entry_price,
            exit_date: candle.date,
            exit_price,
            size,
            pnl: (exit_price - entry_price) * size as f64,
            pnl_percent: (exit_price / entry_price - 1.0) * 100.0,
            exit_reason,
        });
        self.position = Position::Flat;
    }
}

/// Single-position, long-only bar replay.
pub struct Engine {
    pub config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Replay the frame's signal columns through `policy`.
    ///
    /// Uses `CommonBuySignal`/`CommonSellSignal` when the frame carries them,
    /// otherwise `BuySignal`/`SellSignal`. A missing pair is an input error;
    /// everything that goes wrong numerically is a `Degenerate` outcome.
    pub fn run(
        &self,
        frame: &Frame,
        policy: &dyn DecisionPolicy,
    ) -> Result<BacktestOutcome, EngineError> {
        let (buy, sell) = Self::signal_columns(frame)?;
        let initial_capital = self.config.initial_capital;

        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Ok(Self::degenerate(
                initial_capital,
                format!("initial capital {} is not positive", initial_capital),
            ));
        }
        if frame.len() < 2 {
            return Ok(Self::degenerate(
                initial_capital,
                format!("{} bars are too few to trade", frame.len()),
            ));
        }

        let commission_rate = self.config.commission_rate;
        let candles = frame.candles();
        let mut account = AccountState {
            cash: initial_capital,
            position: Position::Flat,
            trades: Vec::new(),
        };
        let mut equity_curve = Vec::with_capacity(candles.len());
        let mut exposure_bars = 0usize;

        equity_curve.push(EquityPoint {
            date: candles[0].date,
            equity: initial_capital,
            cash: initial_capital,
        });

        for i in 1..candles.len() {
            let candle = &candles[i];

            match account.position {
                Position::Long { .. } if sell[i] => {
                    if policy.confirm_exit(&BarContext::new(candles, i)) {
                        account.close_long(candle, commission_rate, ExitReason::Signal);
                    }
                }
                Position::Flat if buy[i] => {
                    if policy.confirm_entry(&BarContext::new(candles, i))
                        && !account.open_long(candle, commission_rate)
                    {
                        debug!(
                            "Buy signal at {} skipped: equity {} buys no share at {}",
                            candle.date,
                            account.cash,
                            candle.close
                        );
                    }
                }
                _ => {}
            }

            if matches!(account.position, Position::Long { .. }) {
                exposure_bars += 1;
            }

            let equity = account.equity(candle.close);
            if !equity.is_finite() || !account.cash.is_finite() {
                return Ok(Self::degenerate(
                    initial_capital,
                    format!("equity became non-finite at {}", candle.date),
                ));
            }
            equity_curve.push(EquityPoint {
                date: candle.date,
                equity,
                cash: account.cash,
            });
        }

        if self.config.close_open_position_at_end {
            if let Some(last) = candles.last() {
                if matches!(account.position, Position::Long { .. }) {
                    account.close_long(last, commission_rate, ExitReason::EndOfData);
                    if let Some(point) = equity_curve.last_mut() {
                        point.equity = account.cash;
                        point.cash = account.cash;
                    }
                }
            }
        }

        let stats = PerformanceCalculator::calculate_stats(
            account.trades,
            equity_curve,
            initial_capital,
            self.config.periods_per_year,
            exposure_bars,
        );

        if !stats.final_equity.is_finite() || !stats.return_percent.is_finite() {
            return Ok(Self::degenerate(
                initial_capital,
                "statistics are not finite".to_string(),
            ));
        }

        Ok(BacktestOutcome::Completed(stats))
    }

    fn signal_columns(frame: &Frame) -> Result<(&[bool], &[bool]), EngineError> {
        if let (Some(buy), Some(sell)) = (
            frame.signal(COMMON_BUY_SIGNAL),
            frame.signal(COMMON_SELL_SIGNAL),
        ) {
            return Ok((buy, sell));
        }

        let buy = frame
            .signal(BUY_SIGNAL)
            .ok_or_else(|| EngineError::MissingColumn(BUY_SIGNAL.to_string()))?;
        let sell = frame
            .signal(SELL_SIGNAL)
            .ok_or_else(|| EngineError::MissingColumn(SELL_SIGNAL.to_string()))?;
        Ok((buy, sell))
    }

    fn degenerate(initial_capital: f64, reason: String) -> BacktestOutcome {
        debug!("Degenerate backtest: {}", reason);
        let neutral_capital = if initial_capital.is_finite() {
            initial_capital
        } else {
            0.0
        };
        BacktestOutcome::Degenerate {
            stats: BacktestStats::zero_activity(neutral_capital),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ImmediateSignal;
    use crate::strategy::test_support::frame_from_closes;
    use std::sync::Mutex;

    fn engine(commission_rate: f64) -> Engine {
        Engine::new(EngineConfig {
            initial_capital: 10_000.0,
            commission_rate,
            close_open_position_at_end: true,
            periods_per_year: 252.0,
        })
    }

    fn frame_with_signals(closes: &[f64], buy: &[bool], sell: &[bool]) -> Frame {
        let mut frame = frame_from_closes(closes);
        frame.set_signal(BUY_SIGNAL, buy.to_vec()).unwrap();
        frame.set_signal(SELL_SIGNAL, sell.to_vec()).unwrap();
        frame
    }

    struct Veto;

    impl DecisionPolicy for Veto {
        fn confirm_entry(&self, _context: &BarContext<'_>) -> bool {
            false
        }

        fn confirm_exit(&self, _context: &BarContext<'_>) -> bool {
            false
        }
    }

    struct RecordingPolicy {
        seen: Mutex<Vec<(usize, usize)>>,
    }

    impl DecisionPolicy for RecordingPolicy {
        fn confirm_entry(&self, context: &BarContext<'_>) -> bool {
            self.seen
                .lock()
                .unwrap()
                .push((context.index(), context.candles().len()));
            true
        }

        fn confirm_exit(&self, context: &BarContext<'_>) -> bool {
            self.confirm_entry(context)
        }
    }

    #[test]
    fn no_signals_means_no_trades() {
        let frame = frame_with_signals(&[100.0, 101.0, 99.0, 102.0], &[false; 4], &[false; 4]);
        let outcome = engine(0.002).run(&frame, &ImmediateSignal).unwrap();
        let stats = outcome.stats();
        assert!(!outcome.is_degenerate());
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.final_equity, 10_000.0);
        assert_eq!(stats.return_percent, 0.0);
    }

    #[test]
    fn single_round_trip_without_commission_gains_ten_percent() {
        let frame = frame_with_signals(
            &[100.0, 100.0, 110.0],
            &[false, true, false],
            &[false, false, true],
        );
        let stats = engine(0.0)
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.trades[0].size, 100);
        assert_eq!(stats.trades[0].exit_reason, ExitReason::Signal);
        assert!((stats.return_percent - 10.0).abs() < 1e-9);
        assert!((stats.final_equity - 11_000.0).abs() < 1e-9);
        assert!((stats.best_trade_percent - 10.0).abs() < 1e-9);
        assert_eq!(stats.exposure_bars, 1);
    }

    #[test]
    fn commission_shrinks_size_and_drags_return() {
        let frame = frame_with_signals(
            &[100.0, 100.0, 110.0],
            &[false, true, false],
            &[false, false, true],
        );
        let stats = engine(0.002)
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.trades[0].size, 99);
        assert!(stats.return_percent < 10.0);
        assert!(stats.return_percent > 9.0);
    }

    #[test]
    fn open_position_is_closed_at_end_of_data() {
        let frame = frame_with_signals(
            &[50.0, 50.0, 55.0, 60.0],
            &[false, true, false, false],
            &[false; 4],
        );
        let stats = engine(0.0)
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.trades[0].exit_reason, ExitReason::EndOfData);
        assert!((stats.return_percent - 20.0).abs() < 1e-9);

        let mut keep_open = engine(0.0);
        keep_open.config.close_open_position_at_end = false;
        let stats = keep_open
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.total_trades, 0);
        assert!((stats.final_equity - 12_000.0).abs() < 1e-9);
    }

    #[test]
    fn bar_zero_signals_are_ignored() {
        let frame = frame_with_signals(&[100.0, 100.0], &[true, false], &[false, false]);
        let stats = engine(0.0)
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.total_trades, 0);
    }

    #[test]
    fn short_series_and_bad_capital_are_degenerate() {
        let frame = frame_with_signals(&[100.0], &[true], &[false]);
        let outcome = engine(0.0).run(&frame, &ImmediateSignal).unwrap();
        assert!(outcome.is_degenerate());
        assert_eq!(outcome.stats().total_trades, 0);
        assert_eq!(outcome.stats().final_equity, 10_000.0);

        let frame = frame_with_signals(&[100.0, 101.0], &[false, true], &[false, false]);
        let mut broke = engine(0.0);
        broke.config.initial_capital = 0.0;
        let outcome = broke.run(&frame, &ImmediateSignal).unwrap();
        assert!(outcome.is_degenerate());
        assert_eq!(outcome.return_percent(), 0.0);
    }

    #[test]
    fn missing_signal_columns_are_input_errors() {
        let frame = frame_from_closes(&[100.0, 101.0]);
        assert_eq!(
            engine(0.0).run(&frame, &ImmediateSignal).err(),
            Some(EngineError::MissingColumn(BUY_SIGNAL.to_string()))
        );
    }

    #[test]
    fn combined_columns_take_precedence() {
        let mut frame = frame_with_signals(
            &[100.0, 100.0, 110.0],
            &[false, true, false],
            &[false, false, true],
        );
        frame
            .set_signal(COMMON_BUY_SIGNAL, vec![false, false, false])
            .unwrap();
        frame
            .set_signal(COMMON_SELL_SIGNAL, vec![false, false, false])
            .unwrap();
        let stats = engine(0.0)
            .run(&frame, &ImmediateSignal)
            .unwrap()
            .into_stats();
        assert_eq!(stats.total_trades, 0);
    }

    #[test]
    fn vetoing_policy_blocks_every_trade() {
        let frame = frame_with_signals(
            &[100.0, 100.0, 110.0],
            &[false, true, false],
            &[false, false, true],
        );
        let stats = engine(0.0).run(&frame, &Veto).unwrap().into_stats();
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.final_equity, 10_000.0);
    }

    #[test]
    fn policy_only_sees_bars_up_to_the_signal() {
        let frame = frame_with_signals(
            &[10.0, 11.0, 12.0, 13.0, 14.0],
            &[false, true, false, false, false],
            &[false, false, false, true, false],
        );
        let policy = RecordingPolicy {
            seen: Mutex::new(Vec::new()),
        };
        engine(0.0).run(&frame, &policy).unwrap();
        assert_eq!(*policy.seen.lock().unwrap(), vec![(1, 2), (3, 4)]);
    }
}
