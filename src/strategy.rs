use crate::error::EngineError;
use crate::models::*;
use crate::param_utils::{get_param, positive_f64_or, positive_usize_or, ParameterPolicy};
use std::collections::HashMap;

pub const DEFAULT_MACD_FAST: usize = 12;
pub const DEFAULT_MACD_SLOW: usize = 26;
pub const DEFAULT_MACD_SIGNAL: usize = 9;
pub const DEFAULT_BOLLINGER_LENGTH: usize = 20;
pub const DEFAULT_BOLLINGER_STD: f64 = 2.0;
pub const DEFAULT_CCI_LENGTH: usize = 20;
pub const DEFAULT_CCI_CONSTANT: f64 = 0.015;
pub const DEFAULT_ADX_LENGTH: usize = 14;
pub const DEFAULT_ADX_THRESHOLD: f64 = 20.0;

/// An indicator strategy annotates a frame with its indicator columns and a
/// `BuySignal`/`SellSignal` pair. The input frame is never modified.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn config(&self) -> StrategyConfig;
    /// Bars before the first value that can carry a signal.
    fn warmup_bars(&self) -> usize;
    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError>;
}

#[path = "strategies/macd.rs"]
pub mod macd;

pub use macd::MACDStrategy;

#[path = "strategies/bollinger.rs"]
pub mod bollinger;

pub use bollinger::BollingerStrategy;

#[path = "strategies/cci.rs"]
pub mod cci;

pub use cci::CCIStrategy;

#[path = "strategies/adx.rs"]
pub mod adx;

pub use adx::ADXStrategy;

#[path = "strategies/obv.rs"]
pub mod obv;

pub use obv::OBVStrategy;

pub fn create_strategy(config: &StrategyConfig) -> Box<dyn Strategy + Send + Sync> {
    match config.sanitized() {
        StrategyConfig::Macd { fast, slow, signal } => {
            Box::new(MACDStrategy::new(fast, slow, signal))
        }
        StrategyConfig::Bollinger { length, std_mult } => {
            Box::new(BollingerStrategy::new(length, std_mult))
        }
        StrategyConfig::Cci { length, constant } => Box::new(CCIStrategy::new(length, constant)),
        StrategyConfig::Adx { length, threshold } => Box::new(ADXStrategy::new(length, threshold)),
        StrategyConfig::Obv => Box::new(OBVStrategy),
    }
}

/// Write the generic signal pair onto a frame that already holds the
/// strategy's indicator columns.
pub(crate) fn set_signal_pair(
    frame: &mut Frame,
    buy: Vec<bool>,
    sell: Vec<bool>,
) -> Result<(), EngineError> {
    frame.set_signal(BUY_SIGNAL, buy)?;
    frame.set_signal(SELL_SIGNAL, sell)
}

/// Crossings of `line` over `reference`. NaN on either bar compares false.
pub(crate) fn crossover_signals(line: &[f64], reference: &[f64]) -> (Vec<bool>, Vec<bool>) {
    let mut up = vec![false; line.len()];
    let mut down = vec![false; line.len()];
    for i in 1..line.len() {
        up[i] = line[i] > reference[i] && line[i - 1] <= reference[i - 1];
        down[i] = line[i] < reference[i] && line[i - 1] >= reference[i - 1];
    }
    (up, down)
}

impl StrategyConfig {
    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Macd => StrategyConfig::Macd {
                fast: DEFAULT_MACD_FAST,
                slow: DEFAULT_MACD_SLOW,
                signal: DEFAULT_MACD_SIGNAL,
            },
            StrategyKind::Bollinger => StrategyConfig::Bollinger {
                length: DEFAULT_BOLLINGER_LENGTH,
                std_mult: DEFAULT_BOLLINGER_STD,
            },
            StrategyKind::Cci => StrategyConfig::Cci {
                length: DEFAULT_CCI_LENGTH,
                constant: DEFAULT_CCI_CONSTANT,
            },
            StrategyKind::Adx => StrategyConfig::Adx {
                length: DEFAULT_ADX_LENGTH,
                threshold: DEFAULT_ADX_THRESHOLD,
            },
            StrategyKind::Obv => StrategyConfig::Obv,
        }
    }

    /// Build a config from loosely typed parameters.
    ///
    /// Keys: `fast`, `slow`, `signal` (MACD), `length`, `std` (Bollinger),
    /// `length`, `constant` (CCI), `length`, `threshold` (ADX). Missing keys
    /// take the family default; invalid values follow `policy`.
    pub fn from_parameters(
        kind: StrategyKind,
        params: &HashMap<String, f64>,
        policy: ParameterPolicy,
    ) -> Result<Self, EngineError> {
        let config = match kind {
            StrategyKind::Macd => StrategyConfig::Macd {
                fast: positive_usize_or(
                    get_param(params, "fast", DEFAULT_MACD_FAST as f64),
                    "fast",
                    DEFAULT_MACD_FAST,
                    policy,
                )?,
                slow: positive_usize_or(
                    get_param(params, "slow", DEFAULT_MACD_SLOW as f64),
                    "slow",
                    DEFAULT_MACD_SLOW,
                    policy,
                )?,
                signal: positive_usize_or(
                    get_param(params, "signal", DEFAULT_MACD_SIGNAL as f64),
                    "signal",
                    DEFAULT_MACD_SIGNAL,
                    policy,
                )?,
            },
            StrategyKind::Bollinger => StrategyConfig::Bollinger {
                length: positive_usize_or(
                    get_param(params, "length", DEFAULT_BOLLINGER_LENGTH as f64),
                    "length",
                    DEFAULT_BOLLINGER_LENGTH,
                    policy,
                )?,
                std_mult: positive_f64_or(
                    get_param(params, "std", DEFAULT_BOLLINGER_STD),
                    "std",
                    DEFAULT_BOLLINGER_STD,
                    policy,
                )?,
            },
            StrategyKind::Cci => StrategyConfig::Cci {
                length: positive_usize_or(
                    get_param(params, "length", DEFAULT_CCI_LENGTH as f64),
                    "length",
                    DEFAULT_CCI_LENGTH,
                    policy,
                )?,
                constant: positive_f64_or(
                    get_param(params, "constant", DEFAULT_CCI_CONSTANT),
                    "constant",
                    DEFAULT_CCI_CONSTANT,
                    policy,
                )?,
            },
            StrategyKind::Adx => StrategyConfig::Adx {
                length: positive_usize_or(
                    get_param(params, "length", DEFAULT_ADX_LENGTH as f64),
                    "length",
                    DEFAULT_ADX_LENGTH,
                    policy,
                )?,
                threshold: positive_f64_or(
                    get_param(params, "threshold", DEFAULT_ADX_THRESHOLD),
                    "threshold",
                    DEFAULT_ADX_THRESHOLD,
                    policy,
                )?,
            },
            StrategyKind::Obv => StrategyConfig::Obv,
        };
        Ok(config)
    }

    /// Check every parameter without coercion.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.coerce(ParameterPolicy::Strict).map(|_| ())
    }

    /// Replace invalid parameters by family defaults, logging each one.
    pub fn sanitized(&self) -> Self {
        // Lenient coercion cannot fail.
        self.coerce(ParameterPolicy::Lenient)
            .unwrap_or_else(|_| StrategyConfig::default_for(self.kind()))
    }

    fn coerce(&self, policy: ParameterPolicy) -> Result<Self, EngineError> {
        let config = match *self {
            StrategyConfig::Macd { fast, slow, signal } => StrategyConfig::Macd {
                fast: positive_usize_or(fast as f64, "fast", DEFAULT_MACD_FAST, policy)?,
                slow: positive_usize_or(slow as f64, "slow", DEFAULT_MACD_SLOW, policy)?,
                signal: positive_usize_or(signal as f64, "signal", DEFAULT_MACD_SIGNAL, policy)?,
            },
            StrategyConfig::Bollinger { length, std_mult } => StrategyConfig::Bollinger {
                length: positive_usize_or(
                    length as f64,
                    "length",
                    DEFAULT_BOLLINGER_LENGTH,
                    policy,
                )?,
                std_mult: positive_f64_or(std_mult, "std", DEFAULT_BOLLINGER_STD, policy)?,
            },
            StrategyConfig::Cci { length, constant } => StrategyConfig::Cci {
                length: positive_usize_or(length as f64, "length", DEFAULT_CCI_LENGTH, policy)?,
                constant: positive_f64_or(constant, "constant", DEFAULT_CCI_CONSTANT, policy)?,
            },
            StrategyConfig::Adx { length, threshold } => StrategyConfig::Adx {
                length: positive_usize_or(length as f64, "length", DEFAULT_ADX_LENGTH, policy)?,
                threshold: positive_f64_or(
                    threshold,
                    "threshold",
                    DEFAULT_ADX_THRESHOLD,
                    policy,
                )?,
            },
            StrategyConfig::Obv => StrategyConfig::Obv,
        };
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::*;
    use chrono::{Duration, TimeZone, Utc};

    pub fn frame_from_closes(closes: &[f64]) -> Frame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: start + Duration::days(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: Some(1_000.0 + i as f64),
                source: BarSource::Historical,
            })
            .collect();
        Frame::new(PriceSeries::new(candles).unwrap())
    }

    /// Bars with high = low = close, so every derived price is exact.
    pub fn flat_frame(len: usize, price: f64) -> Frame {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = (0..len)
            .map(|i| Candle {
                date: start + Duration::days(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Some(1_000.0),
                source: BarSource::Historical,
            })
            .collect();
        Frame::new(PriceSeries::new(candles).unwrap())
    }

    pub fn wave(len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| 100.0 + 10.0 * (i as f64 / 5.0).sin() + i as f64 * 0.1)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn all_configs() -> Vec<StrategyConfig> {
        StrategyKind::ALL
            .iter()
            .map(|kind| StrategyConfig::default_for(*kind))
            .collect()
    }

    #[test]
    fn warmup_bars_never_signal() {
        for config in all_configs() {
            let strategy = create_strategy(&config);
            let len = strategy.warmup_bars().max(1);
            let frame = frame_from_closes(&wave(len));
            let applied = strategy.apply(&frame).unwrap();
            let buy = applied.signal(BUY_SIGNAL).unwrap();
            let sell = applied.signal(SELL_SIGNAL).unwrap();
            assert!(buy.iter().all(|b| !b), "{} bought during warmup", config);
            assert!(sell.iter().all(|s| !s), "{} sold during warmup", config);
        }
    }

    #[test]
    fn apply_is_idempotent_and_leaves_input_untouched() {
        let frame = frame_from_closes(&wave(120));
        for config in all_configs() {
            let strategy = create_strategy(&config);
            let once = strategy.apply(&frame).unwrap();
            let twice = strategy.apply(&once).unwrap();
            assert_eq!(once.signal(BUY_SIGNAL), twice.signal(BUY_SIGNAL));
            assert_eq!(once.signal(SELL_SIGNAL), twice.signal(SELL_SIGNAL));
            assert!(!frame.has_signal(BUY_SIGNAL));
            assert_eq!(frame.indicator_names().count(), 0);
        }
    }

    #[test]
    fn lenient_parameters_fall_back_to_defaults() {
        let mut params = HashMap::new();
        params.insert("length".to_string(), 0.0);
        params.insert("threshold".to_string(), -5.0);
        let config =
            StrategyConfig::from_parameters(StrategyKind::Adx, &params, ParameterPolicy::Lenient)
                .unwrap();
        assert_eq!(
            config,
            StrategyConfig::Adx {
                length: DEFAULT_ADX_LENGTH,
                threshold: DEFAULT_ADX_THRESHOLD
            }
        );
        assert!(
            StrategyConfig::from_parameters(StrategyKind::Adx, &params, ParameterPolicy::Strict)
                .is_err()
        );
    }

    #[test]
    fn validate_reports_zero_lengths() {
        let config = StrategyConfig::Cci {
            length: 0,
            constant: 0.015,
        };
        assert_eq!(
            config.validate(),
            Err(EngineError::InvalidParameter {
                name: "length",
                value: 0.0
            })
        );
        assert_eq!(
            config.sanitized(),
            StrategyConfig::Cci {
                length: DEFAULT_CCI_LENGTH,
                constant: 0.015
            }
        );
    }

    #[test]
    fn crossover_ignores_nan_bars() {
        let line = [f64::NAN, 1.0, 2.0, 0.5];
        let reference = [0.0, 1.5, 1.0, 1.0];
        let (up, down) = crossover_signals(&line, &reference);
        assert_eq!(up, vec![false, false, true, false]);
        assert_eq!(down, vec![false, false, false, true]);
    }
}
