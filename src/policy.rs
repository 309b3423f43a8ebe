//! Entry/exit confirmation layered over the simulator's signal columns.
//!
//! The engine only asks a policy once a signal fired; the policy may veto it.
//! `OracleGated` consults an external price forecast and degrades to "no
//! decision" whenever the forecast is missing, late or broken.

use crate::error::OracleError;
use crate::indicators::calculate_atr_at;
use crate::models::Candle;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{debug, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const MIN_DELTA_THRESHOLD: f64 = 0.005;
pub const ATR_THRESHOLD_MULTIPLIER: f64 = 1.5;
pub const ATR_PERIOD: usize = 14;

/// What a policy may look at: every bar up to and including the current one.
pub struct BarContext<'a> {
    visible: &'a [Candle],
}

impl<'a> BarContext<'a> {
    /// `index` is the current bar; later bars are cut off.
    pub fn new(candles: &'a [Candle], index: usize) -> Self {
        let end = (index + 1).min(candles.len());
        Self {
            visible: &candles[..end],
        }
    }

    pub fn candles(&self) -> &'a [Candle] {
        self.visible
    }

    pub fn index(&self) -> usize {
        self.visible.len().saturating_sub(1)
    }

    pub fn current(&self) -> Option<&'a Candle> {
        self.visible.last()
    }
}

pub trait DecisionPolicy: Send + Sync {
    fn confirm_entry(&self, context: &BarContext<'_>) -> bool;
    fn confirm_exit(&self, context: &BarContext<'_>) -> bool;
}

/// Acts on every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateSignal;

impl DecisionPolicy for ImmediateSignal {
    fn confirm_entry(&self, _context: &BarContext<'_>) -> bool {
        true
    }

    fn confirm_exit(&self, _context: &BarContext<'_>) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub ticker: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: String,
}

pub trait ForecastOracle: Send + Sync {
    /// Predicted close of the bar after `request.end`; `Ok(None)` when the
    /// oracle has no forecast for this window.
    fn predict_next_close(&self, request: &ForecastRequest) -> Result<Option<f64>, OracleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatingMode {
    /// Forecast must lie on the signal's side of the current close.
    Direction,
    /// Relative forecast move must clear `max(0.005, 1.5 * ATR14 / close)`.
    AtrThreshold,
}

impl GatingMode {
    pub fn default_lookback_days(&self) -> i64 {
        match self {
            GatingMode::Direction => 332,
            GatingMode::AtrThreshold => 325,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direction" => Some(GatingMode::Direction),
            "atr" | "atr_threshold" | "delta" => Some(GatingMode::AtrThreshold),
            _ => None,
        }
    }
}

pub struct OracleGated {
    oracle: Arc<dyn ForecastOracle>,
    ticker: String,
    interval: String,
    mode: GatingMode,
    lookback_days: i64,
    timeout: Duration,
}

impl OracleGated {
    pub fn new(
        oracle: Arc<dyn ForecastOracle>,
        ticker: impl Into<String>,
        interval: impl Into<String>,
        mode: GatingMode,
        timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            ticker: ticker.into(),
            interval: interval.into(),
            mode,
            lookback_days: mode.default_lookback_days(),
            timeout,
        }
    }

    pub fn with_lookback_days(mut self, lookback_days: i64) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    pub fn request_for(&self, signal_time: DateTime<Utc>) -> ForecastRequest {
        ForecastRequest {
            ticker: self.ticker.clone(),
            start: signal_time - ChronoDuration::days(self.lookback_days),
            end: signal_time,
            interval: self.interval.clone(),
        }
    }

    fn forecast_with_timeout(&self, request: ForecastRequest) -> Result<Option<f64>, OracleError> {
        let (tx, rx) = bounded(1);
        let oracle = Arc::clone(&self.oracle);
        // A late answer is dropped together with the channel.
        thread::spawn(move || {
            let _ = tx.send(oracle.predict_next_close(&request));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(OracleError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(OracleError::Transport(
                "forecast worker exited without a result".to_string(),
            )),
        }
    }

    /// Signed relative move the forecast must exceed, 0 in direction mode.
    pub fn threshold(&self, context: &BarContext<'_>) -> f64 {
        match self.mode {
            GatingMode::Direction => 0.0,
            GatingMode::AtrThreshold => {
                let Some(current) = context.current() else {
                    return MIN_DELTA_THRESHOLD;
                };
                match calculate_atr_at(context.candles(), context.index(), ATR_PERIOD) {
                    Some(atr) if current.close > 0.0 => {
                        MIN_DELTA_THRESHOLD.max(ATR_THRESHOLD_MULTIPLIER * atr / current.close)
                    }
                    _ => MIN_DELTA_THRESHOLD,
                }
            }
        }
    }

    /// Relative forecast move for the current bar, or `None` when there is no
    /// usable forecast.
    fn forecast_delta(&self, context: &BarContext<'_>) -> Option<f64> {
        let current = context.current()?;
        let request = self.request_for(current.date);
        match self.forecast_with_timeout(request) {
            Ok(Some(predicted)) if predicted.is_finite() => {
                Some((predicted - current.close) / current.close)
            }
            Ok(Some(predicted)) => {
                warn!(
                    "Ignoring non-finite forecast {} for {} at {}",
                    predicted, self.ticker, current.date
                );
                None
            }
            Ok(None) => {
                debug!("No forecast for {} at {}", self.ticker, current.date);
                None
            }
            Err(err) => {
                warn!(
                    "Forecast for {} at {} failed: {}",
                    self.ticker, current.date, err
                );
                None
            }
        }
    }
}

impl DecisionPolicy for OracleGated {
    fn confirm_entry(&self, context: &BarContext<'_>) -> bool {
        let Some(delta) = self.forecast_delta(context) else {
            return false;
        };
        delta > self.threshold(context)
    }

    fn confirm_exit(&self, context: &BarContext<'_>) -> bool {
        let Some(delta) = self.forecast_delta(context) else {
            return false;
        };
        delta < -self.threshold(context)
    }
}
