use crate::error::EngineError;
use crate::search_space::SearchBounds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const BUY_SIGNAL: &str = "BuySignal";
pub const SELL_SIGNAL: &str = "SellSignal";
pub const COMMON_BUY_SIGNAL: &str = "CommonBuySignal";
pub const COMMON_SELL_SIGNAL: &str = "CommonSellSignal";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarSource {
    #[default]
    Historical,
    Forecast,
}

impl BarSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarSource::Historical => "Historical",
            BarSource::Forecast => "Forecast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub source: BarSource,
}

/// Ordered OHLCV bars with strictly increasing timestamps and usable closes.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    candles: Vec<Candle>,
}

impl PriceSeries {
    pub fn new(candles: Vec<Candle>) -> Result<Self, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::EmptySeries);
        }

        for (index, candle) in candles.iter().enumerate() {
            if !candle.close.is_finite() || candle.close <= 0.0 {
                return Err(EngineError::InvalidPrice {
                    index,
                    field: "close",
                    value: candle.close,
                });
            }
            if let Some(volume) = candle.volume {
                if !volume.is_finite() || volume < 0.0 {
                    return Err(EngineError::InvalidPrice {
                        index,
                        field: "volume",
                        value: volume,
                    });
                }
            }
            if index > 0 && candles[index - 1].date >= candle.date {
                return Err(EngineError::NonMonotonicTimestamps {
                    index,
                    date: candle.date.to_rfc3339(),
                });
            }
        }

        Ok(Self { candles })
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }
}

/// A price series annotated with indicator and signal columns.
///
/// Candles are shared between copies; columns are owned per copy, so a
/// strategy working on a clone never touches the caller's columns.
#[derive(Debug, Clone)]
pub struct Frame {
    candles: Arc<[Candle]>,
    indicators: BTreeMap<String, Vec<f64>>,
    signals: BTreeMap<String, Vec<bool>>,
}

impl Frame {
    pub fn new(series: PriceSeries) -> Self {
        Self {
            candles: series.into_candles().into(),
            indicators: BTreeMap::new(),
            signals: BTreeMap::new(),
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    /// Volumes for every bar, or `None` when any bar lacks one.
    pub fn volumes(&self) -> Option<Vec<f64>> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn indicator(&self, name: &str) -> Option<&[f64]> {
        self.indicators.get(name).map(Vec::as_slice)
    }

    pub fn signal(&self, name: &str) -> Option<&[bool]> {
        self.signals.get(name).map(Vec::as_slice)
    }

    pub fn has_signal(&self, name: &str) -> bool {
        self.signals.contains_key(name)
    }

    pub fn indicator_names(&self) -> impl Iterator<Item = &str> {
        self.indicators.keys().map(String::as_str)
    }

    pub fn signal_names(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }

    pub fn set_indicator<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<f64>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        self.check_length(&name, values.len())?;
        self.indicators.insert(name, values);
        Ok(())
    }

    pub fn set_signal<S: Into<String>>(
        &mut self,
        name: S,
        values: Vec<bool>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        self.check_length(&name, values.len())?;
        self.signals.insert(name, values);
        Ok(())
    }

    pub fn remove_signal(&mut self, name: &str) -> Option<Vec<bool>> {
        self.signals.remove(name)
    }

    /// Copy without the combined signal pair, so a replay falls back to the
    /// generic `BuySignal`/`SellSignal` columns.
    pub fn without_common_signals(&self) -> Frame {
        let mut frame = self.clone();
        frame.remove_signal(COMMON_BUY_SIGNAL);
        frame.remove_signal(COMMON_SELL_SIGNAL);
        frame
    }

    fn check_length(&self, name: &str, actual: usize) -> Result<(), EngineError> {
        if actual != self.len() {
            return Err(EngineError::LengthMismatch {
                name: name.to_string(),
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }
}

impl From<PriceSeries> for Frame {
    fn from(series: PriceSeries) -> Self {
        Frame::new(series)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    Macd,
    Bollinger,
    Cci,
    Adx,
    Obv,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Macd,
        StrategyKind::Bollinger,
        StrategyKind::Cci,
        StrategyKind::Adx,
        StrategyKind::Obv,
    ];

    /// Tag used as the suffix of per-strategy signal columns.
    pub fn tag(&self) -> &'static str {
        match self {
            StrategyKind::Macd => "MACD",
            StrategyKind::Bollinger => "BollingerBands",
            StrategyKind::Cci => "CCI",
            StrategyKind::Adx => "ADX",
            StrategyKind::Obv => "OBV",
        }
    }

    pub fn buy_column(&self) -> String {
        format!("{}{}", BUY_SIGNAL, self.tag())
    }

    pub fn sell_column(&self) -> String {
        format!("{}{}", SELL_SIGNAL, self.tag())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "macd" => Some(StrategyKind::Macd),
            "bollinger" | "bollingerbands" | "bollinger_bands" | "bb" => {
                Some(StrategyKind::Bollinger)
            }
            "cci" => Some(StrategyKind::Cci),
            "adx" => Some(StrategyKind::Adx),
            "obv" => Some(StrategyKind::Obv),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Indicator parameters for one strategy family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        length: usize,
        std_mult: f64,
    },
    Cci {
        length: usize,
        constant: f64,
    },
    Adx {
        length: usize,
        threshold: f64,
    },
    Obv,
}

impl StrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyConfig::Macd { .. } => StrategyKind::Macd,
            StrategyConfig::Bollinger { .. } => StrategyKind::Bollinger,
            StrategyConfig::Cci { .. } => StrategyKind::Cci,
            StrategyConfig::Adx { .. } => StrategyKind::Adx,
            StrategyConfig::Obv => StrategyKind::Obv,
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyConfig::Macd { fast, slow, signal } => {
                write!(f, "MACD(fast={}, slow={}, signal={})", fast, slow, signal)
            }
            StrategyConfig::Bollinger { length, std_mult } => {
                write!(f, "BollingerBands(length={}, std={:.2})", length, std_mult)
            }
            StrategyConfig::Cci { length, constant } => {
                write!(f, "CCI(length={}, constant={})", length, constant)
            }
            StrategyConfig::Adx { length, threshold } => {
                write!(f, "ADX(length={}, threshold={})", length, threshold)
            }
            StrategyConfig::Obv => f.write_str("OBV"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    EndOfData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
    pub size: u64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub initial_capital: f64,
    pub total_trades: usize,
    pub final_equity: f64,
    pub return_percent: f64,
    pub roi_percent: f64,
    pub best_trade_percent: f64,
    pub worst_trade_percent: f64,
    pub win_rate: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_percent: f64,
    pub exposure_bars: usize,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestStats {
    /// The neutral record: nothing traded, capital untouched.
    pub fn zero_activity(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            total_trades: 0,
            final_equity: initial_capital,
            return_percent: 0.0,
            roi_percent: 0.0,
            best_trade_percent: 0.0,
            worst_trade_percent: 0.0,
            win_rate: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown_percent: 0.0,
            exposure_bars: 0,
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn best_trade_dollars(&self) -> f64 {
        self.best_trade_percent * self.initial_capital / 100.0
    }

    pub fn worst_trade_dollars(&self) -> f64 {
        self.worst_trade_percent * self.initial_capital / 100.0
    }

    pub fn report(&self) -> ReportRecord {
        ReportRecord {
            number_of_trades: self.total_trades,
            return_percent: self.return_percent,
            best_trade_dollars: self.best_trade_dollars(),
            worst_trade_dollars: self.worst_trade_dollars(),
            roi_percent: self.roi_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BacktestOutcome {
    Completed(BacktestStats),
    Degenerate { stats: BacktestStats, reason: String },
}

impl BacktestOutcome {
    pub fn stats(&self) -> &BacktestStats {
        match self {
            BacktestOutcome::Completed(stats) => stats,
            BacktestOutcome::Degenerate { stats, .. } => stats,
        }
    }

    pub fn into_stats(self) -> BacktestStats {
        match self {
            BacktestOutcome::Completed(stats) => stats,
            BacktestOutcome::Degenerate { stats, .. } => stats,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, BacktestOutcome::Degenerate { .. })
    }

    pub fn return_percent(&self) -> f64 {
        self.stats().return_percent
    }
}

/// Flat statistics handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub number_of_trades: usize,
    pub return_percent: f64,
    pub best_trade_dollars: f64,
    pub worst_trade_dollars: f64,
    pub roi_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub config: StrategyConfig,
    pub return_percent: f64,
    pub total_trades: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub kind: StrategyKind,
    pub bounds: SearchBounds,
    pub best: StrategyConfig,
    pub best_return_percent: f64,
    pub top: Vec<RankedCandidate>,
    pub evaluated: usize,
    pub used_fallback: bool,
}

// Worker communication structures
#[derive(Debug, Clone)]
pub struct BacktestTask {
    pub index: usize,
    pub config: StrategyConfig,
}

#[derive(Debug, Clone)]
pub struct BacktestTaskResult {
    pub index: usize,
    pub result: Option<RankedCandidate>,
    pub error: Option<String>,
}
