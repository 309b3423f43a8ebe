use crate::models::{BarSource, Candle, Frame, PriceSeries};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    ticker: String,
    interval: String,
    candles: Vec<Candle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotFormat {
    Json,
    Bincode,
}

impl SnapshotFormat {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Bincode,
        }
    }
}

/// Price history for a single ticker, validated into a [`PriceSeries`].
#[derive(Debug, Clone, PartialEq)]
pub struct MarketData {
    ticker: String,
    interval: String,
    series: PriceSeries,
}

impl MarketData {
    pub fn new(ticker: impl Into<String>, interval: impl Into<String>, candles: Vec<Candle>) -> Result<Self> {
        let ticker = ticker.into();
        let series = PriceSeries::new(candles)
            .with_context(|| format!("Invalid price series for {}", ticker))?;
        Ok(Self {
            ticker,
            interval: interval.into(),
            series,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }

    pub fn series(&self) -> &PriceSeries {
        &self.series
    }

    pub fn candles(&self) -> &[Candle] {
        self.series.candles()
    }

    pub fn first_date(&self) -> Option<DateTime<Utc>> {
        self.candles().first().map(|c| c.date)
    }

    pub fn last_date(&self) -> Option<DateTime<Utc>> {
        self.candles().last().map(|c| c.date)
    }

    pub fn frame(&self) -> Frame {
        Frame::new(self.series.clone())
    }

    pub fn into_series(self) -> PriceSeries {
        self.series
    }

    pub fn forecast_bar_count(&self) -> usize {
        self.candles()
            .iter()
            .filter(|c| c.source == BarSource::Forecast)
            .count()
    }

    /// Append forecast bars, keeping the historical bar when both share a timestamp.
    pub fn with_forecast(self, forecast: Vec<Candle>) -> Result<Self> {
        let MarketData {
            ticker,
            interval,
            series,
        } = self;
        let merged = merge_forecast(series.into_candles(), forecast);
        Self::new(ticker, interval, merged)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading market data snapshot from {}", path.display());
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot = match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => {
                serde_json::from_reader(reader).context("Snapshot JSON decode failed")?
            }
            SnapshotFormat::Bincode => {
                bincode::deserialize_from(reader).context("Snapshot decode failed")?
            }
        };

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        let data = Self::new(snapshot.ticker, snapshot.interval, snapshot.candles)?;
        info!(
            "Loaded {} {} bars for {} ({} forecast)",
            data.candles().len(),
            data.interval,
            data.ticker,
            data.forecast_bar_count()
        );
        Ok(data)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            ticker: self.ticker.clone(),
            interval: self.interval.clone(),
            candles: self.candles().to_vec(),
        };
        match SnapshotFormat::for_path(path) {
            SnapshotFormat::Json => serde_json::to_writer_pretty(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot as JSON")?,
            SnapshotFormat::Bincode => bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize market data snapshot")?,
        }
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }
}

/// Concatenate forecast then historical bars, keep the historical bar on a
/// timestamp collision and return the result sorted by date.
pub fn merge_forecast(historical: Vec<Candle>, forecast: Vec<Candle>) -> Vec<Candle> {
    let mut by_date: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    let mut overridden = 0usize;
    for mut candle in forecast {
        candle.source = BarSource::Forecast;
        by_date.insert(candle.date, candle);
    }
    for mut candle in historical {
        candle.source = BarSource::Historical;
        if by_date.insert(candle.date, candle).is_some() {
            overridden += 1;
        }
    }
    if overridden > 0 {
        warn!(
            "{} forecast bars overlap historical data and were dropped",
            overridden
        );
    }
    by_date.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn candle(day: i64, close: f64) -> Candle {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day);
        Candle {
            date,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: Some(1_000.0 + day as f64),
            source: BarSource::Historical,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("backtest-engine-{}-{}", std::process::id(), fastrand::u64(..)))
            .join(name)
    }

    #[test]
    fn historical_bars_win_on_collision() {
        let historical = vec![candle(0, 10.0), candle(1, 11.0), candle(2, 12.0)];
        let forecast = vec![candle(2, 99.0), candle(3, 13.0), candle(4, 14.0)];
        let merged = merge_forecast(historical, forecast);

        assert_eq!(merged.len(), 5);
        assert_eq!(merged[2].close, 12.0);
        assert_eq!(merged[2].source, BarSource::Historical);
        assert_eq!(merged[3].source, BarSource::Forecast);
        assert!(merged.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn forecast_out_of_order_is_sorted() {
        let data = MarketData::new("SPY", "1d", vec![candle(0, 10.0), candle(1, 11.0)]).unwrap();
        let data = data
            .with_forecast(vec![candle(5, 15.0), candle(3, 13.0)])
            .unwrap();
        let closes: Vec<f64> = data.candles().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![10.0, 11.0, 13.0, 15.0]);
        assert_eq!(data.forecast_bar_count(), 2);
    }

    #[test]
    fn invalid_candles_are_rejected() {
        assert!(MarketData::new("SPY", "1d", Vec::new()).is_err());
        assert!(MarketData::new("SPY", "1d", vec![candle(1, 10.0), candle(0, 11.0)]).is_err());
        assert!(MarketData::new("SPY", "1d", vec![candle(0, -1.0)]).is_err());
    }

    #[test]
    fn snapshots_survive_both_formats() {
        let data = MarketData::new(
            "QQQ",
            "1h",
            vec![candle(0, 10.0), candle(1, 10.5), candle(2, 11.0)],
        )
        .unwrap();

        for name in ["snapshot.bin", "snapshot.json"] {
            let path = temp_path(name);
            data.save_to_file(&path).unwrap();
            let loaded = MarketData::load_from_file(&path).unwrap();
            assert_eq!(loaded, data);
            if let Some(parent) = path.parent() {
                let _ = fs::remove_dir_all(parent);
            }
        }
    }

    #[test]
    fn version_mismatch_is_reported() {
        let path = temp_path("old.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION + 1,
            generated_at: Utc::now(),
            ticker: "SPY".to_string(),
            interval: "1d".to_string(),
            candles: vec![candle(0, 10.0)],
        };
        fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let err = MarketData::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("version mismatch"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
