use crate::data_context::MarketData;
use anyhow::{anyhow, Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Create it with `convert-market-data` before running this command.",
        path.display()
    ))
}

/// Load a snapshot and, when given, merge a forecast snapshot behind it.
pub fn load_market_data(path: &Path, forecast_path: Option<&Path>) -> Result<MarketData> {
    ensure_market_data_file(path)?;
    let data = MarketData::load_from_file(path)?;
    let Some(forecast_path) = forecast_path else {
        return Ok(data);
    };

    ensure_market_data_file(forecast_path)?;
    let forecast = MarketData::load_from_file(forecast_path)?;
    if forecast.ticker() != data.ticker() {
        return Err(anyhow!(
            "Forecast snapshot is for {} but market data is for {}",
            forecast.ticker(),
            data.ticker()
        ));
    }
    let forecast_bars = forecast.candles().to_vec();
    let merged = data
        .with_forecast(forecast_bars)
        .with_context(|| format!("Failed to merge forecast from {}", forecast_path.display()))?;
    info!(
        "Merged {} forecast bars into {} market data",
        merged.forecast_bar_count(),
        merged.ticker()
    );
    Ok(merged)
}
