use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_COMMISSION_RATE: f64 = 0.002;
pub const DEFAULT_TOP_RESULTS: usize = 5;
pub const DEFAULT_FORECAST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

const SETTING_KEYS: [&str; 8] = [
    "BACKTEST_INITIAL_CAPITAL",
    "TRADE_COMMISSION_RATE",
    "OPTIMIZER_TOP_RESULTS",
    "FORECAST_TIMEOUT_SECS",
    "FORECAST_LOOKBACK_DAYS",
    "PERIODS_PER_YEAR",
    "CLOSE_POSITION_AT_END",
    "FORECAST_API_URL",
];

/// Simulator parameters for one backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    /// Close a position still open on the last bar so it shows up in the
    /// trade statistics.
    pub close_open_position_at_end: bool,
    /// Sharpe annualisation factor (252 for daily bars).
    pub periods_per_year: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            commission_rate: DEFAULT_COMMISSION_RATE,
            close_open_position_at_end: true,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineRuntimeSettings {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub optimizer_top_results: usize,
    pub forecast_timeout: Duration,
    /// Overrides the gating mode's own history window when set.
    pub forecast_lookback_days: Option<i64>,
    pub periods_per_year: f64,
    pub close_position_at_end: bool,
    pub forecast_api_url: Option<String>,
}

impl Default for EngineRuntimeSettings {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            commission_rate: DEFAULT_COMMISSION_RATE,
            optimizer_top_results: DEFAULT_TOP_RESULTS,
            forecast_timeout: Duration::from_secs(DEFAULT_FORECAST_TIMEOUT_SECS),
            forecast_lookback_days: None,
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
            close_position_at_end: true,
            forecast_api_url: None,
        }
    }
}

impl EngineRuntimeSettings {
    /// Read the known keys from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(&HashMap::new())
    }

    /// Environment settings with `overrides` on top. Overrides go through
    /// the same parsing and range checks as the environment.
    pub fn from_env_with(overrides: &HashMap<String, String>) -> Result<Self> {
        let mut settings: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        settings.extend(
            overrides
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Self::from_settings_map(&settings)
    }

    /// Missing keys take their defaults; present keys must parse and lie in
    /// range.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_capital = setting_f64_or(
            settings,
            "BACKTEST_INITIAL_CAPITAL",
            DEFAULT_INITIAL_CAPITAL,
            Some(f64::MIN_POSITIVE),
            None,
        )?;
        let commission_rate = setting_f64_or(
            settings,
            "TRADE_COMMISSION_RATE",
            DEFAULT_COMMISSION_RATE,
            Some(0.0),
            Some(0.5),
        )?;
        let optimizer_top_results =
            setting_usize_or(settings, "OPTIMIZER_TOP_RESULTS", DEFAULT_TOP_RESULTS, 1)?;
        let forecast_timeout_secs = setting_usize_or(
            settings,
            "FORECAST_TIMEOUT_SECS",
            DEFAULT_FORECAST_TIMEOUT_SECS as usize,
            1,
        )?;
        let forecast_lookback_days = match require_setting(settings, "FORECAST_LOOKBACK_DAYS") {
            Ok(_) => Some(setting_usize_or(settings, "FORECAST_LOOKBACK_DAYS", 0, 1)? as i64),
            Err(_) => None,
        };
        let periods_per_year = setting_f64_or(
            settings,
            "PERIODS_PER_YEAR",
            DEFAULT_PERIODS_PER_YEAR,
            Some(1.0),
            None,
        )?;
        let close_position_at_end = setting_bool_or(settings, "CLOSE_POSITION_AT_END", true)?;
        let forecast_api_url = require_setting(settings, "FORECAST_API_URL")
            .ok()
            .map(|url| url.trim_end_matches('/').to_string());

        Ok(Self {
            initial_capital,
            commission_rate,
            optimizer_top_results,
            forecast_timeout: Duration::from_secs(forecast_timeout_secs as u64),
            forecast_lookback_days,
            periods_per_year,
            close_position_at_end,
            forecast_api_url,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            initial_capital: self.initial_capital,
            commission_rate: self.commission_rate,
            close_open_position_at_end: self.close_position_at_end,
            periods_per_year: self.periods_per_year,
        }
    }
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Ok(raw) = require_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Ok(raw) = require_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

fn setting_bool_or(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    let Ok(raw) = require_setting(settings, key) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_yields_defaults() {
        let runtime = EngineRuntimeSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(runtime.initial_capital, 10_000.0);
        assert_eq!(runtime.commission_rate, 0.002);
        assert_eq!(runtime.optimizer_top_results, 5);
        assert_eq!(runtime.forecast_lookback_days, None);
        assert!(runtime.close_position_at_end);
        assert!(runtime.forecast_api_url.is_none());
        assert_eq!(runtime.engine_config(), EngineConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let runtime = EngineRuntimeSettings::from_settings_map(&settings(&[
            ("BACKTEST_INITIAL_CAPITAL", "25000"),
            ("TRADE_COMMISSION_RATE", "0"),
            ("CLOSE_POSITION_AT_END", "false"),
            ("FORECAST_TIMEOUT_SECS", "5"),
            ("FORECAST_LOOKBACK_DAYS", "325"),
            ("FORECAST_API_URL", "http://localhost:8000/"),
        ]))
        .unwrap();
        assert_eq!(runtime.initial_capital, 25_000.0);
        assert_eq!(runtime.commission_rate, 0.0);
        assert!(!runtime.close_position_at_end);
        assert_eq!(runtime.forecast_timeout, Duration::from_secs(5));
        assert_eq!(runtime.forecast_lookback_days, Some(325));
        assert_eq!(
            runtime.forecast_api_url.as_deref(),
            Some("http://localhost:8000")
        );
    }

    #[test]
    fn overrides_are_range_checked() {
        let runtime = EngineRuntimeSettings::from_env_with(&settings(&[
            ("BACKTEST_INITIAL_CAPITAL", "5000"),
            ("TRADE_COMMISSION_RATE", "0.001"),
        ]))
        .unwrap();
        assert_eq!(runtime.initial_capital, 5000.0);
        assert_eq!(runtime.commission_rate, 0.001);

        assert!(
            EngineRuntimeSettings::from_env_with(&settings(&[("TRADE_COMMISSION_RATE", "2")]))
                .is_err()
        );
        assert!(
            EngineRuntimeSettings::from_env_with(&settings(&[("BACKTEST_INITIAL_CAPITAL", "0")]))
                .is_err()
        );
    }

    #[test]
    fn rejects_malformed_values() {
        let err = EngineRuntimeSettings::from_settings_map(&settings(&[(
            "TRADE_COMMISSION_RATE",
            "abc",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("TRADE_COMMISSION_RATE"));

        assert!(EngineRuntimeSettings::from_settings_map(&settings(&[(
            "OPTIMIZER_TOP_RESULTS",
            "2.5"
        )]))
        .is_err());
        assert!(EngineRuntimeSettings::from_settings_map(&settings(&[(
            "BACKTEST_INITIAL_CAPITAL",
            "-1"
        )]))
        .is_err());
    }
}
