use anyhow::{anyhow, Result};
use backtest_engine::{
    commands::{
        backtest::{self, BacktestArgs},
        convert_market_data,
        optimize::{self, OptimizeArgs},
        strategy_args::parse_strategy_list,
    },
    config::EngineRuntimeSettings,
    param_utils::parse_parameter_pairs,
    policy::GatingMode,
};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Backtest and optimise technical-indicator strategies on a price series")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// Path to the market data snapshot file (.json or bincode)
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// Snapshot with forecast bars to merge behind the historical data
    #[arg(long = "forecast-file", value_name = "PATH")]
    forecast_file: Option<PathBuf>,
    /// Initial capital (overrides BACKTEST_INITIAL_CAPITAL)
    #[arg(long)]
    capital: Option<f64>,
    /// Commission rate per side (overrides TRADE_COMMISSION_RATE)
    #[arg(long)]
    commission: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more strategies and report the combined result
    Backtest {
        #[command(flatten)]
        data: DataArgs,
        /// Strategies to run (macd, bollinger, cci, adx, obv); comma separated
        #[arg(short, long, value_delimiter = ',', num_args = 1.., required = true)]
        strategies: Vec<String>,
        /// Strategy parameters as name=value, optionally scoped as family.name=value
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Search each strategy's parameters before the final run
        #[arg(long)]
        optimize: bool,
        /// Reject invalid parameters instead of falling back to defaults
        #[arg(long)]
        strict: bool,
        /// Confirm trades with a forecast (direction or atr)
        #[arg(long, value_name = "MODE")]
        gate: Option<String>,
        /// Forecast service base URL (overrides FORECAST_API_URL)
        #[arg(long = "forecast-url", value_name = "URL")]
        forecast_url: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Grid-search strategy parameters and print the top results
    Optimize {
        #[command(flatten)]
        data: DataArgs,
        /// Strategies to optimise; comma separated
        #[arg(short, long, value_delimiter = ',', num_args = 1.., required = true)]
        strategies: Vec<String>,
        /// Search bounds as name=value (min_length, max_length, min_std, max_std, min_threshold, max_threshold)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
        /// Write the optimisation results as JSON
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Re-encode a market data snapshot, optionally merging forecast bars
    ConvertMarketData {
        /// Source snapshot
        input: PathBuf,
        /// Destination snapshot; a .json extension writes JSON
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
        /// Snapshot with forecast bars to merge
        #[arg(long = "forecast-file", value_name = "PATH")]
        forecast_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting backtest engine. Not financial advice. Use at your own risk.");

    match cli.command {
        Commands::Backtest {
            data,
            strategies,
            params,
            optimize,
            strict,
            gate,
            forecast_url,
            json,
        } => {
            let mut overrides = setting_overrides(&data);
            if let Some(url) = forecast_url {
                overrides.insert("FORECAST_API_URL".to_string(), url);
            }
            let settings = EngineRuntimeSettings::from_env_with(&overrides)?;
            let gate = gate
                .map(|raw| {
                    GatingMode::parse(&raw)
                        .ok_or_else(|| anyhow!("Unknown gating mode {} (expected direction or atr)", raw))
                })
                .transpose()?;
            let args = BacktestArgs {
                data_file: resolve_market_data_path(data.data_file),
                forecast_file: data.forecast_file,
                strategies: parse_strategy_list(&strategies)?,
                params: parse_parameter_pairs(&params)?,
                optimize,
                strict,
                gate,
                json,
            };
            backtest::run(&settings, &args)?;
        }
        Commands::Optimize {
            data,
            strategies,
            params,
            output,
        } => {
            let settings = EngineRuntimeSettings::from_env_with(&setting_overrides(&data))?;
            let args = OptimizeArgs {
                data_file: resolve_market_data_path(data.data_file),
                forecast_file: data.forecast_file,
                strategies: parse_strategy_list(&strategies)?,
                params: parse_parameter_pairs(&params)?,
                output,
            };
            optimize::run(&settings, &args)?;
        }
        Commands::ConvertMarketData {
            input,
            output,
            forecast_file,
        } => {
            convert_market_data::run(&input, forecast_file.as_deref(), &output)?;
        }
    }

    Ok(())
}

/// CLI flags as settings keys, so they pass the same checks as the environment.
fn setting_overrides(data: &DataArgs) -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    if let Some(capital) = data.capital {
        overrides.insert("BACKTEST_INITIAL_CAPITAL".to_string(), capital.to_string());
    }
    if let Some(commission) = data.commission {
        overrides.insert("TRADE_COMMISSION_RATE".to_string(), commission.to_string());
    }
    overrides
}

fn resolve_market_data_path(cli_value: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }

    PathBuf::from(DEFAULT_MARKET_DATA_FILE)
}
