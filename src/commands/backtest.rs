use crate::cache::ParameterCache;
use crate::commands::market_data_snapshot::load_market_data;
use crate::commands::strategy_args::params_for;
use crate::config::EngineRuntimeSettings;
use crate::engine::Engine;
use crate::forecast_client::HttpForecastOracle;
use crate::models::{BacktestOutcome, StrategyConfig, StrategyKind};
use crate::optimizer::{print_results, Optimizer};
use crate::param_utils::ParameterPolicy;
use crate::policy::{DecisionPolicy, GatingMode, ImmediateSignal, OracleGated};
use crate::processor::{ProcessedRun, StrategyProcessor, StrategySelection};
use crate::search_space::SearchBounds;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct BacktestArgs {
    pub data_file: PathBuf,
    pub forecast_file: Option<PathBuf>,
    pub strategies: Vec<StrategyKind>,
    pub params: HashMap<String, f64>,
    pub optimize: bool,
    pub strict: bool,
    pub gate: Option<GatingMode>,
    pub json: bool,
}

pub fn run(settings: &EngineRuntimeSettings, args: &BacktestArgs) -> Result<ProcessedRun> {
    let market_data = load_market_data(&args.data_file, args.forecast_file.as_deref())?;
    let frame = market_data.frame();
    let selections = build_selections(args)?;

    let policy: Box<dyn DecisionPolicy> = match args.gate {
        None => Box::new(ImmediateSignal),
        Some(mode) => {
            let base_url = settings.forecast_api_url.as_deref().ok_or_else(|| {
                anyhow!("FORECAST_API_URL must be set to gate trades with a forecast")
            })?;
            let oracle = HttpForecastOracle::within_budget(base_url, settings.forecast_timeout)?;
            info!("Gating trades on forecasts from {}", oracle.forecast_url());
            let mut gated = OracleGated::new(
                Arc::new(oracle),
                market_data.ticker(),
                market_data.interval(),
                mode,
                settings.forecast_timeout,
            );
            if let Some(days) = settings.forecast_lookback_days {
                gated = gated.with_lookback_days(days);
            }
            Box::new(gated)
        }
    };

    let engine_config = settings.engine_config();
    let processor = StrategyProcessor::new(
        Optimizer::new(engine_config.clone(), ParameterCache::new())
            .with_top_n(settings.optimizer_top_results)
            .with_progress(true),
        Engine::new(engine_config),
    );
    let run = processor
        .process(&frame, &selections, policy.as_ref())
        .with_context(|| format!("Backtest of {} failed", market_data.ticker()))?;

    for optimization in &run.optimizations {
        print_results(optimization);
    }
    print_run(&run, args.json)?;
    Ok(run)
}

fn build_selections(args: &BacktestArgs) -> Result<Vec<StrategySelection>> {
    let policy = if args.strict {
        ParameterPolicy::Strict
    } else {
        ParameterPolicy::Lenient
    };

    args.strategies
        .iter()
        .map(|&kind| {
            let params = params_for(kind, &args.params);
            if args.optimize {
                if SearchBounds::default_for(kind).is_some() {
                    let bounds = SearchBounds::from_parameters(kind, &params)
                        .with_context(|| format!("Invalid search bounds for {}", kind))?;
                    return Ok(StrategySelection::optimized(bounds));
                }
                warn!("{} has no parameters to optimise; using it as is", kind);
            }
            let config = StrategyConfig::from_parameters(kind, &params, policy)
                .with_context(|| format!("Invalid parameters for {}", kind))?;
            Ok(StrategySelection::fixed(config))
        })
        .collect()
}

fn print_run(run: &ProcessedRun, json: bool) -> Result<()> {
    let report = run.report();
    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{}", rendered);
        return Ok(());
    }

    println!("\n=== BACKTEST RESULTS ===\n");
    for config in &run.applied {
        println!("Strategy: {}", config);
    }
    if let BacktestOutcome::Degenerate { reason, .. } = &run.outcome {
        println!("Degenerate run: {}", reason);
    }
    let stats = run.outcome.stats();
    println!("Number of Trades: {}", report.number_of_trades);
    println!("Return: {:.2}%", report.return_percent);
    println!("Best Trade: ${:.2}", report.best_trade_dollars);
    println!("Worst Trade: ${:.2}", report.worst_trade_dollars);
    println!("ROI: {:.2}%", report.roi_percent);
    println!("Final Equity: ${:.2}", stats.final_equity);
    println!("Max Drawdown: {:.2}%", stats.max_drawdown_percent);
    println!("Sharpe Ratio: {:.2}", stats.sharpe_ratio);
    Ok(())
}
