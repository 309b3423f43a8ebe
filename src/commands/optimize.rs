use crate::cache::ParameterCache;
use crate::commands::market_data_snapshot::load_market_data;
use crate::commands::strategy_args::params_for;
use crate::config::EngineRuntimeSettings;
use crate::models::{OptimizationResult, StrategyKind};
use crate::optimizer::{print_results, Optimizer};
use crate::search_space::SearchBounds;
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct OptimizeArgs {
    pub data_file: PathBuf,
    pub forecast_file: Option<PathBuf>,
    pub strategies: Vec<StrategyKind>,
    pub params: HashMap<String, f64>,
    pub output: Option<PathBuf>,
}

pub fn run(settings: &EngineRuntimeSettings, args: &OptimizeArgs) -> Result<Vec<OptimizationResult>> {
    info!(
        "Received optimize command for {}",
        args.strategies
            .iter()
            .map(|kind| kind.tag())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let market_data = load_market_data(&args.data_file, args.forecast_file.as_deref())?;
    let frame = market_data.frame();

    let optimizer = Optimizer::new(settings.engine_config(), ParameterCache::new())
        .with_top_n(settings.optimizer_top_results)
        .with_progress(true);

    let mut results = Vec::new();
    for &kind in &args.strategies {
        if SearchBounds::default_for(kind).is_none() {
            warn!("{} has no parameters to optimise; skipping", kind);
            continue;
        }
        let bounds = SearchBounds::from_parameters(kind, &params_for(kind, &args.params))
            .with_context(|| format!("Invalid search bounds for {}", kind))?;
        let result = optimizer
            .optimize(&frame, &bounds)
            .with_context(|| format!("Optimisation of {} failed", kind))?;
        print_results(&result);
        results.push(result);
    }

    if let Some(output) = &args.output {
        write_results(output, &results)?;
        info!("Optimisation results written to {}", output.display());
    }
    Ok(results)
}

fn write_results(path: &Path, results: &[OptimizationResult]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Unable to create results file at {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, results)
        .context("Failed to serialize optimisation results")?;
    writer.flush().context("Failed to flush optimisation results")?;
    Ok(())
}
