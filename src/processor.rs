use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::*;
use crate::optimizer::Optimizer;
use crate::policy::DecisionPolicy;
use crate::search_space::SearchBounds;
use crate::signals::{combine_signals, tag_signals};
use crate::strategy::create_strategy;
use log::info;
use rayon::prelude::*;

/// One strategy to run, optionally searched within `bounds` first.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySelection {
    pub config: StrategyConfig,
    pub bounds: Option<SearchBounds>,
}

impl StrategySelection {
    pub fn fixed(config: StrategyConfig) -> Self {
        Self {
            config,
            bounds: None,
        }
    }

    pub fn optimized(bounds: SearchBounds) -> Self {
        Self {
            config: StrategyConfig::default_for(bounds.kind()),
            bounds: Some(bounds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessedRun {
    pub applied: Vec<StrategyConfig>,
    pub optimizations: Vec<OptimizationResult>,
    pub frame: Frame,
    pub outcome: BacktestOutcome,
}

impl ProcessedRun {
    pub fn report(&self) -> ReportRecord {
        self.outcome.stats().report()
    }
}

/// Optimise, apply, combine and simulate a set of strategies on one series.
pub struct StrategyProcessor {
    optimizer: Optimizer,
    engine: Engine,
}

impl StrategyProcessor {
    pub fn new(optimizer: Optimizer, engine: Engine) -> Self {
        Self { optimizer, engine }
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn process(
        &self,
        frame: &Frame,
        selections: &[StrategySelection],
        policy: &dyn DecisionPolicy,
    ) -> Result<ProcessedRun, EngineError> {
        if selections.is_empty() {
            return Err(EngineError::NoStrategySelected);
        }

        let mut applied = Vec::with_capacity(selections.len());
        let mut optimizations = Vec::new();
        for selection in selections {
            match &selection.bounds {
                Some(bounds) => {
                    let result = self.optimizer.optimize(frame, bounds)?;
                    applied.push(result.best);
                    optimizations.push(result);
                }
                None => applied.push(selection.config.sanitized()),
            }
        }

        let annotated: Vec<Frame> = applied
            .par_iter()
            .map(|config| {
                let strategy = create_strategy(config);
                let output = strategy.apply(frame)?;
                tag_signals(&output, config.kind())
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let mut merged = frame.without_common_signals();
        for (config, output) in applied.iter().zip(annotated.iter()) {
            copy_columns(output, &mut merged, config.kind())?;
        }
        if let [single] = annotated.as_slice() {
            for name in [BUY_SIGNAL, SELL_SIGNAL] {
                if let Some(values) = single.signal(name) {
                    merged.set_signal(name, values.to_vec())?;
                }
            }
        } else {
            let kinds: Vec<StrategyKind> = applied.iter().map(StrategyConfig::kind).collect();
            merged = combine_signals(&merged, &kinds)?;
        }

        let outcome = self.engine.run(&merged, policy)?;
        let stats = outcome.stats();
        info!(
            "Processed {} strategies: {} trades, return {:.2}%",
            applied.len(),
            stats.total_trades,
            stats.return_percent
        );

        Ok(ProcessedRun {
            applied,
            optimizations,
            frame: merged,
            outcome,
        })
    }
}

fn copy_columns(source: &Frame, target: &mut Frame, kind: StrategyKind) -> Result<(), EngineError> {
    for name in source.indicator_names() {
        if let Some(values) = source.indicator(name) {
            target.set_indicator(name, values.to_vec())?;
        }
    }
    for name in [kind.buy_column(), kind.sell_column()] {
        if let Some(values) = source.signal(&name) {
            target.set_signal(name, values.to_vec())?;
        }
    }
    Ok(())
}
