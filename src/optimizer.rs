use crate::cache::ParameterCache;
use crate::config::{EngineConfig, DEFAULT_TOP_RESULTS};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::*;
use crate::policy::ImmediateSignal;
use crate::search_space::SearchBounds;
use crate::strategy::create_strategy;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Exhaustive grid search over one family's parameter space.
pub struct Optimizer {
    engine_config: EngineConfig,
    cache: ParameterCache,
    top_n: usize,
    num_workers: usize,
    show_progress: bool,
}

impl Optimizer {
    pub fn new(engine_config: EngineConfig, cache: ParameterCache) -> Self {
        Self {
            engine_config,
            cache,
            top_n: DEFAULT_TOP_RESULTS,
            num_workers: std::cmp::max(1, num_cpus::get()),
            show_progress: false,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n.max(1);
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn cache(&self) -> &ParameterCache {
        &self.cache
    }

    /// Best configuration within `bounds` plus the ranked top list.
    ///
    /// A cached result for the same bounds is returned as is. Candidates are
    /// ranked by return, ties keep enumeration order; with no usable
    /// candidate the lower bounds are returned as a fallback.
    pub fn optimize(
        &self,
        frame: &Frame,
        bounds: &SearchBounds,
    ) -> Result<OptimizationResult, EngineError> {
        if frame.is_empty() {
            return Err(EngineError::EmptySeries);
        }
        if let Some(cached) = self.cache.check_cache(bounds) {
            info!("Using cached optimisation for {}", bounds.kind());
            return Ok(cached);
        }

        let start_time = Instant::now();
        let frame = &frame.without_common_signals();
        let candidates = bounds.candidates();
        let evaluated = candidates.len();
        let mut ranked = self.run_parallel_backtests(frame, candidates);

        if bounds.retain_profitable_only() {
            ranked.retain(|candidate| candidate.return_percent > 0.0);
        }
        ranked.sort_by(|a, b| {
            b.return_percent
                .partial_cmp(&a.return_percent)
                .unwrap_or(Ordering::Equal)
        });
        ranked.truncate(self.top_n);

        let result = match ranked.first() {
            Some(best) => OptimizationResult {
                kind: bounds.kind(),
                bounds: *bounds,
                best: best.config,
                best_return_percent: best.return_percent,
                top: ranked.clone(),
                evaluated,
                used_fallback: false,
            },
            None => {
                let fallback = bounds.fallback().sanitized();
                warn!(
                    "No usable candidate for {} in {} evaluations; falling back to {}",
                    bounds.kind(),
                    evaluated,
                    fallback
                );
                let best_return_percent = self
                    .evaluate(frame, fallback)
                    .map(|candidate| candidate.return_percent)
                    .unwrap_or(0.0);
                OptimizationResult {
                    kind: bounds.kind(),
                    bounds: *bounds,
                    best: fallback,
                    best_return_percent,
                    top: Vec::new(),
                    evaluated,
                    used_fallback: true,
                }
            }
        };

        info!(
            "Optimised {} over {} candidates in {:.2}s: {} ({:.2}%)",
            result.kind,
            evaluated,
            start_time.elapsed().as_secs_f64(),
            result.best,
            result.best_return_percent
        );
        self.cache.store_cache(bounds, result.clone());
        Ok(result)
    }

    fn evaluate(&self, frame: &Frame, config: StrategyConfig) -> Result<RankedCandidate, EngineError> {
        run_single_backtest(frame, &self.engine_config, config)
    }

    /// Evaluate every candidate on the worker pool. The returned list is in
    /// enumeration order regardless of completion order.
    fn run_parallel_backtests(
        &self,
        frame: &Frame,
        candidates: Vec<StrategyConfig>,
    ) -> Vec<RankedCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let candidate_count = candidates.len();
        let num_workers = std::cmp::min(candidate_count, self.num_workers);
        debug!(
            "Running {} backtests on {} worker threads",
            candidate_count, num_workers
        );

        let (tx, rx): (Sender<BacktestTask>, Receiver<BacktestTask>) = bounded(candidate_count);
        let (result_tx, result_rx): (Sender<BacktestTaskResult>, Receiver<BacktestTaskResult>) =
            bounded(candidate_count);

        let shared_frame = Arc::new(frame.clone());
        let mut handles = Vec::with_capacity(num_workers);
        for _worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let frame = Arc::clone(&shared_frame);
            let engine_config = self.engine_config.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let result = match run_single_backtest(&frame, &engine_config, task.config) {
                        Ok(candidate) => BacktestTaskResult {
                            index: task.index,
                            result: Some(candidate),
                            error: None,
                        },
                        Err(e) => BacktestTaskResult {
                            index: task.index,
                            result: None,
                            error: Some(e.to_string()),
                        },
                    };
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for (index, config) in candidates.into_iter().enumerate() {
            if tx.send(BacktestTask { index, config }).is_err() {
                warn!("All optimisation workers exited before the grid was queued");
                break;
            }
        }
        drop(tx);

        let pb = if self.show_progress {
            ProgressBar::new(candidate_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut slots: Vec<Option<RankedCandidate>> = vec![None; candidate_count];
        let mut completed = 0;
        let mut failed = 0;
        while completed < candidate_count {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(result) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    match (result.result, result.error) {
                        (Some(candidate), _) => slots[result.index] = Some(candidate),
                        (None, error) => {
                            failed += 1;
                            warn!(
                                "Candidate {} failed: {}",
                                result.index,
                                error.unwrap_or_else(|| "unknown error".to_string())
                            );
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("Result channel closed unexpectedly. Some results may be lost.");
                    break;
                }
            }
        }

        if failed > 0 {
            pb.finish_with_message("Grid search completed with errors");
        } else {
            pb.finish_with_message("Grid search completed");
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("An optimisation worker panicked");
            }
        }

        slots
            .into_iter()
            .flatten()
            .filter(|candidate| candidate.return_percent.is_finite())
            .collect()
    }
}

/// Apply one configuration to a private copy of the frame and replay it.
/// The candidate is recorded with the parameters the strategy actually used.
fn run_single_backtest(
    frame: &Frame,
    engine_config: &EngineConfig,
    config: StrategyConfig,
) -> Result<RankedCandidate, EngineError> {
    let strategy = create_strategy(&config);
    let annotated = strategy.apply(frame)?;
    let outcome = Engine::new(engine_config.clone()).run(&annotated, &ImmediateSignal)?;
    let stats = outcome.stats();
    Ok(RankedCandidate {
        config: strategy.config(),
        return_percent: stats.return_percent,
        total_trades: stats.total_trades,
    })
}

pub fn print_results(result: &OptimizationResult) {
    println!(
        "\n=== {} OPTIMISATION ({} candidates) ===\n",
        result.kind, result.evaluated
    );

    if result.used_fallback {
        println!("No candidate qualified; using lower bounds.");
    }
    for (i, candidate) in result.top.iter().enumerate() {
        println!("Rank {}:", i + 1);
        println!("  Parameters: {}", candidate.config);
        println!("  Return: {:.2}%", candidate.return_percent);
        println!("  Trades: {}", candidate.total_trades);
        println!();
    }
    println!(
        "Best: {} ({:.2}%)",
        result.best, result.best_return_percent
    );
}
