use crate::error::EngineError;
use crate::indicators;
use crate::models::*;

pub struct ADXStrategy {
    period: usize,
    threshold: f64,
}

impl ADXStrategy {
    pub fn new(period: usize, threshold: f64) -> Self {
        Self { period, threshold }
    }
}

impl super::Strategy for ADXStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Adx
    }

    fn config(&self) -> StrategyConfig {
        StrategyConfig::Adx {
            length: self.period,
            threshold: self.threshold,
        }
    }

    // Smoothed DM needs one full window, ADX a second one over DX.
    fn warmup_bars(&self) -> usize {
        (2 * self.period).saturating_sub(2).max(1)
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let closes = frame.closes();
        let output =
            indicators::calculate_adx(&frame.highs(), &frame.lows(), &closes, self.period);

        let mut buy = vec![false; closes.len()];
        let mut sell = vec![false; closes.len()];
        for i in 1..closes.len() {
            let trending = output.adx[i] > self.threshold;
            buy[i] = trending && closes[i] > closes[i - 1];
            sell[i] = trending && closes[i] < closes[i - 1];
        }

        let mut annotated = frame.clone();
        annotated.set_indicator("TrueRange", output.true_range)?;
        annotated.set_indicator("+DM", output.plus_dm)?;
        annotated.set_indicator("-DM", output.minus_dm)?;
        annotated.set_indicator("SmoothedTR", output.smoothed_true_range)?;
        annotated.set_indicator("Smoothed+DM", output.smoothed_plus_dm)?;
        annotated.set_indicator("Smoothed-DM", output.smoothed_minus_dm)?;
        annotated.set_indicator("DX", output.dx)?;
        annotated.set_indicator("ADX", output.adx)?;
        super::set_signal_pair(&mut annotated, buy, sell)?;
        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::frame_from_closes;
    use crate::strategy::Strategy;

    #[test]
    fn strong_trend_buys_on_rising_bars_after_warmup() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        let strategy = ADXStrategy::new(3, 20.0);
        let applied = strategy.apply(&frame_from_closes(&closes)).unwrap();
        let buy = applied.signal(BUY_SIGNAL).unwrap();
        let adx = applied.indicator("ADX").unwrap();

        assert_eq!(strategy.warmup_bars(), 4);
        assert!(adx[3].is_nan());
        assert!((adx[4] - 100.0).abs() < 1e-9);
        assert!(buy[..4].iter().all(|b| !b));
        assert!(buy[4..].iter().all(|b| *b));
        assert!(applied.signal(SELL_SIGNAL).unwrap().iter().all(|s| !s));
    }

    #[test]
    fn threshold_above_adx_range_never_signals() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64 * 2.0).collect();
        let applied = ADXStrategy::new(3, 100.0)
            .apply(&frame_from_closes(&closes))
            .unwrap();
        assert!(applied.signal(BUY_SIGNAL).unwrap().iter().all(|b| !b));
    }
}
