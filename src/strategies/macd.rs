use crate::error::EngineError;
use crate::indicators;
use crate::models::*;

pub struct MACDStrategy {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl MACDStrategy {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            signal_period,
        }
    }
}

impl super::Strategy for MACDStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Macd
    }

    fn config(&self) -> StrategyConfig {
        StrategyConfig::Macd {
            fast: self.fast_period,
            slow: self.slow_period,
            signal: self.signal_period,
        }
    }

    // The adjusted EMA is defined from the first bar, so only bar 0 lacks a
    // previous value to cross from.
    fn warmup_bars(&self) -> usize {
        1
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let output = indicators::calculate_macd(
            &frame.closes(),
            self.fast_period,
            self.slow_period,
            self.signal_period,
        );
        let (buy, sell) = super::crossover_signals(&output.macd, &output.signal);

        let mut annotated = frame.clone();
        annotated.set_indicator("MACDFast", output.fast)?;
        annotated.set_indicator("MACDSlow", output.slow)?;
        annotated.set_indicator("MACD", output.macd)?;
        annotated.set_indicator("Signal", output.signal)?;
        annotated.set_indicator("Histogram", output.histogram)?;
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
    fn single_upward_crossover_marks_one_bar() {
        // Powers of two keep the flat prefix exactly flat, so MACD and Signal
        // sit at zero until the jump.
        let mut closes = vec![64.0; 30];
        closes.extend_from_slice(&[128.0, 256.0]);
        let frame = frame_from_closes(&closes);

        let applied = MACDStrategy::new(12, 26, 9).apply(&frame).unwrap();
        let buy = applied.signal(BUY_SIGNAL).unwrap();
        let hits: Vec<usize> = buy
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(hits, vec![30]);

        let macd = applied.indicator("MACD").unwrap();
        assert_eq!(macd[29], 0.0);
        assert!(macd[30] > 0.0);
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let closes: Vec<f64> = (0..40).map(|i| 50.0 + (i as f64 * 0.7).cos() * 3.0).collect();
        let applied = MACDStrategy::new(5, 13, 4)
            .apply(&frame_from_closes(&closes))
            .unwrap();
        let macd = applied.indicator("MACD").unwrap();
        let signal = applied.indicator("Signal").unwrap();
        let histogram = applied.indicator("Histogram").unwrap();
        for i in 0..closes.len() {
            assert!((histogram[i] - (macd[i] - signal[i])).abs() < 1e-12);
        }
    }
}
