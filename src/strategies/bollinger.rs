use crate::error::EngineError;
use crate::indicators;
use crate::models::*;

pub struct BollingerStrategy {
    period: usize,
    std_mult: f64,
}

impl BollingerStrategy {
    pub fn new(period: usize, std_mult: f64) -> Self {
        Self { period, std_mult }
    }
}

impl super::Strategy for BollingerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bollinger
    }

    fn config(&self) -> StrategyConfig {
        StrategyConfig::Bollinger {
            length: self.period,
            std_mult: self.std_mult,
        }
    }

    fn warmup_bars(&self) -> usize {
        1
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let closes = frame.closes();
        let bands = indicators::calculate_bollinger_bands(&closes, self.period, self.std_mult);

        let buy = closes
            .iter()
            .zip(bands.lower.iter())
            .map(|(close, lower)| close < lower)
            .collect();
        let sell = closes
            .iter()
            .zip(bands.upper.iter())
            .map(|(close, upper)| close > upper)
            .collect();

        let mut annotated = frame.clone();
        annotated.set_indicator("MiddleBand", bands.middle)?;
        annotated.set_indicator("UpperBand", bands.upper)?;
        annotated.set_indicator("LowerBand", bands.lower)?;
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
    fn flat_prices_collapse_bands_without_signals() {
        let applied = BollingerStrategy::new(5, 2.0)
            .apply(&frame_from_closes(&[42.0; 12]))
            .unwrap();
        let upper = applied.indicator("UpperBand").unwrap();
        let lower = applied.indicator("LowerBand").unwrap();
        assert!(upper[0].is_nan());
        assert_eq!(upper[11], 42.0);
        assert_eq!(lower[11], 42.0);
        assert!(applied.signal(BUY_SIGNAL).unwrap().iter().all(|b| !b));
        assert!(applied.signal(SELL_SIGNAL).unwrap().iter().all(|s| !s));
    }

    #[test]
    fn close_below_lower_band_buys() {
        let mut closes = vec![100.0, 101.0, 99.0, 100.0, 101.0, 99.0, 100.0];
        closes.push(80.0);
        closes.push(125.0);
        let applied = BollingerStrategy::new(5, 1.0)
            .apply(&frame_from_closes(&closes))
            .unwrap();
        let buy = applied.signal(BUY_SIGNAL).unwrap();
        let sell = applied.signal(SELL_SIGNAL).unwrap();
        assert!(buy[7]);
        assert!(sell[8]);
        assert!(!buy[8]);
    }
}
