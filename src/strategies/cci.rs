use crate::error::EngineError;
use crate::indicators;
use crate::models::*;

const CCI_OVERSOLD: f64 = -100.0;
const CCI_OVERBOUGHT: f64 = 100.0;

pub struct CCIStrategy {
    period: usize,
    constant: f64,
}

impl CCIStrategy {
    pub fn new(period: usize, constant: f64) -> Self {
        Self { period, constant }
    }
}

impl super::Strategy for CCIStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cci
    }

    fn config(&self) -> StrategyConfig {
        StrategyConfig::Cci {
            length: self.period,
            constant: self.constant,
        }
    }

    fn warmup_bars(&self) -> usize {
        1
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let output = indicators::calculate_cci(
            &frame.highs(),
            &frame.lows(),
            &frame.closes(),
            self.period,
            self.constant,
        );

        // NaN compares false on both sides.
        let buy = output.cci.iter().map(|cci| *cci < CCI_OVERSOLD).collect();
        let sell = output.cci.iter().map(|cci| *cci > CCI_OVERBOUGHT).collect();

        let mut annotated = frame.clone();
        annotated.set_indicator("TypicalPrice", output.typical_price)?;
        annotated.set_indicator("SMA", output.sma)?;
        annotated.set_indicator("MeanDeviation", output.mean_deviation)?;
        annotated.set_indicator("CCI", output.cci)?;
        super::set_signal_pair(&mut annotated, buy, sell)?;
        Ok(annotated)
    }
}
