use crate::error::EngineError;
use crate::indicators;
use crate::models::*;

pub struct OBVStrategy;

impl super::Strategy for OBVStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Obv
    }

    fn config(&self) -> StrategyConfig {
        StrategyConfig::Obv
    }

    fn warmup_bars(&self) -> usize {
        1
    }

    fn apply(&self, frame: &Frame) -> Result<Frame, EngineError> {
        let volumes = frame
            .volumes()
            .ok_or_else(|| EngineError::MissingColumn("Volume".to_string()))?;
        let obv = indicators::calculate_obv(&frame.closes(), &volumes);

        let mut buy = vec![false; obv.len()];
        let mut sell = vec![false; obv.len()];
        for i in 1..obv.len() {
            buy[i] = obv[i] > obv[i - 1];
            sell[i] = obv[i] < obv[i - 1];
        }

        let mut annotated = frame.clone();
        annotated.set_indicator("OBV", obv)?;
        super::set_signal_pair(&mut annotated, buy, sell)?;
        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::frame_from_closes;
    use crate::strategy::Strategy;
    use chrono::{TimeZone, Utc};

    #[test]
    fn follows_close_direction() {
        let applied = OBVStrategy
            .apply(&frame_from_closes(&[10.0, 11.0, 11.0, 9.0]))
            .unwrap();
        assert_eq!(
            applied.signal(BUY_SIGNAL).unwrap(),
            &[false, true, false, false]
        );
        assert_eq!(
            applied.signal(SELL_SIGNAL).unwrap(),
            &[false, false, false, true]
        );
    }

    #[test]
    fn missing_volume_is_an_input_error() {
        let candle = Candle {
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: 10.0,
            high: 10.0,
            low: 10.0,
            close: 10.0,
            volume: None,
            source: BarSource::Historical,
        };
        let frame = Frame::new(PriceSeries::new(vec![candle]).unwrap());
        assert_eq!(
            OBVStrategy.apply(&frame).err(),
            Some(EngineError::MissingColumn("Volume".to_string()))
        );
    }
}
