use crate::error::EngineError;
use crate::models::*;

/// Copy the generic `BuySignal`/`SellSignal` pair into the columns tagged for
/// `kind`, so several strategies can share one frame.
pub fn tag_signals(frame: &Frame, kind: StrategyKind) -> Result<Frame, EngineError> {
    let buy = frame
        .signal(BUY_SIGNAL)
        .ok_or_else(|| EngineError::MissingColumn(BUY_SIGNAL.to_string()))?
        .to_vec();
    let sell = frame
        .signal(SELL_SIGNAL)
        .ok_or_else(|| EngineError::MissingColumn(SELL_SIGNAL.to_string()))?
        .to_vec();

    let mut tagged = frame.clone();
    tagged.set_signal(kind.buy_column(), buy)?;
    tagged.set_signal(kind.sell_column(), sell)?;
    Ok(tagged)
}

/// Conjunctive merge of the tagged signal columns into
/// `CommonBuySignal`/`CommonSellSignal`.
///
/// Both columns start all true and every tag present on the frame ANDs its
/// column in. A tag without columns places no constraint.
pub fn combine_signals(frame: &Frame, tags: &[StrategyKind]) -> Result<Frame, EngineError> {
    let mut common_buy = vec![true; frame.len()];
    let mut common_sell = vec![true; frame.len()];

    for kind in tags {
        if let Some(buy) = frame.signal(&kind.buy_column()) {
            and_into(&mut common_buy, buy);
        }
        if let Some(sell) = frame.signal(&kind.sell_column()) {
            and_into(&mut common_sell, sell);
        }
    }

    let mut combined = frame.clone();
    combined.set_signal(COMMON_BUY_SIGNAL, common_buy)?;
    combined.set_signal(COMMON_SELL_SIGNAL, common_sell)?;
    Ok(combined)
}

fn and_into(target: &mut [bool], column: &[bool]) {
    for (acc, value) in target.iter_mut().zip(column) {
        *acc &= *value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::frame_from_closes;

    fn frame_with(columns: &[(StrategyKind, Vec<bool>, Vec<bool>)]) -> Frame {
        let mut frame = frame_from_closes(&[10.0, 11.0, 12.0, 13.0]);
        for (kind, buy, sell) in columns {
            frame.set_signal(kind.buy_column(), buy.clone()).unwrap();
            frame.set_signal(kind.sell_column(), sell.clone()).unwrap();
        }
        frame
    }

    #[test]
    fn any_false_column_vetoes_the_bar() {
        let frame = frame_with(&[
            (
                StrategyKind::Macd,
                vec![true, true, false, true],
                vec![false, true, true, true],
            ),
            (
                StrategyKind::Cci,
                vec![true, false, true, true],
                vec![false, true, true, false],
            ),
            (
                StrategyKind::Adx,
                vec![true, true, true, true],
                vec![true, true, true, true],
            ),
        ]);
        let tags = [StrategyKind::Macd, StrategyKind::Cci, StrategyKind::Adx];
        let combined = combine_signals(&frame, &tags).unwrap();
        assert_eq!(
            combined.signal(COMMON_BUY_SIGNAL).unwrap(),
            &[true, false, false, true]
        );
        assert_eq!(
            combined.signal(COMMON_SELL_SIGNAL).unwrap(),
            &[false, true, true, false]
        );

        let reversed = [StrategyKind::Adx, StrategyKind::Cci, StrategyKind::Macd];
        let again = combine_signals(&frame, &reversed).unwrap();
        assert_eq!(
            combined.signal(COMMON_BUY_SIGNAL),
            again.signal(COMMON_BUY_SIGNAL)
        );
    }

    #[test]
    fn single_tag_passes_through_and_missing_tags_do_not_constrain() {
        let frame = frame_with(&[(
            StrategyKind::Obv,
            vec![false, true, false, true],
            vec![true, false, false, false],
        )]);
        let combined =
            combine_signals(&frame, &[StrategyKind::Obv, StrategyKind::Bollinger]).unwrap();
        assert_eq!(
            combined.signal(COMMON_BUY_SIGNAL).unwrap(),
            &[false, true, false, true]
        );
        assert_eq!(
            combined.signal(COMMON_SELL_SIGNAL).unwrap(),
            &[true, false, false, false]
        );
    }

    #[test]
    fn tagging_requires_generic_columns() {
        let frame = frame_from_closes(&[10.0, 11.0]);
        assert_eq!(
            tag_signals(&frame, StrategyKind::Macd).err(),
            Some(EngineError::MissingColumn(BUY_SIGNAL.to_string()))
        );

        let mut frame = frame;
        frame.set_signal(BUY_SIGNAL, vec![false, true]).unwrap();
        frame.set_signal(SELL_SIGNAL, vec![true, false]).unwrap();
        let tagged = tag_signals(&frame, StrategyKind::Macd).unwrap();
        assert_eq!(tagged.signal("BuySignalMACD").unwrap(), &[false, true]);
        assert_eq!(tagged.signal("SellSignalMACD").unwrap(), &[true, false]);
    }
}
