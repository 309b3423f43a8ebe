use crate::models::StrategyKind;
use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Parse a list like `["macd", "cci,adx"]` into unique kinds, keeping order.
pub fn parse_strategy_list(raw: &[String]) -> Result<Vec<StrategyKind>> {
    let mut kinds = Vec::new();
    for name in raw.iter().flat_map(|value| value.split(',')) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let kind = StrategyKind::parse(name).ok_or_else(|| {
            anyhow!(
                "Unknown strategy {} (expected one of macd, bollinger, cci, adx, obv)",
                name
            )
        })?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(anyhow!("At least one strategy must be given"));
    }
    Ok(kinds)
}

/// Parameters for one family: unscoped keys first, then `family.key`
/// entries, which take precedence.
pub fn params_for(kind: StrategyKind, params: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut scoped = HashMap::new();
    for (key, value) in params {
        if !key.contains('.') {
            scoped.insert(key.clone(), *value);
        }
    }
    for (key, value) in params {
        if let Some((family, name)) = key.split_once('.') {
            if StrategyKind::parse(family) == Some(kind) {
                scoped.insert(name.to_string(), *value);
            }
        }
    }
    scoped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_lists_accept_commas_and_deduplicate() {
        let raw = vec!["macd,cci".to_string(), "MACD".to_string(), "bb".to_string()];
        assert_eq!(
            parse_strategy_list(&raw).unwrap(),
            vec![StrategyKind::Macd, StrategyKind::Cci, StrategyKind::Bollinger]
        );
        assert!(parse_strategy_list(&["rsi".to_string()]).is_err());
        assert!(parse_strategy_list(&[]).is_err());
    }

    #[test]
    fn scoped_parameters_override_shared_ones() {
        let mut params = HashMap::new();
        params.insert("length".to_string(), 14.0);
        params.insert("cci.length".to_string(), 30.0);
        params.insert("adx.threshold".to_string(), 25.0);

        let cci = params_for(StrategyKind::Cci, &params);
        assert_eq!(cci.get("length"), Some(&30.0));
        assert!(!cci.contains_key("threshold"));

        let adx = params_for(StrategyKind::Adx, &params);
        assert_eq!(adx.get("length"), Some(&14.0));
        assert_eq!(adx.get("threshold"), Some(&25.0));
    }
}
