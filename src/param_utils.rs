use crate::error::EngineError;
use log::warn;
use std::collections::HashMap;

/// How out-of-range strategy parameters are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParameterPolicy {
    /// Replace invalid values by the family default.
    #[default]
    Lenient,
    /// Reject invalid values with `EngineError::InvalidParameter`.
    Strict,
}

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Truncate a raw value to a window length, falling back to `default` when it
/// is not a positive finite number.
pub fn positive_usize_or(
    raw: f64,
    name: &'static str,
    default: usize,
    policy: ParameterPolicy,
) -> Result<usize, EngineError> {
    if raw.is_finite() && raw >= 1.0 {
        return Ok(raw as usize);
    }
    match policy {
        ParameterPolicy::Strict => Err(EngineError::InvalidParameter { name, value: raw }),
        ParameterPolicy::Lenient => {
            warn!(
                "Parameter {} = {} is not a positive length; using default {}",
                name, raw, default
            );
            Ok(default)
        }
    }
}

pub fn positive_f64_or(
    raw: f64,
    name: &'static str,
    default: f64,
    policy: ParameterPolicy,
) -> Result<f64, EngineError> {
    if raw.is_finite() && raw > 0.0 {
        return Ok(raw);
    }
    match policy {
        ParameterPolicy::Strict => Err(EngineError::InvalidParameter { name, value: raw }),
        ParameterPolicy::Lenient => {
            warn!(
                "Parameter {} = {} is not positive; using default {}",
                name, raw, default
            );
            Ok(default)
        }
    }
}

/// Round to two decimals the way the std-multiplier grid is reported.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Parse `name=value` pairs as passed on the command line.
pub fn parse_parameter_pairs(pairs: &[String]) -> anyhow::Result<HashMap<String, f64>> {
    let mut params = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(anyhow::anyhow!(
                "Parameter {} must be written as name=value",
                pair
            ));
        };
        let key = key.trim();
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow::anyhow!("Parameter {} must be a number (value: {})", key, value))?;
        params.insert(key.to_string(), value);
    }
    Ok(params)
}
