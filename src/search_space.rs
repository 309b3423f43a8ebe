use crate::models::*;
use crate::param_utils::{get_param, round2};
use crate::strategy::{DEFAULT_CCI_CONSTANT, DEFAULT_MACD_SIGNAL};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const BOLLINGER_STD_STEP: f64 = 0.1;

/// Inclusive parameter ranges searched for one strategy family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchBounds {
    Macd {
        min_length: usize,
        max_length: usize,
    },
    Bollinger {
        min_length: usize,
        max_length: usize,
        min_std: f64,
        max_std: f64,
    },
    Cci {
        min_length: usize,
        max_length: usize,
    },
    Adx {
        min_length: usize,
        max_length: usize,
        min_threshold: usize,
        max_threshold: usize,
    },
}

impl SearchBounds {
    /// Ranges used when the caller asks to optimise without giving bounds.
    /// OBV has no parameters and so no search space.
    pub fn default_for(kind: StrategyKind) -> Option<Self> {
        match kind {
            StrategyKind::Macd => Some(SearchBounds::Macd {
                min_length: 5,
                max_length: 30,
            }),
            StrategyKind::Bollinger => Some(SearchBounds::Bollinger {
                min_length: 10,
                max_length: 30,
                min_std: 1.5,
                max_std: 2.5,
            }),
            StrategyKind::Cci => Some(SearchBounds::Cci {
                min_length: 10,
                max_length: 30,
            }),
            StrategyKind::Adx => Some(SearchBounds::Adx {
                min_length: 10,
                max_length: 20,
                min_threshold: 20,
                max_threshold: 30,
            }),
            StrategyKind::Obv => None,
        }
    }

    /// Read bounds from `min_length`/`max_length`/`min_std`/`max_std`/
    /// `min_threshold`/`max_threshold`, falling back to `default_for`.
    pub fn from_parameters(kind: StrategyKind, params: &HashMap<String, f64>) -> Result<Self> {
        let defaults = Self::default_for(kind)
            .ok_or_else(|| anyhow!("{} has no parameters to optimise", kind))?;
        let length = |key: &str, default: usize| -> Result<usize> {
            let value = get_param(params, key, default as f64);
            if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
                return Err(anyhow!("Bound {} must be a positive integer (value: {})", key, value));
            }
            Ok(value as usize)
        };
        let multiplier = |key: &str, default: f64| -> Result<f64> {
            let value = get_param(params, key, default);
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("Bound {} must be a positive number (value: {})", key, value));
            }
            Ok(value)
        };

        let bounds = match defaults {
            SearchBounds::Macd {
                min_length,
                max_length,
            } => SearchBounds::Macd {
                min_length: length("min_length", min_length)?,
                max_length: length("max_length", max_length)?,
            },
            SearchBounds::Bollinger {
                min_length,
                max_length,
                min_std,
                max_std,
            } => SearchBounds::Bollinger {
                min_length: length("min_length", min_length)?,
                max_length: length("max_length", max_length)?,
                min_std: multiplier("min_std", min_std)?,
                max_std: multiplier("max_std", max_std)?,
            },
            SearchBounds::Cci {
                min_length,
                max_length,
            } => SearchBounds::Cci {
                min_length: length("min_length", min_length)?,
                max_length: length("max_length", max_length)?,
            },
            SearchBounds::Adx {
                min_length,
                max_length,
                min_threshold,
                max_threshold,
            } => SearchBounds::Adx {
                min_length: length("min_length", min_length)?,
                max_length: length("max_length", max_length)?,
                min_threshold: length("min_threshold", min_threshold)?,
                max_threshold: length("max_threshold", max_threshold)?,
            },
        };
        Ok(bounds)
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            SearchBounds::Macd { .. } => StrategyKind::Macd,
            SearchBounds::Bollinger { .. } => StrategyKind::Bollinger,
            SearchBounds::Cci { .. } => StrategyKind::Cci,
            SearchBounds::Adx { .. } => StrategyKind::Adx,
        }
    }

    /// Every grid point in enumeration order. Inverted ranges are empty.
    pub fn candidates(&self) -> Vec<StrategyConfig> {
        match *self {
            SearchBounds::Macd {
                min_length,
                max_length,
            } => {
                let mut configs = Vec::new();
                for fast in min_length..=max_length {
                    for slow in (fast + 1)..=max_length {
                        configs.push(StrategyConfig::Macd {
                            fast,
                            slow,
                            signal: DEFAULT_MACD_SIGNAL,
                        });
                    }
                }
                configs
            }
            SearchBounds::Bollinger {
                min_length,
                max_length,
                min_std,
                max_std,
            } => {
                let std_values = bollinger_std_values(min_std, max_std);
                (min_length..=max_length)
                    .flat_map(|length| {
                        std_values
                            .iter()
                            .map(move |&std_mult| StrategyConfig::Bollinger { length, std_mult })
                    })
                    .collect()
            }
            SearchBounds::Cci {
                min_length,
                max_length,
            } => (min_length..=max_length)
                .map(|length| StrategyConfig::Cci {
                    length,
                    constant: DEFAULT_CCI_CONSTANT,
                })
                .collect(),
            SearchBounds::Adx {
                min_length,
                max_length,
                min_threshold,
                max_threshold,
            } => (min_length..=max_length)
                .flat_map(|length| {
                    (min_threshold..=max_threshold).map(move |threshold| StrategyConfig::Adx {
                        length,
                        threshold: threshold as f64,
                    })
                })
                .collect(),
        }
    }

    /// Lower-bound configuration used when the search yields nothing.
    pub fn fallback(&self) -> StrategyConfig {
        match *self {
            SearchBounds::Macd { min_length, .. } => StrategyConfig::Macd {
                fast: min_length,
                slow: min_length + 1,
                signal: DEFAULT_MACD_SIGNAL,
            },
            SearchBounds::Bollinger {
                min_length,
                min_std,
                ..
            } => StrategyConfig::Bollinger {
                length: min_length,
                std_mult: round2(min_std),
            },
            SearchBounds::Cci { min_length, .. } => StrategyConfig::Cci {
                length: min_length,
                constant: DEFAULT_CCI_CONSTANT,
            },
            SearchBounds::Adx {
                min_length,
                min_threshold,
                ..
            } => StrategyConfig::Adx {
                length: min_length,
                threshold: min_threshold as f64,
            },
        }
    }

    /// Bollinger ranks only candidates that made money.
    pub fn retain_profitable_only(&self) -> bool {
        matches!(self, SearchBounds::Bollinger { .. })
    }

    pub fn cache_key(&self) -> String {
        let bounds_json = serde_json::to_string(self).unwrap_or_default();
        format!("{}:{}", self.kind().tag(), bounds_json)
    }
}

/// `min_std, min_std + 0.1, ..., max_std`, each rounded to two decimals.
/// Multipliers that are not positive are left out.
fn bollinger_std_values(min_std: f64, max_std: f64) -> Vec<f64> {
    if !min_std.is_finite() || !max_std.is_finite() || max_std < min_std {
        return Vec::new();
    }
    let steps = ((max_std - min_std) / BOLLINGER_STD_STEP).round() as usize;
    (0..=steps)
        .map(|i| round2(min_std + i as f64 * BOLLINGER_STD_STEP))
        .filter(|std_mult| *std_mult > 0.0)
        .collect()
}
