//! Indicator math shared by the strategies.
//!
//! Rolling windows skip NaN observations and yield NaN when a window holds
//! fewer than `min_periods` valid values. Exponential means use bias-adjusted
//! weights, `alpha = 2 / (span + 1)`.

use crate::models::Candle;

pub fn calculate_ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut ema_values = Vec::with_capacity(values.len());

    for &value in values {
        numerator *= decay;
        denominator *= decay;
        if value.is_finite() {
            numerator += value;
            denominator += 1.0;
        }
        if denominator > 0.0 {
            ema_values.push(numerator / denominator);
        } else {
            ema_values.push(f64::NAN);
        }
    }

    ema_values
}

/// Double-smoothed EMA: `2 * ema(x) - ema(ema(x))`.
pub fn calculate_double_ema(values: &[f64], span: usize) -> Vec<f64> {
    let ema1 = calculate_ema(values, span);
    let ema2 = calculate_ema(&ema1, span);
    ema1.iter()
        .zip(ema2.iter())
        .map(|(first, second)| 2.0 * first - second)
        .collect()
}

pub struct MacdOutput {
    pub fast: Vec<f64>,
    pub slow: Vec<f64>,
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> MacdOutput {
    let fast = calculate_double_ema(closes, fast_period);
    let slow = calculate_double_ema(closes, slow_period);
    let macd: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
    let signal = calculate_double_ema(&macd, signal_period);
    let histogram = macd.iter().zip(signal.iter()).map(|(m, s)| m - s).collect();

    MacdOutput {
        fast,
        slow,
        macd,
        signal,
        histogram,
    }
}

fn window_values(values: &[f64], end: usize, window: usize) -> impl Iterator<Item = f64> + '_ {
    let start = (end + 1).saturating_sub(window);
    values[start..=end].iter().copied().filter(|v| !v.is_nan())
}

pub fn rolling_mean(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let window = window.max(1);
    let min_periods = min_periods.max(1);
    (0..values.len())
        .map(|i| {
            let (sum, count) =
                window_values(values, i, window).fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count >= min_periods {
                sum / count as f64
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Rolling sample standard deviation (ddof = 1).
pub fn rolling_std(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let window = window.max(1);
    let min_periods = min_periods.max(1);
    (0..values.len())
        .map(|i| {
            let (sum, count) =
                window_values(values, i, window).fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count < min_periods || count < 2 {
                return f64::NAN;
            }
            let mean = sum / count as f64;
            let squared: f64 = window_values(values, i, window)
                .map(|v| (v - mean).powi(2))
                .sum();
            (squared / (count as f64 - 1.0)).max(0.0).sqrt()
        })
        .collect()
}

pub struct BollingerOutput {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn calculate_bollinger_bands(closes: &[f64], period: usize, std_mult: f64) -> BollingerOutput {
    let middle = rolling_mean(closes, period, 1);
    let std = rolling_std(closes, period, 1);
    let upper = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m + s * std_mult)
        .collect();
    let lower = middle
        .iter()
        .zip(std.iter())
        .map(|(m, s)| m - s * std_mult)
        .collect();

    BollingerOutput {
        middle,
        upper,
        lower,
    }
}

pub struct CciOutput {
    pub typical_price: Vec<f64>,
    pub sma: Vec<f64>,
    pub mean_deviation: Vec<f64>,
    pub cci: Vec<f64>,
}

pub fn calculate_cci(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
    constant: f64,
) -> CciOutput {
    let typical_price: Vec<f64> = highs
        .iter()
        .zip(lows.iter())
        .zip(closes.iter())
        .map(|((h, l), c)| (h + l + c) / 3.0)
        .collect();
    let sma = rolling_mean(&typical_price, period, 1);
    let abs_deviation: Vec<f64> = typical_price
        .iter()
        .zip(sma.iter())
        .map(|(tp, mean)| (tp - mean).abs())
        .collect();
    let mean_deviation: Vec<f64> = rolling_mean(&abs_deviation, period, 1)
        .into_iter()
        .map(|md| if md == 0.0 { f64::NAN } else { md })
        .collect();
    let cci = typical_price
        .iter()
        .zip(sma.iter())
        .zip(mean_deviation.iter())
        .map(|((tp, mean), md)| {
            let value = (tp - mean) / (constant * md);
            if value.is_infinite() {
                f64::NAN
            } else {
                value
            }
        })
        .collect();

    CciOutput {
        typical_price,
        sma,
        mean_deviation,
        cci,
    }
}

/// True range per bar; the first bar has no previous close and is NaN.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (0..highs.len())
        .map(|i| {
            if i == 0 {
                return f64::NAN;
            }
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        })
        .collect()
}

pub fn directional_movement(highs: &[f64], lows: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut plus = vec![0.0; highs.len()];
    let mut minus = vec![0.0; highs.len()];
    for i in 1..highs.len() {
        let up_move = highs[i] - highs[i - 1];
        let down_move = lows[i - 1] - lows[i];
        if up_move > down_move {
            plus[i] = up_move.max(0.0);
        }
        if down_move > up_move {
            minus[i] = down_move.max(0.0);
        }
    }
    (plus, minus)
}

pub struct AdxOutput {
    pub true_range: Vec<f64>,
    pub plus_dm: Vec<f64>,
    pub minus_dm: Vec<f64>,
    pub smoothed_true_range: Vec<f64>,
    pub smoothed_plus_dm: Vec<f64>,
    pub smoothed_minus_dm: Vec<f64>,
    pub dx: Vec<f64>,
    pub adx: Vec<f64>,
}

pub fn calculate_adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> AdxOutput {
    let period = period.max(1);
    let true_range = true_range(highs, lows, closes);
    let (plus_dm, minus_dm) = directional_movement(highs, lows);

    let smoothed_true_range = rolling_mean(&true_range, period, period);
    let smoothed_plus_dm = rolling_mean(&plus_dm, period, period);
    let smoothed_minus_dm = rolling_mean(&minus_dm, period, period);

    // 0/0 on flat windows is NaN and stays NaN through the ADX mean.
    let dx: Vec<f64> = smoothed_plus_dm
        .iter()
        .zip(smoothed_minus_dm.iter())
        .map(|(plus, minus)| (plus - minus).abs() / (plus + minus) * 100.0)
        .collect();
    let adx = rolling_mean(&dx, period, period);

    AdxOutput {
        true_range,
        plus_dm,
        minus_dm,
        smoothed_true_range,
        smoothed_plus_dm,
        smoothed_minus_dm,
        dx,
        adx,
    }
}

pub fn calculate_obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut obv_values = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            obv_values[i] = obv_values[i - 1] + volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv_values[i] = obv_values[i - 1] - volumes[i];
        } else {
            obv_values[i] = obv_values[i - 1];
        }
    }
    obv_values
}

/// Mean true range over the last `period` bars ending at `index`.
///
/// Needs `period + 1` bars so every range has a previous close.
pub fn calculate_atr_at(candles: &[Candle], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index >= candles.len() || index < period {
        return None;
    }

    let start = index + 1 - period;
    let sum: f64 = (start..=index)
        .map(|i| {
            let candle = &candles[i];
            let prev_close = candles[i - 1].close;
            (candle.high - candle.low)
                .max((candle.high - prev_close).abs())
                .max((candle.low - prev_close).abs())
        })
        .sum();
    let atr = sum / period as f64;
    atr.is_finite().then_some(atr)
}
