//! Stateless indicator math over candle sequences.
//!
//! Every function returns a vector the same length as its input, left-padded
//! with `f64::NAN` until enough warmup bars exist. Periods are bar counts,
//! never calendar units. Callers treat a NAN at the decision index as
//! "insufficient data".

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = sum / period as f64;
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = sum / period as f64;
    }
    out
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// values.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;
    for i in period..values.len() {
        out[i] = alpha * values[i] + (1.0 - alpha) * out[i - 1];
    }
    out
}

/// Wilder RSI. First valid value at index `period`.
pub fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

#[derive(Debug, Clone)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD(fast, slow, signal) with histogram = line - signal.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> Macd {
    let n = closes.len();
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let mut line = vec![f64::NAN; n];
    for i in 0..n {
        if !fast_ema[i].is_nan() && !slow_ema[i].is_nan() {
            line[i] = fast_ema[i] - slow_ema[i];
        }
    }

    // Signal EMA runs over the valid suffix of the line, then gets re-padded.
    let first_valid = line.iter().position(|v| !v.is_nan());
    let mut signal = vec![f64::NAN; n];
    if let Some(start) = first_valid {
        let valid: Vec<f64> = line[start..].to_vec();
        let sig = ema(&valid, signal_period);
        for (i, v) in sig.into_iter().enumerate() {
            signal[start + i] = v;
        }
    }

    let mut histogram = vec![f64::NAN; n];
    for i in 0..n {
        if !line[i].is_nan() && !signal[i].is_nan() {
            histogram[i] = line[i] - signal[i];
        }
    }

    Macd {
        line,
        signal,
        histogram,
    }
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
    /// (upper - lower) / middle.
    pub width: Vec<f64>,
}

/// Bollinger bands over `period` with `k` standard deviations (population).
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Bollinger {
    let n = closes.len();
    let middle = sma(closes, period);
    let mut upper = vec![f64::NAN; n];
    let mut lower = vec![f64::NAN; n];
    let mut width = vec![f64::NAN; n];

    if period == 0 || n < period {
        return Bollinger {
            upper,
            middle,
            lower,
            width,
        };
    }

    for i in (period - 1)..n {
        let window = &closes[i + 1 - period..=i];
        let mean = middle[i];
        let var = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        let sd = var.sqrt();
        upper[i] = mean + k * sd;
        lower[i] = mean - k * sd;
        if mean != 0.0 {
            width[i] = (upper[i] - lower[i]) / mean;
        }
    }

    Bollinger {
        upper,
        middle,
        lower,
        width,
    }
}

/// True range series; index 0 uses high-low only.
fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let n = highs.len();
    let mut tr = vec![0.0; n];
    if n == 0 {
        return tr;
    }
    tr[0] = highs[0] - lows[0];
    for i in 1..n {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        tr[i] = hl.max(hc).max(lc);
    }
    tr
}

/// Wilder ATR. First valid value at index `period`.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }
    let tr = true_range(highs, lows, closes);

    let seed: f64 = tr[1..=period].iter().sum::<f64>() / period as f64;
    out[period] = seed;
    for i in (period + 1)..n {
        out[i] = (out[i - 1] * (period as f64 - 1.0) + tr[i]) / period as f64;
    }
    out
}

/// ATR as a fraction of close, for volatility-regime checks.
pub fn atr_pct(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    atr(highs, lows, closes, period)
        .iter()
        .zip(closes)
        .map(|(a, c)| if *c != 0.0 { a / c } else { f64::NAN })
        .collect()
}

/// Wilder ADX. First valid value at index `2 * period`.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = highs.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= 2 * period {
        return out;
    }

    let tr = true_range(highs, lows, closes);
    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    // Wilder-smoothed TR / +DM / -DM.
    let mut s_tr: f64 = tr[1..=period].iter().sum();
    let mut s_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut s_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut dx = vec![f64::NAN; n];
    for i in period..n {
        if i > period {
            s_tr = s_tr - s_tr / period as f64 + tr[i];
            s_plus = s_plus - s_plus / period as f64 + plus_dm[i];
            s_minus = s_minus - s_minus / period as f64 + minus_dm[i];
        }
        if s_tr == 0.0 {
            continue;
        }
        let di_plus = 100.0 * s_plus / s_tr;
        let di_minus = 100.0 * s_minus / s_tr;
        let di_sum = di_plus + di_minus;
        if di_sum != 0.0 {
            dx[i] = 100.0 * (di_plus - di_minus).abs() / di_sum;
        }
    }

    // ADX = Wilder average of DX.
    let seed: f64 = dx[period..=2 * period].iter().sum::<f64>() / (period as f64 + 1.0);
    out[2 * period] = seed;
    for i in (2 * period + 1)..n {
        if !dx[i].is_nan() {
            out[i] = (out[i - 1] * (period as f64 - 1.0) + dx[i]) / period as f64;
        } else {
            out[i] = out[i - 1];
        }
    }
    out
}

/// Rolling z-score over a trailing window. NAN where the window standard
/// deviation is zero.
pub fn zscore(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n < period {
        return out;
    }
    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        let sd = var.sqrt();
        if sd > 0.0 {
            out[i] = (values[i] - mean) / sd;
        }
    }
    out
}

/// Percentile rank (0..1) of each value within its trailing `lookback`
/// window. Used for the BB-width squeeze and ATR-percentile checks.
pub fn percentile_rank(values: &[f64], lookback: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = vec![f64::NAN; n];
    if lookback == 0 || n < lookback {
        return out;
    }
    for i in (lookback - 1)..n {
        let window = &values[i + 1 - lookback..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        let below = window.iter().filter(|v| **v <= values[i]).count();
        out[i] = below as f64 / lookback as f64;
    }
    out
}

/// Per-bar relative slope of a series over `bars`: (s[i] / s[i-bars] - 1) / bars.
pub fn slope(series: &[f64], bars: usize) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![f64::NAN; n];
    if bars == 0 {
        return out;
    }
    for i in bars..n {
        let prev = series[i - bars];
        if prev.is_nan() || series[i].is_nan() || prev == 0.0 {
            continue;
        }
        out[i] = (series[i] / prev - 1.0) / bars as f64;
    }
    out
}
