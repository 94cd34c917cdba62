use rand::Rng;
use std::time::Duration;

/// Spreads `base` uniformly over `base ± jitter_percent%`.
///
/// Keeps several instances started together from polling in lockstep. Percentages above 100
/// are clamped to 100.
pub fn jittered(base: Duration, jitter_percent: u8) -> Duration {
    let spread = f64::from(jitter_percent.min(100)) / 100.0;
    if spread == 0.0 || base.is_zero() {
        return base;
    }

    let factor = 1.0 + rand::rng().random_range(-spread..=spread);
    base.mul_f64(factor.max(0.0))
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn exponential_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);

    base.checked_mul(multiplier).unwrap_or(max).min(max)
}
