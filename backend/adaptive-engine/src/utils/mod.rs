// Numeric helpers shared by the profile, feature and reward layers

/// Normalize a value to [0, 1] given documented bounds
pub fn normalize_score(value: f64, min: f64, max: f64) -> f64 {
    if max - min < f64::EPSILON {
        0.5
    } else {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Exponential decay with a half-life expressed in the same unit as `age`
pub fn exponential_decay(age: f64, half_life: f64) -> f64 {
    (-age / half_life * std::f64::consts::LN_2).exp()
}

/// Per-observation smoothing weight for a half-life measured in events.
///
/// After `half_life` observations the weight of an old observation has halved.
/// Result is in (0, 1] for any positive half-life.
pub fn smoothing_alpha(half_life: f64) -> f64 {
    (1.0 - exponential_decay(1.0, half_life)).clamp(f64::MIN_POSITIVE, 1.0)
}

/// Exponentially-weighted mean/variance step (West's incremental form).
/// Returns the updated `(mean, variance)`.
pub fn ew_mean_variance(mean: f64, variance: f64, sample: f64, alpha: f64) -> (f64, f64) {
    let diff = sample - mean;
    let increment = alpha * diff;
    let mean = mean + increment;
    let variance = (1.0 - alpha) * (variance + diff * increment);
    (mean, variance.max(0.0))
}

/// Exponentially-weighted mean step
pub fn ew_mean(mean: f64, sample: f64, alpha: f64) -> f64 {
    mean + alpha * (sample - mean)
}
