//! Step-size schedule for the sufficient-statistic EWMAs.

/// Weight given to a batch ending at sample `count`.
///
/// Equivalent to applying `batch_size` successive single-sample updates
/// with step `((1 + offset) / (offset + i))^learning_rate`:
///
/// ```text
/// w = 1 − Π_{i = count − batch_size + 1}^{count} (1 − ((1 + offset) / (offset + i))^learning_rate)
/// ```
///
/// The first batch of a stream (`count == batch_size`) gets weight 1, so the
/// statistics forget their zero initialisation. For `learning_rate ∈ (0, 1]`
/// the result stays in `(0, 1]` and does not increase with `count`.
pub fn batch_weight(count: u64, batch_size: usize, learning_rate: f64, offset: f64) -> f64 {
    let start = count.saturating_sub(batch_size as u64) + 1;
    let mut keep = 1.0;
    for i in start..=count {
        let step = ((1.0 + offset) / (offset + i as f64)).powf(learning_rate);
        keep *= 1.0 - step.min(1.0);
    }
    1.0 - keep
}
