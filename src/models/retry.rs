/// Backoff settings for short-lived storage/client retries, distinct from the
/// per-message delivery retry policy owned by the workers.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}
