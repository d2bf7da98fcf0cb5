use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Per-tier retry behaviour of the fallback invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub attempts_per_tier: usize,
    pub rate_limit_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts_per_tier: 2,
            rate_limit_backoff: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn immediate() -> Self {
        Self {
            rate_limit_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Deliberate pauses between external calls of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    pub between_photos: Duration,
    pub between_persons: Duration,
    pub between_synthesis_attempts: Duration,
    /// Added on top of `between_synthesis_attempts` after a rate-limited attempt.
    pub rate_limit_penalty: Duration,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            between_photos: Duration::from_millis(1500),
            between_persons: Duration::from_secs(3),
            between_synthesis_attempts: Duration::from_secs(3),
            rate_limit_penalty: Duration::from_secs(4),
        }
    }
}

impl PacingPolicy {
    pub fn immediate() -> Self {
        Self {
            between_photos: Duration::ZERO,
            between_persons: Duration::ZERO,
            between_synthesis_attempts: Duration::ZERO,
            rate_limit_penalty: Duration::ZERO,
        }
    }
}

/// Blocks between external calls.
pub trait Pacer: Send + Sync {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

pub(crate) fn thread_pacer() -> Arc<dyn Pacer> {
    Arc::new(ThreadPacer)
}
