use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MEMORY_LIMIT_MB: usize = 2048;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Tuning knobs for [`crate::AntReader`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Soft ceiling on decoded records held for the ordered cursor.
    pub memory_limit_mb: usize,
    /// Number of decode workers.
    pub threads: usize,
    /// Backoff used by workers and the cursor when they have nothing to do.
    pub poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReaderConfig {
    pub fn with_memory_limit_mb(mut self, mb: usize) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb as u64 * 1024 * 1024
    }
}

/// Cooperative cancellation flag shared between a caller and a running scan.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.memory_limit_mb, 2048);
        assert!(config.threads >= 1);
        assert_eq!(config.with_threads(0).threads, 1);
        assert_eq!(ReaderConfig::default().with_memory_limit_mb(1).memory_limit_bytes(), 1 << 20);
    }

    #[test]
    fn test_cancel_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
