//! Request pacing shared by the HTTP providers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds in-flight requests and enforces a minimum interval between the
/// starts of successive requests.
pub struct RequestPacer {
    semaphore: Semaphore,
    started: Instant,
    last_request_ms: AtomicU64,
    min_interval: Duration,
}

impl RequestPacer {
    pub fn new(requests_per_minute: u32) -> Self {
        let permits = (requests_per_minute as usize).max(1);
        let min_interval_ms = (60_000 / requests_per_minute.max(1) as u64).max(10);

        Self {
            semaphore: Semaphore::new(permits),
            started: Instant::now(),
            last_request_ms: AtomicU64::new(0),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Acquire a slot, sleeping out the remainder of the minimum interval.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        // The semaphore is never closed, so acquire cannot fail.
        let permit = self
            .semaphore
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("pacer semaphore closed"));

        let now_ms = self.started.elapsed().as_millis() as u64;
        let last_ms = self.last_request_ms.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);
        let min_ms = self.min_interval.as_millis() as u64;

        if elapsed < min_ms {
            tokio::time::sleep(Duration::from_millis(min_ms - elapsed)).await;
        }

        self.last_request_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::Relaxed);

        permit
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
