use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Longest single sleep between refill polls while waiting for tokens.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A refill-on-demand token bucket.
///
/// `capacity` bounds the burst size; `fill_rate` is tokens per second.
/// Refill happens lazily whenever the bucket is consulted, so an idle
/// bucket costs nothing.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    fill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(capacity: f64, fill_rate: f64) -> Self {
        Self {
            capacity,
            fill_rate: fill_rate.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes `n` tokens if available, without blocking.
    pub fn try_take(&self, n: f64) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Suspends the caller until `n` tokens are available, then takes them.
    ///
    /// The per-retry wait is computed from the deficit and the fill rate,
    /// capped at one second. Dropping this future consumes nothing.
    pub async fn take(&self, n: f64) {
        loop {
            let deficit = {
                let mut state = self.state.lock().unwrap();
                self.refill(&mut state);
                if state.tokens >= n {
                    state.tokens -= n;
                    return;
                }
                n - state.tokens
            };

            let wait = Duration::from_secs_f64(deficit / self.fill_rate).min(MAX_POLL_INTERVAL);
            sleep(wait).await;
        }
    }

    /// Tokens currently available.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.fill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full() {
        let bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.available() >= 10.0 - f64::EPSILON);
    }

    #[test]
    fn try_take_consumes_tokens() {
        let bucket = TokenBucket::new(10.0, 1.0);
        assert!(bucket.try_take(4.0));
        assert!(bucket.try_take(4.0));
        assert!(!bucket.try_take(4.0));
    }

    #[test]
    fn refills_at_fill_rate() {
        let bucket = TokenBucket::new(2.0, 100.0);
        assert!(bucket.try_take(2.0));
        assert!(!bucket.try_take(1.0));
        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_take(1.0));
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(5.0, 1000.0);
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 5.0);
    }

    #[tokio::test]
    async fn take_waits_for_refill() {
        let bucket = TokenBucket::new(1.0, 50.0);
        bucket.take(1.0).await;
        let start = Instant::now();
        bucket.take(1.0).await;
        // 1 token at 50/s is 20ms away
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn dropped_take_consumes_nothing() {
        let bucket = TokenBucket::new(1.0, 0.001);
        bucket.take(1.0).await;

        // This waiter can't be satisfied for ages; drop it mid-wait.
        let waiter = bucket.take(1.0);
        tokio::select! {
            _ = waiter => panic!("should not acquire"),
            _ = sleep(Duration::from_millis(20)) => {}
        }

        // The dropped waiter must not have gone negative on the bucket.
        assert!(bucket.available() >= 0.0);
    }
}
