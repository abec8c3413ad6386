use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// A rolling-window limiter: at most `interval_cap` admissions per
/// `interval`, tracked with a sliding log of admission timestamps.
///
/// One instance guards one logical quota (e.g. one remote backend's write
/// budget). Cloning is not provided; share via `Arc`.
#[derive(Debug)]
pub struct WindowedLimiter {
    interval_cap: usize,
    interval: Duration,
    delay_after: Option<Duration>,
    log: Mutex<VecDeque<Instant>>,
}

impl WindowedLimiter {
    /// Creates a limiter admitting `interval_cap` tasks per `interval`.
    pub fn new(interval_cap: usize, interval: Duration) -> Self {
        Self {
            interval_cap: interval_cap.max(1),
            interval,
            delay_after: None,
            log: Mutex::new(VecDeque::new()),
        }
    }

    /// Adds a fixed pause applied after every admission.
    pub fn with_delay_after(mut self, delay: Duration) -> Self {
        self.delay_after = Some(delay);
        self
    }

    /// Suspends until the rolling window has room, then records the
    /// admission. Dropping the returned future before it completes never
    /// consumes a slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut log = self.log.lock().unwrap();
                let now = Instant::now();
                while let Some(&front) = log.front() {
                    if now.duration_since(front) >= self.interval {
                        log.pop_front();
                    } else {
                        break;
                    }
                }

                if log.len() < self.interval_cap {
                    log.push_back(now);
                    None
                } else {
                    // Wait until the oldest admission slides out.
                    log.front()
                        .map(|&oldest| (oldest + self.interval).saturating_duration_since(now))
                }
            };

            match wait {
                None => {
                    if let Some(delay) = self.delay_after {
                        sleep(delay).await;
                    }
                    return;
                }
                Some(wait) => sleep(wait.max(Duration::from_millis(1))).await,
            }
        }
    }

    /// Slots currently free in the rolling window.
    pub fn available(&self) -> usize {
        let mut log = self.log.lock().unwrap();
        let now = Instant::now();
        while let Some(&front) = log.front() {
            if now.duration_since(front) >= self.interval {
                log.pop_front();
            } else {
                break;
            }
        }
        self.interval_cap - log.len()
    }
}
