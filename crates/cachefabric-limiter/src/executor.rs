use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Configuration for the success-ratio concurrency auto-scaler.
///
/// Every `interval`, the executor looks at the completion ratio since the
/// last adjustment: above 0.9 the limit grows by one, below 0.7 it is
/// halved, always clamped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct AutoScaleConfig {
    /// Concurrency floor.
    pub min: usize,
    /// Concurrency ceiling.
    pub max: usize,
    /// How often the limit is reconsidered.
    pub interval: Duration,
}

impl Default for AutoScaleConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 16,
            interval: Duration::from_secs(10),
        }
    }
}

const GROW_RATIO: f64 = 0.9;
const SHRINK_RATIO: f64 = 0.7;
const SHRINK_FACTOR: f64 = 0.5;

struct ExecState {
    limit: usize,
    running: usize,
    // (priority, -seq): the maximum element is the highest priority,
    // earliest arrival.
    waiters: BTreeSet<(i32, i64)>,
    next_seq: i64,
    successes: u64,
    failures: u64,
    last_adjust: Instant,
}

/// Priority-ordered admission with bounded concurrency.
///
/// `run(priority, fut)` suspends the caller until its turn: higher priority
/// first, FIFO within a priority. With [`AutoScaleConfig`] attached, the
/// concurrency limit follows the observed success ratio.
pub struct PriorityExecutor {
    state: Mutex<ExecState>,
    notify: Notify,
    scale: Option<AutoScaleConfig>,
}

impl PriorityExecutor {
    /// Creates an executor with a fixed concurrency limit.
    pub fn new(concurrency: usize) -> Self {
        Self {
            state: Mutex::new(ExecState {
                limit: concurrency.max(1),
                running: 0,
                waiters: BTreeSet::new(),
                next_seq: 0,
                successes: 0,
                failures: 0,
                last_adjust: Instant::now(),
            }),
            notify: Notify::new(),
            scale: None,
        }
    }

    /// Creates an executor whose limit starts at `concurrency` and is then
    /// adjusted by the auto-scaler.
    pub fn with_auto_scale(concurrency: usize, scale: AutoScaleConfig) -> Self {
        let mut this = Self::new(concurrency.clamp(scale.min.max(1), scale.max));
        this.scale = Some(scale);
        this
    }

    /// Runs `fut` once admitted. Higher `priority` runs earlier.
    ///
    /// The future's `Ok`/`Err` outcome feeds the auto-scaler. Dropping the
    /// returned future releases the slot whether or not `fut` completed.
    pub async fn run<T, E, F>(&self, priority: i32, fut: F) -> Result<T, E>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.acquire(priority).await;
        let result = fut.await;
        permit.complete(result.is_ok());
        result
    }

    /// Current concurrency limit (moves under auto-scaling).
    pub fn limit(&self) -> usize {
        self.state.lock().unwrap().limit
    }

    /// Number of tasks currently admitted.
    pub fn running(&self) -> usize {
        self.state.lock().unwrap().running
    }

    async fn acquire(&self, priority: i32) -> Permit<'_> {
        let key = {
            let mut s = self.state.lock().unwrap();
            let key = (priority, -s.next_seq);
            s.next_seq += 1;
            s.waiters.insert(key);
            key
        };
        let mut registration = WaiterRegistration {
            exec: self,
            key,
            admitted: false,
        };

        loop {
            // Register with the notifier before checking eligibility, so a
            // release landing between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                let mut s = self.state.lock().unwrap();
                if s.running < s.limit && s.waiters.iter().next_back() == Some(&key) {
                    s.waiters.remove(&key);
                    s.running += 1;
                    registration.admitted = true;
                    drop(s);
                    return Permit {
                        exec: self,
                        completed: false,
                    };
                }
            }
            notified.await;
        }
    }

    fn release(&self, outcome: Option<bool>) {
        {
            let mut s = self.state.lock().unwrap();
            s.running = s.running.saturating_sub(1);
            if let Some(success) = outcome {
                if success {
                    s.successes += 1;
                } else {
                    s.failures += 1;
                }
            }
            if let Some(scale) = &self.scale {
                Self::maybe_adjust(&mut s, scale);
            }
        }
        self.notify.notify_waiters();
    }

    fn maybe_adjust(s: &mut ExecState, scale: &AutoScaleConfig) {
        let total = s.successes + s.failures;
        if s.last_adjust.elapsed() < scale.interval || total == 0 {
            return;
        }

        let ratio = s.successes as f64 / total as f64;
        let old = s.limit;
        if ratio > GROW_RATIO {
            s.limit = (s.limit + 1).min(scale.max);
        } else if ratio < SHRINK_RATIO {
            s.limit = (((s.limit as f64) * SHRINK_FACTOR) as usize).max(scale.min);
        }
        if s.limit != old {
            tracing::debug!(ratio, old, new = s.limit, "executor concurrency adjusted");
        }

        s.successes = 0;
        s.failures = 0;
        s.last_adjust = Instant::now();
    }
}

/// Removes an abandoned waiter from the queue on drop, so a cancelled
/// caller cannot wedge the admission order.
struct WaiterRegistration<'a> {
    exec: &'a PriorityExecutor,
    key: (i32, i64),
    admitted: bool,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        if !self.admitted {
            let mut s = self.exec.state.lock().unwrap();
            s.waiters.remove(&self.key);
            drop(s);
            // Our departure may have made the next waiter eligible.
            self.exec.notify.notify_waiters();
        }
    }
}

/// An admitted slot. Dropping it (cancellation) frees the slot without
/// feeding the auto-scaler.
struct Permit<'a> {
    exec: &'a PriorityExecutor,
    completed: bool,
}

impl Permit<'_> {
    fn complete(mut self, success: bool) {
        self.completed = true;
        self.exec.release(Some(success));
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.exec.release(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test]
    async fn admits_up_to_limit_concurrently() {
        let exec = Arc::new(PriorityExecutor::new(3));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let exec = exec.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(tokio::spawn(async move {
                exec.run::<_, (), _>(0, async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let exec = Arc::new(PriorityExecutor::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the single slot so the next two submissions queue.
        let holder = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.run::<_, (), _>(0, async {
                    sleep(Duration::from_millis(50)).await;
                    Ok(())
                })
                .await
            })
        };
        sleep(Duration::from_millis(10)).await;

        let low = {
            let (exec, order) = (exec.clone(), order.clone());
            tokio::spawn(async move {
                exec.run::<_, (), _>(1, async {
                    order.lock().unwrap().push("low");
                    Ok(())
                })
                .await
            })
        };
        sleep(Duration::from_millis(10)).await;
        let high = {
            let (exec, order) = (exec.clone(), order.clone());
            tokio::spawn(async move {
                exec.run::<_, (), _>(10, async {
                    order.lock().unwrap().push("high");
                    Ok(())
                })
                .await
            })
        };

        holder.await.unwrap().unwrap();
        low.await.unwrap().unwrap();
        high.await.unwrap().unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn fifo_within_a_priority() {
        let exec = Arc::new(PriorityExecutor::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let holder = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.run::<_, (), _>(0, async {
                    sleep(Duration::from_millis(50)).await;
                    Ok(())
                })
                .await
            })
        };
        sleep(Duration::from_millis(10)).await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let (exec, order) = (exec.clone(), order.clone());
            handles.push(tokio::spawn(async move {
                exec.run::<_, (), _>(5, async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .await
            }));
            sleep(Duration::from_millis(5)).await;
        }

        holder.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancelled_run_releases_the_slot() {
        let exec = Arc::new(PriorityExecutor::new(1));

        let blocked = exec.run::<_, (), _>(0, async {
            sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        tokio::select! {
            _ = blocked => panic!("should not finish"),
            _ = sleep(Duration::from_millis(10)) => {}
        }

        // The abandoned run must have released its permit.
        let result: Result<u32, ()> = exec.run(0, async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn auto_scaler_grows_on_success() {
        let exec = PriorityExecutor::with_auto_scale(
            2,
            AutoScaleConfig {
                min: 1,
                max: 8,
                interval: Duration::from_millis(10),
            },
        );

        for _ in 0..5 {
            let _: Result<(), ()> = exec.run(0, async { Ok(()) }).await;
            sleep(Duration::from_millis(5)).await;
        }
        assert!(exec.limit() > 2);
    }

    #[tokio::test]
    async fn auto_scaler_shrinks_on_failure() {
        let exec = PriorityExecutor::with_auto_scale(
            8,
            AutoScaleConfig {
                min: 1,
                max: 8,
                interval: Duration::from_millis(10),
            },
        );

        for _ in 0..5 {
            let _: Result<(), ()> = exec.run(0, async { Err(()) }).await;
            sleep(Duration::from_millis(5)).await;
        }
        assert!(exec.limit() < 8);
    }
}
