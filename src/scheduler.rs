//! Single-slot background scheduler.
//!
//! At most one run of the job is in flight. A trigger that arrives while a
//! run is in progress is dropped, never queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::Result;

/// Work driven by the [`Scheduler`].
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

pub struct Scheduler {
    job: Arc<dyn Job>,
    interval: Duration,
    slot: Mutex<()>,
}

impl Scheduler {
    pub fn new(job: Arc<dyn Job>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            slot: Mutex::new(()),
        }
    }

    /// Run the job now unless a run is already in progress.
    ///
    /// Returns whether the job ran. Job failures are logged, not returned.
    pub async fn trigger(&self) -> bool {
        let Ok(_running) = self.slot.try_lock() else {
            debug!(job = self.job.name(), "Run in progress, skipping trigger");
            return false;
        };
        match self.job.run().await {
            Ok(()) => debug!(job = self.job.name(), "Job finished"),
            Err(e) => error!(job = self.job.name(), error = %e, "Job failed"),
        }
        true
    }

    /// Run once immediately, then on every interval until cancelled.
    ///
    /// A run that has started is always allowed to finish.
    pub async fn run_until_cancelled(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = self.job.name(), interval = ?self.interval, "Scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job = self.job.name(), "Scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.trigger().await;
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_until_cancelled(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    struct CountingJob {
        runs: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingJob {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                delay,
                fail: false,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Internal("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn overlapping_trigger_is_dropped() {
        let job = CountingJob::new(Duration::from_millis(50));
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(3600));

        let (first, second) = tokio::join!(scheduler.trigger(), scheduler.trigger());

        assert!(first ^ second);
        assert_eq!(job.runs(), 1);
        assert!(scheduler.trigger().await);
        assert_eq!(job.runs(), 2);
    }

    #[tokio::test]
    async fn failed_run_frees_the_slot() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: true,
        });
        let scheduler = Scheduler::new(job.clone(), Duration::from_secs(3600));

        assert!(scheduler.trigger().await);
        assert!(scheduler.trigger().await);
        assert_eq!(job.runs(), 2);
    }

    #[tokio::test]
    async fn runs_eagerly_then_stops_on_cancel() {
        let job = CountingJob::new(Duration::ZERO);
        let scheduler = Arc::new(Scheduler::new(job.clone(), Duration::from_secs(3600)));
        let cancel = CancellationToken::new();

        let handle = scheduler.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(job.runs(), 1);
    }

    #[tokio::test]
    async fn repeats_on_interval() {
        let job = CountingJob::new(Duration::ZERO);
        let scheduler = Arc::new(Scheduler::new(job.clone(), Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let handle = scheduler.spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(110)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(job.runs() >= 3, "ran {} times", job.runs());
    }
}
