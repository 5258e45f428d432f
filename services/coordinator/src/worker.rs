//! Periodic background jobs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

/// A job that runs a full cycle, then sleeps.
///
/// The interval is asked for after every cycle, so configuration reloads
/// take effect from the next sleep.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn run_cycle(&self);
}

/// Drive `job` until `shutdown` flips to true.
///
/// The first cycle runs immediately. A cycle in progress is allowed to
/// finish; shutdown is observed while sleeping.
pub async fn run_periodic<J>(job: &J, mut shutdown: watch::Receiver<bool>)
where
    J: PeriodicJob + ?Sized,
{
    info!(
        job = job.name(),
        interval_secs = job.interval().as_secs(),
        "Starting worker"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        job.run_cycle().await;

        let interval = job.interval();
        debug!(job = job.name(), interval_ms = interval.as_millis() as u64, "Worker sleeping");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(job = job.name(), "Worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        runs: AtomicUsize,
        interval: Duration,
    }

    #[async_trait]
    impl PeriodicJob for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run_cycle(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let job = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            interval: Duration::from_millis(10),
        });
        let (tx, rx) = watch::channel(false);

        let handle = {
            let job = job.clone();
            tokio::spawn(async move { run_periodic(job.as_ref(), rx).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(job.runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_first_cycle_is_immediate() {
        let job = Counter {
            runs: AtomicUsize::new(0),
            interval: Duration::from_secs(3600),
        };
        let (tx, rx) = watch::channel(false);

        let run = run_periodic(&job, rx);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(1), async { tokio::join!(run, stop) })
            .await
            .unwrap();

        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }
}
