//! Periodic background sweeps.
//!
//! The [`Scheduler`] owns one tokio task per sweep. Each task ticks on a
//! fixed interval (the first tick fires at once, so a fresh boot posts jobs
//! immediately) and exits when the shared shutdown signal flips. A failed
//! sweep is logged and retried on the next tick; it never stops the task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::simulation::Simulation;

/// Shortest period a task may tick at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Errors raised while stopping scheduled tasks.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A task panicked or was aborted.
    #[error("scheduled task {task} failed: {source}")]
    Join {
        /// Name of the task.
        task: &'static str,
        /// The join failure.
        source: JoinError,
    },
}

/// Owner of the background sweep tasks.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler with no tasks.
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Start the job and upkeep sweeps of `sim` at their configured periods.
    pub fn start(sim: &Arc<Simulation>) -> Self {
        let mut scheduler = Self::new();
        let job_period = sim.config().jobs.job_config().interval;
        let upkeep_period = sim.config().upkeep.interval();

        let jobs = Arc::clone(sim);
        scheduler.every("jobs", job_period, move || {
            let sim = Arc::clone(&jobs);
            async move {
                if let Err(err) = sim.run_job_cycle().await {
                    warn!(error = %err, "Job cycle failed");
                }
            }
        });

        let upkeep = Arc::clone(sim);
        scheduler.every("upkeep", upkeep_period, move || {
            let sim = Arc::clone(&upkeep);
            async move {
                if let Err(err) = sim.run_upkeep().await {
                    warn!(error = %err, "Upkeep sweep failed");
                }
            }
        });

        info!(
            jobs_secs = job_period.as_secs(),
            upkeep_secs = upkeep_period.as_secs(),
            "Scheduler started"
        );
        scheduler
    }

    /// Run `tick` every `period` until shutdown.
    pub fn every<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(MIN_PERIOD));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Scheduled task stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Number of running tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks were started.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signal every task to stop and wait for them.
    ///
    /// A sweep in progress finishes before its task exits.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        // Receivers may all be gone already; that also means stopped.
        let _ = self.shutdown.send(true);
        for (task, handle) in self.tasks {
            handle
                .await
                .map_err(|source| SchedulerError::Join { task, source })?;
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();
        let seen = Arc::clone(&count);
        scheduler.every("count", Duration::from_millis(5), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        scheduler.shutdown().await.unwrap();
        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at >= 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn empty_scheduler_stops_cleanly() {
        let scheduler = Scheduler::new();
        assert!(scheduler.is_empty());
        scheduler.shutdown().await.unwrap();
    }
}
