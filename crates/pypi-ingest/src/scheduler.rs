//! Scheduler loop
//!
//! Claims packages one at a time and runs an [`IngestionTask`] for each,
//! pausing a random interval between packages to stay polite to the
//! registry. Throughput comes from running more worker processes against
//! the same database, not from concurrency inside one.
//!
//! In [`RunMode::Drain`] the loop stops once no READY record is left. In
//! [`RunMode::Daemon`] it sleeps and polls again. A shutdown signal is only
//! honoured between packages, so a claimed record always reaches a terminal
//! status first.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::registry::RegistryFetcher;
use crate::store::{PackageStore, StoreResult};
use crate::task::{IngestionTask, TaskOutcome};

/// What to do when no READY record is left
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Stop
    #[default]
    Drain,
    /// Sleep for the idle poll interval and look again
    Daemon,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Drain => f.write_str("drain"),
            RunMode::Daemon => f.write_str("daemon"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drain" => Ok(RunMode::Drain),
            "daemon" => Ok(RunMode::Daemon),
            _ => Err(format!("unknown run mode '{}' (expected drain or daemon)", s)),
        }
    }
}

/// Bounds of the random pause between two packages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl PacingConfig {
    /// Uniformly drawn from `[min_delay, max_delay]`
    pub fn next_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Counts for one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &TaskOutcome) {
        self.processed += 1;
        match outcome {
            TaskOutcome::Complete => self.completed += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

pub struct Scheduler<S, R> {
    store: S,
    registry: R,
    mode: RunMode,
    pacing: PacingConfig,
    idle_poll_interval: Duration,
    worker_id: Uuid,
    hostname: String,
    shutdown: watch::Receiver<bool>,
}

impl<S, R> Scheduler<S, R>
where
    S: PackageStore,
    R: RegistryFetcher,
{
    pub fn new(store: S, registry: R, config: &SchedulerConfig) -> Self {
        // Sender dropped: never signalled unless `with_shutdown` replaces it.
        let (_, shutdown) = watch::channel(false);

        Self {
            store,
            registry,
            mode: config.mode,
            pacing: config.pacing(),
            idle_poll_interval: config.idle_poll_interval(),
            worker_id: Uuid::new_v4(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            shutdown,
        }
    }

    /// Stop between packages once `true` is sent on the channel
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Run until drained or shut down, then close the store.
    ///
    /// Only a store failure while claiming ends the run with an error.
    pub async fn run(self) -> StoreResult<RunSummary> {
        info!(
            worker_id = %self.worker_id,
            hostname = %self.hostname,
            mode = %self.mode,
            min_delay_ms = self.pacing.min_delay.as_millis() as u64,
            max_delay_ms = self.pacing.max_delay.as_millis() as u64,
            "Scheduler started"
        );

        let mut summary = RunSummary::default();
        let result = self.run_loop(&mut summary).await;

        self.store.close().await;

        info!(
            worker_id = %self.worker_id,
            processed = summary.processed,
            completed = summary.completed,
            failed = summary.failed,
            "Scheduler stopped"
        );

        result.map(|()| summary)
    }

    async fn run_loop(&self, summary: &mut RunSummary) -> StoreResult<()> {
        let task = IngestionTask::new(&self.store, &self.registry);
        let mut shutdown = self.shutdown.clone();

        loop {
            let stop = *shutdown.borrow();
            if stop {
                info!(worker_id = %self.worker_id, "Shutdown requested");
                return Ok(());
            }

            match self.store.claim_next().await? {
                Some(record) => {
                    let outcome = task.run(record).await;
                    summary.record(&outcome);

                    let delay = self.pacing.next_delay();
                    debug!(delay_ms = delay.as_millis() as u64, "Pausing before next package");
                    pause(delay, &mut shutdown).await;
                }
                None => match self.mode {
                    RunMode::Drain => {
                        info!(worker_id = %self.worker_id, "No ready packages left");
                        return Ok(());
                    }
                    RunMode::Daemon => {
                        debug!(
                            poll_secs = self.idle_poll_interval.as_secs(),
                            "No ready packages, waiting"
                        );
                        pause(self.idle_poll_interval, &mut shutdown).await;
                    }
                },
            }
        }
    }
}

/// Sleep for `duration`, returning early if shutdown is signalled
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown_requested(shutdown) => {}
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let signalled = *shutdown.borrow_and_update();
        if signalled {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
