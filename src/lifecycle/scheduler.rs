//! Periodic prune and drain runs
//!
//! Both jobs share one task, so a slow prune delays the next drain instead
//! of overlapping with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::ledger::PruneJob;
use crate::observability::Metrics;
use crate::queue::QueueDrainJob;

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub prune_every: Duration,
    pub drain_every: Duration,
}

pub fn spawn(
    prune: Arc<PruneJob>,
    drain: Arc<QueueDrainJob>,
    metrics: Arc<Metrics>,
    schedule: Schedule,
) -> JoinHandle<()> {
    info!(
        prune_every = ?schedule.prune_every,
        drain_every = ?schedule.drain_every,
        "Starting sweep scheduler"
    );

    tokio::spawn(async move {
        let mut prune_tick = interval(schedule.prune_every);
        let mut drain_tick = interval(schedule.drain_every);
        prune_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = prune_tick.tick() => match prune.run(false).await {
                    Ok(report) => metrics.record_prune(&report),
                    Err(e) => {
                        metrics.job_failed();
                        error!(error = %e, "Scheduled prune run failed");
                    }
                },
                _ = drain_tick.tick() => match drain.run().await {
                    Ok(report) => metrics.record_drain(&report),
                    Err(e) => {
                        metrics.job_failed();
                        error!(error = %e, "Scheduled drain run failed");
                    }
                },
            }
        }
    })
}
