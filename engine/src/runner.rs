//! Timer loops for the analysis and pruning passes.
//!
//! Both loops tick on a fixed period (first tick one period after start),
//! skip missed ticks instead of bursting, and exit as soon as the shared
//! cancellation token fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::analysis::AnalysisEngine;
use crate::pruning::Pruner;

pub fn spawn_analysis_loop(
    engine: Arc<AnalysisEngine>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_periodic("analysis", every, cancel, move || {
        let engine = Arc::clone(&engine);
        async move {
            engine.run_pass(Utc::now()).await;
        }
    })
}

pub fn spawn_pruning_loop(
    pruner: Arc<Pruner>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_periodic("pruning", every, cancel, move || {
        let pruner = Arc::clone(&pruner);
        async move {
            pruner.run_pass(Utc::now()).await;
        }
    })
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(task = name, every_ms = every.as_millis() as u64, "periodic task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // a pass in flight is abandoned on shutdown
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tick() => {}
                    }
                }
            }
        }

        info!(task = name, "periodic task stopped");
    })
}
