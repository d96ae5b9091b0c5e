//! Background scheduling: periodic reachability checks that trigger sync
//! passes, plus on-demand requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use loantrack_common::{Error, Result};

use crate::engine::{SyncEngine, SyncOutcome};
use crate::probe::ConnectivityMonitor;

/// Requests accepted by the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Run a pass now, regardless of the timer.
    SyncNow,
    /// Stop the background task.
    Shutdown,
}

type Responder = oneshot::Sender<Result<SyncOutcome>>;

/// Handle to a running periodic-check task.
pub struct SyncScheduler {
    request_tx: mpsc::Sender<(SyncRequest, Option<Responder>)>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the background task. Every `period` it checks reachability
    /// and, when reachable, runs exactly one sync pass.
    ///
    /// The first check happens one period after start.
    pub fn start_periodic_check(
        engine: Arc<SyncEngine>,
        monitor: ConnectivityMonitor,
        period: Duration,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(16);
        let task = tokio::spawn(run_loop(engine, monitor, period, request_rx));
        Self { request_tx, task }
    }

    /// Ask the task to run a pass now and wait for its outcome.
    pub async fn sync_now(&self) -> Result<SyncOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((SyncRequest::SyncNow, Some(response_tx)))
            .await
            .map_err(|_| Error::Internal("Sync scheduler is not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Internal("Failed to receive sync result".to_string()))?
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to exit. A pass in progress finishes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.request_tx.send((SyncRequest::Shutdown, None)).await;
        if let Err(e) = self.task.await {
            error!("Sync scheduler task failed: {}", e);
        }
    }
}

/// One timer tick: probe, then sync if reachable.
///
/// Returns `None` when the network was unreachable and nothing ran.
pub async fn run_tick(
    engine: &SyncEngine,
    monitor: &ConnectivityMonitor,
) -> Option<Result<SyncOutcome>> {
    if !monitor.check_reachability().await {
        debug!("Offline, skipping periodic sync");
        return None;
    }
    Some(engine.sync_now().await)
}

async fn run_loop(
    engine: Arc<SyncEngine>,
    monitor: ConnectivityMonitor,
    period: Duration,
    mut request_rx: mpsc::Receiver<(SyncRequest, Option<Responder>)>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Sync scheduler started, checking every {:?}", period);

    loop {
        tokio::select! {
            request = request_rx.recv() => {
                match request {
                    Some((SyncRequest::SyncNow, responder)) => {
                        debug!("Processing manual sync request");
                        let result = engine.sync_now().await;
                        if let Some(responder) = responder {
                            let _ = responder.send(result);
                        }
                    }
                    Some((SyncRequest::Shutdown, _)) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                match run_tick(&engine, &monitor).await {
                    Some(Ok(SyncOutcome::Completed(report))) => {
                        debug!(
                            "Periodic sync: {} uploaded, {} failed",
                            report.uploaded(),
                            report.failed()
                        );
                    }
                    Some(Ok(SyncOutcome::Skipped)) => {
                        debug!("Periodic sync skipped, pass already running");
                    }
                    Some(Err(e)) => error!("Periodic sync failed: {}", e),
                    None => {}
                }
            }
        }
    }
}
