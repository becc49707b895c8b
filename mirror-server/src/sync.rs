//! Background index sync task run by `serve`.

use mirror_index::{IndexHistory, IndexSyncer, SyncOutcome};
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Run sync passes every `interval_secs` until `shutdown` flips to true.
///
/// The first pass starts immediately. With `interval_secs == 0` only that
/// pass runs. A pass already in progress is finished before the task
/// returns.
pub async fn start_sync_task<H: IndexHistory>(
    syncer: IndexSyncer<H>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval_secs == 0 {
        info!("Index sync running once at startup");
        run_pass(&syncer).await;
        return;
    }

    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Index sync task running (every {} seconds)", interval_secs);

    loop {
        tokio::select! {
            _ = ticker.tick() => run_pass(&syncer).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Index sync task stopped");
}

async fn run_pass<H: IndexHistory>(syncer: &IndexSyncer<H>) {
    match syncer.sync_once().await {
        Ok(SyncOutcome::Completed(report)) => info!(
            applied = report.applied,
            already_applied = report.already_applied,
            deltas = report.deltas,
            last_commit = report.last_commit.as_deref().unwrap_or("-"),
            "Index sync pass finished"
        ),
        Ok(SyncOutcome::AlreadyRunning) => {}
        Err(e) => error!("Index sync failed: {}", e),
    }
}
