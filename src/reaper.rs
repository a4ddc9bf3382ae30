use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::workflow::ReservationWorkflow;

/// Background task that periodically drops approvals nobody came back for.
pub async fn run_reaper(workflow: Arc<ReservationWorkflow>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = workflow.sweep_abandoned().await;
        if swept > 0 {
            info!("reaped {swept} abandoned approvals");
        }
    }
}
