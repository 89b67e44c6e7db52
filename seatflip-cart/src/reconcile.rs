use seatflip_core::{CartError, CartResult};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::controller::{CartController, RepairOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub in_sync: usize,
    pub rewritten: usize,
    pub expired: usize,
    /// Cached reservations with no durable record (failed produce inserts).
    pub orphaned: usize,
    pub failed: usize,
}

/// Periodically repairs every cached reservation from its durable record.
pub struct Reconciler {
    controller: CartController,
    interval: Duration,
}

impl Reconciler {
    pub fn new(controller: CartController, interval: Duration) -> Self {
        Self { controller, interval }
    }

    pub async fn run_once(&self) -> CartResult<ReconcileReport> {
        let ids = self.controller.reservation_ids().await?;
        let mut report = ReconcileReport {
            scanned: ids.len(),
            ..ReconcileReport::default()
        };

        for id in ids {
            match self.controller.repair(&id).await {
                Ok(RepairOutcome::InSync) => report.in_sync += 1,
                Ok(RepairOutcome::Rewritten) => report.rewritten += 1,
                Ok(RepairOutcome::Expired) => report.expired += 1,
                Err(CartError::ReservationNotFound(_)) => {
                    warn!(reservation_id = %id, "Cached reservation has no durable record");
                    report.orphaned += 1;
                }
                Err(e) => {
                    warn!(reservation_id = %id, error = %e, "Repair failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_seconds = self.interval.as_secs(), "Reconciler started");

            loop {
                ticker.tick().await;
                match self.run_once().await {
                    Ok(report) if report.rewritten + report.orphaned + report.failed > 0 => {
                        info!(?report, "Reconciliation pass found drift")
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Reconciliation pass aborted"),
                }
            }
        })
    }
}
