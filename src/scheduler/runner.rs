//! Snooze background loop.
//!
//! Runs start-up reconciliation, registers the periodic overdue check, then
//! dispatches fired timer names to the engine until shut down. Work is
//! handled one event at a time.

use crate::scheduler::engine::ReconciliationEngine;
use crate::scheduler::records::OccurrenceId;
use crate::store::StoreChange;
use crate::timer::TimerSpec;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timer name of the periodic overdue check.
pub const OVERDUE_CHECK_TIMER: &str = "overdueCheck";

/// Default overdue-check period (minutes).
pub const DEFAULT_OVERDUE_CHECK_MINUTES: u32 = 1;

/// Drives a [`ReconciliationEngine`] from timer events.
pub struct SnoozeRunner {
    engine: Arc<ReconciliationEngine>,
    fired_rx: mpsc::UnboundedReceiver<String>,
    overdue_check_minutes: u32,
    ready_tx: watch::Sender<bool>,
}

impl SnoozeRunner {
    /// `fired_rx` receives the names of timers the engine's facility fired.
    pub fn new(engine: Arc<ReconciliationEngine>, fired_rx: mpsc::UnboundedReceiver<String>) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            engine,
            fired_rx,
            overdue_check_minutes: DEFAULT_OVERDUE_CHECK_MINUTES,
            ready_tx,
        }
    }

    /// Override the overdue-check period. Values below 1 are treated as 1.
    pub fn with_overdue_check_minutes(mut self, minutes: u32) -> Self {
        self.overdue_check_minutes = minutes.max(1);
        self
    }

    /// Flips to `true` once start-up reconciliation has finished.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` is cancelled or the timer channel closes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut changes = self.engine.repository().store().subscribe();

        let report = self.engine.reconcile_all().await;
        if report.failures > 0 {
            warn!(failures = report.failures, "start-up reconciliation had failures");
        }
        self.engine.timers().create(
            OVERDUE_CHECK_TIMER,
            TimerSpec::Every {
                period_minutes: self.overdue_check_minutes,
            },
        );
        self.ready_tx.send_replace(true);
        info!(
            overdue_check_minutes = self.overdue_check_minutes,
            "snooze runner ready"
        );

        let mut changes_open = true;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("snooze runner shutdown requested");
                    break;
                }
                fired = self.fired_rx.recv() => match fired {
                    Some(name) => self.dispatch(&name).await,
                    None => {
                        debug!("timer channel closed, stopping");
                        break;
                    }
                },
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => log_change(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "store change notifications lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => changes_open = false,
                },
            }
        }

        self.engine.timers().cancel(OVERDUE_CHECK_TIMER);
        info!("snooze runner stopped");
    }

    /// Route one fired timer name.
    async fn dispatch(&self, name: &str) {
        if name == OVERDUE_CHECK_TIMER {
            self.engine.overdue_check().await;
        } else if let Some(id) = OccurrenceId::parse(name) {
            self.engine.handle_timer_fired(&id).await;
        } else {
            debug!(timer = name, "ignoring unknown timer");
        }
    }
}

// Notifications are advisory; the sweeps are what keep state correct.
fn log_change(change: &StoreChange) {
    match change {
        StoreChange::Set { id, .. } => debug!(record_id = %id, "store record set"),
        StoreChange::Removed { id } => debug!(record_id = %id, "store record removed"),
    }
}
