//! Maintenance Task
//!
//! Background task that periodically purges expired entries and restores the
//! size bound. It runs only while there is something to watch and stops by
//! itself once the cache goes idle.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

// == Maintenance Report ==
/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Entries removed because their TTL passed
    pub expired: usize,
    /// Entries evicted to restore the size bound
    pub evicted: usize,
    /// Entries left after the pass
    pub remaining: usize,
}

// == Maintained ==
/// Something the maintenance task can sweep.
pub(crate) trait Maintained: Send + Sync + 'static {
    /// Delay before the next pass.
    fn maintenance_interval(&self) -> Duration;

    /// Runs one pass. Returns the report and whether another pass is needed.
    ///
    /// When it returns false the implementor must already consider the task
    /// stopped, so that a later insertion can start a fresh one.
    fn maintenance_tick(&self) -> (MaintenanceReport, bool);
}

/// Spawns the maintenance loop on `runtime`.
///
/// The task only holds a weak reference, so it ends on its own once the
/// target is dropped. It also ends when `maintenance_tick` reports there is
/// nothing left to watch.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
pub(crate) fn spawn_maintenance_task<T: Maintained>(
    runtime: &Handle,
    target: Weak<T>,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        info!("Starting cache maintenance task");

        loop {
            let interval = match target.upgrade() {
                Some(target) => target.maintenance_interval(),
                None => break,
            };

            tokio::time::sleep(interval).await;

            let Some(target) = target.upgrade() else {
                break;
            };
            let (report, keep_running) = target.maintenance_tick();

            if report.expired > 0 || report.evicted > 0 {
                info!(
                    "Cache maintenance: expired {} entries, evicted {}, {} remain",
                    report.expired, report.evicted, report.remaining
                );
            } else {
                debug!("Cache maintenance: nothing to remove");
            }

            if !keep_running {
                info!("Cache idle, stopping maintenance task");
                return;
            }
        }

        debug!("Cache dropped, maintenance task exiting");
    })
}
