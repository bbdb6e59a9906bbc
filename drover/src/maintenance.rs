//! Retention of finished jobs.
//!
//! Succeeded jobs move to `Deleted` once they are older than
//! `delete-succeeded-jobs-after`; deleted jobs are removed for good after
//! `permanently-delete-deleted-jobs-after`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

use crate::config::WorkerServerSettings;
use crate::error::StorageError;
use crate::job::JobState;
use crate::storage::StorageProvider;
use crate::telemetry::sweep_span;

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepReport {
    /// Succeeded jobs moved to `Deleted`.
    pub moved_to_deleted: u64,
    /// Deleted jobs removed from storage.
    pub purged: u64,
}

pub struct RetentionSweeper {
    storage: Arc<dyn StorageProvider>,
    retain_succeeded: Duration,
    purge_deleted: Duration,
    interval: Duration,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl RetentionSweeper {
    pub fn new(settings: &WorkerServerSettings, storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            retain_succeeded: settings.retain_succeeded_jobs_for(),
            purge_deleted: settings.purge_deleted_jobs_after(),
            interval: settings.poll_interval(),
        }
    }

    /// Apply both retention rules as of `now`.
    ///
    /// Purging runs before the move so jobs deleted in this sweep are never
    /// purged by it.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StorageError> {
        let span = sweep_span(self.storage.name());
        async {
            let purged = self
                .storage
                .delete_by_state_before(JobState::Deleted, cutoff(now, self.purge_deleted))
                .await?;
            let moved_to_deleted = self
                .storage
                .move_by_state_before(
                    JobState::Succeeded,
                    JobState::Deleted,
                    cutoff(now, self.retain_succeeded),
                )
                .await?;

            let report = SweepReport {
                moved_to_deleted,
                purged,
            };
            if report != SweepReport::default() {
                info!(moved_to_deleted, purged, "retention sweep finished");
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Sweep every poll interval until `shutdown` turns true. Failed sweeps
    /// are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cutoff_subtracts_age() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let cut = cutoff(now, Duration::from_secs(36 * 3600));
        assert_eq!(cut, Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_cutoff_saturates_for_huge_ages() {
        let now = Utc::now();
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
