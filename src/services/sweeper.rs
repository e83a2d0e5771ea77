use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::JobStore;

/// Purges jobs whose age exceeds the retention threshold, whatever their status.
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    retention: Duration,
}

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub purged: usize,
    pub failed: usize,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Delete every job older than the retention threshold at `now`.
    /// A failure on one job is logged and the sweep moves on.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        tracing::info!(retention_days = self.retention.num_days(), "Starting retention sweep");
        let mut report = SweepReport::default();

        let ids = match self.store.list_job_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Retention sweep could not list jobs");
                report.failed += 1;
                return report;
            }
        };

        for id in ids {
            report.scanned += 1;

            let created_at = match self.store.load(id).await {
                Ok(job) => job.created_at,
                Err(load_err) => match self.store.dir_modified(id).await {
                    Ok(modified) => {
                        tracing::debug!(job_id = %id, error = %load_err, "Using directory time for unreadable job");
                        modified
                    }
                    Err(e) => {
                        tracing::error!(job_id = %id, error = %e, "Cannot determine job age");
                        report.failed += 1;
                        continue;
                    }
                },
            };

            let age = now - created_at;
            if age <= self.retention {
                continue;
            }

            match self.store.delete(id).await {
                Ok(()) => {
                    report.purged += 1;
                    metrics::counter!("retention_jobs_purged").increment(1);
                    tracing::info!(job_id = %id, age_days = age.num_days(), "Purged expired job");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(job_id = %id, error = %e, "Failed to purge expired job");
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            purged = report.purged,
            failed = report.failed,
            "Retention sweep complete"
        );
        report
    }

    /// Sweep once now and then every `period` until the handle is stopped.
    pub fn spawn(self: Arc<Self>, period: std::time::Duration) -> SweeperHandle {
        let (shutdown, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep(Utc::now()).await;
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Retention sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Owned handle to the periodic sweep task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the task and wait for it to exit. An in-progress sweep finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Retention sweeper task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobFile, JobRecord};
    use uuid::Uuid;

    async fn job_aged(store: &JobStore, now: DateTime<Utc>, age: Duration) -> Uuid {
        let id = Uuid::new_v4();
        let source_path = store.stage_file(id, "a.pdf", b"%PDF-1.4").await.unwrap();
        let files = vec![JobFile {
            name: "a.pdf".to_string(),
            size: 8,
            source_path,
        }];
        store
            .create(&JobRecord::new(id, files, now - age))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_sweep_purges_only_expired_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path()));
        let now = Utc::now();

        let fresh = job_aged(&store, now, Duration::days(1)).await;
        let stale = job_aged(&store, now, Duration::days(3)).await;

        let sweeper = RetentionSweeper::new(store.clone(), Duration::days(2));
        let report = sweeper.sweep(now).await;

        assert_eq!(report, SweepReport { scanned: 2, purged: 1, failed: 0 });
        assert_eq!(store.list_job_ids().await.unwrap(), vec![fresh]);
        assert!(!store.job_dir(stale).exists());
    }

    #[tokio::test]
    async fn test_sweep_ignores_status() {
        use crate::models::job::{ConversionOptions, OutputFormat};

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path()));
        let now = Utc::now();
        let id = job_aged(&store, now, Duration::days(5)).await;
        let options = ConversionOptions {
            format: OutputFormat::Png,
            density: 300,
            quality: None,
        };
        store.begin_processing(id, options, now - Duration::days(5)).await.unwrap();

        let report = RetentionSweeper::new(store.clone(), Duration::days(2)).sweep(now).await;
        assert_eq!(report.purged, 1);
    }

    #[tokio::test]
    async fn test_unreadable_job_falls_back_to_directory_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path()));
        let orphan = Uuid::new_v4();
        store.stage_file(orphan, "a.pdf", b"%PDF-1.4").await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), Duration::days(2));
        let report = sweeper.sweep(Utc::now()).await;
        assert_eq!(report.purged, 0, "a just-written directory is fresh");

        let report = sweeper.sweep(Utc::now() + Duration::days(3)).await;
        assert_eq!(report.purged, 1);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_runs_at_start_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JobStore::new(dir.path()));
        job_aged(&store, Utc::now(), Duration::days(10)).await;

        let sweeper = Arc::new(RetentionSweeper::new(store.clone(), Duration::days(2)));
        let handle = sweeper.spawn(std::time::Duration::from_secs(3600));

        let mut purged = false;
        for _ in 0..50 {
            if store.list_job_ids().await.unwrap().is_empty() {
                purged = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(purged, "startup sweep should purge the expired job");

        tokio::time::timeout(std::time::Duration::from_secs(5), handle.stop())
            .await
            .expect("sweeper should stop promptly");
    }
}
