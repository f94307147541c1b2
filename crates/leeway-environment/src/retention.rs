// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that purges expired requests.
//!
//! A request expires once its anchor timestamp (submission by default, or
//! finish time) is older than the retention window. For every expired
//! request the sweep:
//! 1. Removes its artifact files from the output directory
//! 2. Deletes the record
//!
//! A missing file is not an error. Any other failure is logged and counted,
//! and the sweep moves on to the next request.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leeway_core::{RetentionAnchor, SimulationRequest, SimulationStore};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Vars};
use crate::error::{Error, Result};

/// Configuration for the retention sweeper.
#[derive(Debug, Clone)]
pub struct RetentionSweeperConfig {
    /// Whether sweeping is enabled.
    pub enabled: bool,
    /// How often to sweep.
    pub poll_interval: Duration,
    /// Retention window.
    pub max_age: Duration,
    /// Timestamp the window is measured from.
    pub anchor: RetentionAnchor,
    /// Maximum requests loaded per batch.
    pub batch_size: i64,
}

impl Default for RetentionSweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(3600),
            max_age: Duration::from_secs(7 * 24 * 3600),
            anchor: RetentionAnchor::Submitted,
            batch_size: 100,
        }
    }
}

impl RetentionSweeperConfig {
    /// Load configuration from `LEEWAY_*` variables.
    ///
    /// - `LEEWAY_RETENTION_ENABLED` (default: true)
    /// - `LEEWAY_RETENTION_SWEEP_INTERVAL_SECS` (default: 3600)
    /// - `LEEWAY_SIMULATION_RETENTION`: days (default: 7)
    /// - `LEEWAY_RETENTION_ANCHOR`: `submitted` or `finished` (default: submitted)
    /// - `LEEWAY_RETENTION_BATCH_SIZE` (default: 100)
    pub fn from_vars(vars: &Vars) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        let days: u64 = vars.parse("SIMULATION_RETENTION", 7)?;
        Ok(Self {
            enabled: vars.bool("RETENTION_ENABLED", defaults.enabled)?,
            poll_interval: vars.secs(
                "RETENTION_SWEEP_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?,
            max_age: Duration::from_secs(days * 24 * 3600),
            anchor: vars.parse("RETENTION_ANCHOR", defaults.anchor)?,
            batch_size: vars.parse("RETENTION_BATCH_SIZE", defaults.batch_size)?.max(1),
        })
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired requests found.
    pub expired: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Artifact files removed.
    pub files_removed: usize,
    /// Artifact files that could not be removed.
    pub file_errors: usize,
    /// Records that could not be deleted.
    pub record_errors: usize,
}

/// Periodic retention sweeper.
pub struct RetentionSweeper {
    store: Arc<dyn SimulationStore>,
    output_dir: PathBuf,
    config: RetentionSweeperConfig,
    shutdown: Arc<Notify>,
}

impl RetentionSweeper {
    /// Create a sweeper that removes artifacts from `output_dir`.
    pub fn new(
        store: Arc<dyn SimulationStore>,
        output_dir: impl Into<PathBuf>,
        config: RetentionSweeperConfig,
    ) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Retention sweeper disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            retention_days = self.config.max_age.as_secs() / 86400,
            anchor = ?self.config.anchor,
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Retention sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }

    /// Delete every request that is past the retention window.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .map_err(|e| Error::Other(format!("Invalid retention window: {e}")))?;
        let cutoff = Utc::now() - max_age;
        let mut report = SweepReport::default();

        loop {
            let batch = self
                .store
                .list_expired(cutoff, self.config.anchor, self.config.batch_size)
                .await?;
            let batch_len = batch.len();
            report.expired += batch_len;
            let deleted_before = report.deleted;

            for sim in batch {
                self.purge(&sim, &mut report).await;
            }

            // Stop on a short batch, or when nothing in a full batch could be
            // deleted (it would be listed again).
            if (batch_len as i64) < self.config.batch_size || report.deleted == deleted_before {
                break;
            }
        }

        if report.expired == 0 {
            debug!("No expired simulations");
        } else {
            info!(
                expired = report.expired,
                deleted = report.deleted,
                files_removed = report.files_removed,
                file_errors = report.file_errors,
                record_errors = report.record_errors,
                "Retention sweep complete"
            );
        }
        Ok(report)
    }

    async fn purge(&self, sim: &SimulationRequest, report: &mut SweepReport) {
        // Stored references plus the names a run may have left without recording.
        let files: BTreeSet<String> = sim
            .artifacts()
            .map(str::to_string)
            .chain([sim.image_file_name(), sim.netcdf_file_name()])
            .collect();

        for name in files {
            let path = self.output_dir.join(&name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(uuid = %sim.uuid, file = %path.display(), "Removed artifact");
                    report.files_removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(uuid = %sim.uuid, file = %path.display(), error = %e, "Failed to remove artifact");
                    report.file_errors += 1;
                }
            }
        }

        match self.store.delete_simulation(sim.uuid).await {
            Ok(_) => report.deleted += 1,
            Err(e) => {
                error!(uuid = %sim.uuid, error = %e, "Failed to delete expired simulation");
                report.record_errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use leeway_core::{FinishedUpdate, NewSimulation, NewUser, SqliteStore};
    use sqlx::Executor;

    async fn store_with_user() -> (Arc<SqliteStore>, i64) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let user = store
            .create_user(NewUser {
                username: "sar".to_string(),
                email: "sar@example.org".to_string(),
                api_token: "token".to_string(),
            })
            .await
            .unwrap();
        (store, user.id)
    }

    async fn insert(store: &SqliteStore, user_id: i64, age_days: i64) -> SimulationRequest {
        let sim = store
            .insert_simulation(NewSimulation {
                user_id,
                longitude: 13.5,
                latitude: 54.25,
                start_time: Utc::now(),
                duration: 12,
                object_type: 27,
                radius: 1000,
            })
            .await
            .unwrap();
        let created = Utc::now() - ChronoDuration::days(age_days);
        sqlx::query("UPDATE simulations SET created_at = ? WHERE uuid = ?")
            .bind(created)
            .bind(sim.uuid.to_string())
            .execute(store.pool())
            .await
            .unwrap();
        sim
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_records_and_files() {
        let (store, user_id) = store_with_user().await;
        let dir = tempfile::tempdir().unwrap();

        let old = insert(&store, user_id, 10).await;
        let fresh = insert(&store, user_id, 1).await;

        store.mark_started(old.uuid, Utc::now()).await.unwrap();
        store
            .mark_finished(
                old.uuid,
                FinishedUpdate {
                    finished_at: Utc::now(),
                    img: Some(old.image_file_name()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        std::fs::write(dir.path().join(old.image_file_name()), b"png").unwrap();
        std::fs::write(dir.path().join(fresh.image_file_name()), b"png").unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), dir.path(), RetentionSweeperConfig::default());
        let report = sweeper.sweep().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.file_errors, 0);
        assert!(store.get_simulation(old.uuid).await.unwrap().is_none());
        assert!(store.get_simulation(fresh.uuid).await.unwrap().is_some());
        assert!(!dir.path().join(old.image_file_name()).exists());
        assert!(dir.path().join(fresh.image_file_name()).exists());
    }

    #[tokio::test]
    async fn test_sweep_works_through_batches() {
        let (store, user_id) = store_with_user().await;
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..5 {
            insert(&store, user_id, 30).await;
        }

        let config = RetentionSweeperConfig {
            batch_size: 2,
            ..Default::default()
        };
        let report = RetentionSweeper::new(store.clone(), dir.path(), config)
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.deleted, 5);
        assert!(store.list_simulations(10).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_errors_do_not_abort_sweep() {
        let (store, user_id) = store_with_user().await;
        let dir = tempfile::tempdir().unwrap();
        let sim = insert(&store, user_id, 30).await;

        // A directory where the image should be cannot be removed as a file.
        std::fs::create_dir(dir.path().join(sim.image_file_name())).unwrap();

        let report = RetentionSweeper::new(store.clone(), dir.path(), RetentionSweeperConfig::default())
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.file_errors, 1);
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_finished_anchor_keeps_recently_finished() {
        let (store, user_id) = store_with_user().await;
        let dir = tempfile::tempdir().unwrap();
        let sim = insert(&store, user_id, 10).await;
        store.mark_started(sim.uuid, Utc::now()).await.unwrap();
        store
            .mark_finished(
                sim.uuid,
                FinishedUpdate {
                    finished_at: Utc::now(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let config = RetentionSweeperConfig {
            anchor: RetentionAnchor::Finished,
            ..Default::default()
        };
        let report = RetentionSweeper::new(store.clone(), dir.path(), config)
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.expired, 0);

        store
            .pool()
            .execute("UPDATE simulations SET simulation_finished = '2000-01-01T00:00:00Z'")
            .await
            .unwrap();
        let config = RetentionSweeperConfig {
            anchor: RetentionAnchor::Finished,
            ..Default::default()
        };
        let report = RetentionSweeper::new(store.clone(), dir.path(), config)
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_config_from_vars() {
        let vars = Vars::from_pairs([
            ("LEEWAY_SIMULATION_RETENTION", "2"),
            ("LEEWAY_RETENTION_ANCHOR", "finished"),
        ]);
        let config = RetentionSweeperConfig::from_vars(&vars).unwrap();
        assert_eq!(config.max_age, Duration::from_secs(2 * 86400));
        assert_eq!(config.anchor, RetentionAnchor::Finished);
    }
}
