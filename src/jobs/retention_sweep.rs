//! Daily retention sweep
//!
//! Runs the retention policy over every stream under the recording root.
//! Streams are independent, so they are processed in parallel on the
//! blocking pool; within a stream the work stays sequential. Only one sweep
//! runs at a time per process: a trigger that fires while a sweep is still
//! in progress is skipped.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::services::record_tree;
use crate::services::retention::{self, RetentionPolicy, SweepSummary};

/// Runs retention sweeps, at most one at a time
pub struct RetentionSweeper {
    root: PathBuf,
    policy: RetentionPolicy,
    concurrency: usize,
    running: AtomicBool,
}

/// Clears the running flag when a sweep ends, even on early return
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionSweeper {
    pub fn new(root: impl Into<PathBuf>, policy: RetentionPolicy, concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            policy,
            concurrency: concurrency.max(1),
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep
    ///
    /// Returns `Ok(None)` when another sweep is already running. A missing or
    /// unusable root is an error; per-file failures are only counted.
    pub async fn run(&self) -> Result<Option<SweepSummary>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = "retention_sweep", "Previous sweep still running, skipping");
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        let started = Instant::now();
        info!(
            job = "retention_sweep",
            root = %self.root.display(),
            keep = self.policy.keep(),
            "Starting retention sweep"
        );

        let root = self.root.clone();
        let listing = tokio::task::spawn_blocking(move || record_tree::list_streams(&root))
            .await
            .context("stream listing task failed")??;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let now = SystemTime::now();
        let mut tasks = JoinSet::new();

        for stream in listing.streams {
            let permit = semaphore.clone().acquire_owned().await?;
            let policy = self.policy;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                retention::enforce_stream(&stream, &policy, now)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(job = "retention_sweep", error = %e, "Stream task failed"),
            }
        }

        let root = self.root.clone();
        let failures = listing.failures;
        let summary = tokio::task::spawn_blocking(move || retention::finish_sweep(&root, failures, outcomes))
            .await
            .context("sweep finalization task failed")?;

        for failure in &summary.failures {
            warn!(job = "retention_sweep", %failure, "Partial failure during sweep");
        }
        info!(
            job = "retention_sweep",
            streams = summary.streams,
            skipped_streams = summary.skipped_streams,
            deleted = summary.deleted,
            skipped_recent = summary.skipped_recent,
            removed_dirs = summary.removed_dirs,
            removed_streams = summary.removed_streams,
            removed_apps = summary.removed_apps,
            errors = summary.error_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Retention sweep completed"
        );

        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seed(root: &std::path::Path, app: &str, stream: &str, count: u32) {
        let dir = root.join(app).join(stream).join("2025-01-01");
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            fs::write(dir.join(format!("2025-01-01-00-{:02}-00-0.mp4", i)), b"x").unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweep_runs_streams_in_parallel() {
        let tmp = TempDir::new().unwrap();
        seed(tmp.path(), "live", "cam1", 5);
        seed(tmp.path(), "live", "cam2", 2);
        seed(tmp.path(), "rtp", "door", 4);

        let sweeper = RetentionSweeper::new(tmp.path(), RetentionPolicy::new(3).unwrap(), 2);
        let summary = sweeper.run().await.unwrap().unwrap();

        assert_eq!(summary.streams, 3);
        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.error_count(), 0);
        assert!(!sweeper.is_running());
    }

    #[tokio::test]
    async fn test_sweep_skips_when_already_running() {
        let tmp = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(tmp.path(), RetentionPolicy::new(3).unwrap(), 1);

        sweeper.running.store(true, Ordering::Release);
        assert!(sweeper.run().await.unwrap().is_none());

        sweeper.running.store(false, Ordering::Release);
        assert!(sweeper.run().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(tmp.path().join("gone"), RetentionPolicy::new(3).unwrap(), 1);
        assert!(sweeper.run().await.is_err());
        // The guard is released after a failed sweep
        assert!(!sweeper.is_running());
    }
}
