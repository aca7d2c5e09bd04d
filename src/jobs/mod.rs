//! Background job scheduling

pub mod retention_sweep;

use std::sync::Arc;

use chrono::FixedOffset;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

pub use retention_sweep::RetentionSweeper;

/// Initialize and start the job scheduler
///
/// `schedule` is a six-field cron expression (seconds first), evaluated in
/// `offset` so the default fires the retention sweep at local midnight.
pub async fn start_scheduler(
    sweeper: Arc<RetentionSweeper>,
    schedule: &str,
    offset: FixedOffset,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    scheduler.add(retention_job(sweeper, schedule, offset)?).await?;

    scheduler.start().await?;

    info!(schedule, %offset, "Job scheduler started");
    Ok(scheduler)
}

/// Cron job that runs one retention sweep per tick
pub fn retention_job(
    sweeper: Arc<RetentionSweeper>,
    schedule: &str,
    offset: FixedOffset,
) -> anyhow::Result<Job> {
    let job = Job::new_async_tz(schedule, offset, move |_uuid, _l| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            info!(job = "retention_sweep", "Running retention sweep");
            if let Err(e) = sweeper.run().await {
                tracing::error!(job = "retention_sweep", "Retention sweep error: {:#}", e);
            }
        })
    })?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RetentionPolicy;
    use chrono::NaiveTime;
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retention_job_fires_at_local_midnight() {
        let tmp = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(tmp.path(), RetentionPolicy::new(3).unwrap(), 1);
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();

        let mut scheduler = JobScheduler::new().await.unwrap();
        let job = retention_job(sweeper, "0 0 0 * * *", offset).unwrap();
        let id = scheduler.add(job).await.unwrap();

        let next = scheduler.next_tick_for_job(id).await.unwrap().unwrap();
        assert_eq!(next.with_timezone(&offset).time(), NaiveTime::MIN);
    }

    #[test]
    fn test_retention_job_rejects_bad_schedule() {
        let tmp = TempDir::new().unwrap();
        let sweeper = RetentionSweeper::new(tmp.path(), RetentionPolicy::new(3).unwrap(), 1);
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(retention_job(sweeper, "61 0 0 * * *", offset).is_err());
    }
}
