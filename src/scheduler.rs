use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::life::LifeManager;

/// Fires the daily generation once per day at the configured local time.
pub struct DailyTimer {
    scheduler: JobScheduler,
    life: Arc<LifeManager>,
    job_id: Mutex<Option<Uuid>>,
}

impl DailyTimer {
    pub async fn new(life: Arc<LifeManager>) -> Result<Self> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            life,
            job_id: Mutex::new(None),
        })
    }

    pub async fn start(&self) -> Result<()> {
        let (hour, minute) = self.life.schedule_time().await;
        self.install(hour, minute).await?;
        self.scheduler.start().await?;
        tracing::info!("Daily schedule timer started ({hour:02}:{minute:02})");
        Ok(())
    }

    /// Replace the daily job after a schedule time change.
    pub async fn reschedule(&self, hour: u32, minute: u32) -> Result<()> {
        if let Some(id) = self.job_id.lock().await.take() {
            self.scheduler.remove(&id).await?;
        }
        self.install(hour, minute).await?;
        tracing::info!("Daily schedule timer moved to {hour:02}:{minute:02}");
        Ok(())
    }

    async fn install(&self, hour: u32, minute: u32) -> Result<()> {
        let life = self.life.clone();
        let expr = format!("0 {minute} {hour} * * *");
        let job = Job::new_async_tz(expr.as_str(), chrono::Local, move |_uuid, _lock| {
            let life = life.clone();
            Box::pin(async move {
                life.on_timer().await;
            })
        })?;
        let id = self.scheduler.add(job).await?;
        *self.job_id.lock().await = Some(id);
        Ok(())
    }
}
