//! Background scheduling for periodic reconciliation runs.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, interval};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::services::Reconciler;

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: SchedulerConfig) -> Self {
        Self {
            reconciler,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Runs until [`stop`](Self::stop) is called. A failed run is logged and
    /// the schedule keeps going; the next run starts from the store state, so
    /// nothing is lost.
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        *self.running.write().await = true;
        info!("Starting background scheduler");

        if let Some(cron_expr) = &self.config.cron_expression {
            self.run_with_cron(cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let mut sched = JobScheduler::new().await?;

        let reconciler = Arc::clone(&self.reconciler);
        let running = Arc::clone(&self.running);

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let reconciler = Arc::clone(&reconciler);
            let running = Arc::clone(&running);
            Box::pin(async move {
                if !*running.read().await {
                    return;
                }
                if let Err(e) = reconciler.run_once().await {
                    error!("Scheduled reconciliation failed: {}", e);
                }
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;

        info!("Scheduler running with cron: {}", cron_expr);

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    async fn run_with_interval(&self) -> Result<()> {
        let interval_hours = self.config.reconcile_interval_hours;

        info!("Scheduler running every {} hours", interval_hours);

        // The first tick fires immediately, so a fresh daemon reconciles on
        // startup instead of waiting a full interval.
        let mut check_interval = interval(Duration::from_secs(u64::from(interval_hours) * 3600));

        loop {
            check_interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            info!("Running scheduled reconciliation...");
            if let Err(e) = self.reconciler.run_once().await {
                error!("Scheduled reconciliation failed: {}", e);
            }
        }

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping scheduler...");
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
