use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::services::auth_service::AuthService;
use crate::services::email_ingest::EmailPoller;

/// A unit of periodic background work.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn every(&self) -> Duration;

    async fn run(&self) -> Result<()>;
}

pub struct AuthCleanupJob {
    auth: Arc<dyn AuthService>,
    every: Duration,
}

impl AuthCleanupJob {
    #[must_use]
    pub fn new(auth: Arc<dyn AuthService>, every: Duration) -> Self {
        Self { auth, every }
    }
}

#[async_trait::async_trait]
impl Job for AuthCleanupJob {
    fn name(&self) -> &'static str {
        "auth_cleanup"
    }

    fn every(&self) -> Duration {
        self.every
    }

    async fn run(&self) -> Result<()> {
        let report = self.auth.cleanup_expired().await?;
        if report.sessions_removed > 0 || report.login_attempts_removed > 0 {
            info!(
                sessions = report.sessions_removed,
                login_attempts = report.login_attempts_removed,
                "Removed expired auth records"
            );
        }
        Ok(())
    }
}

pub struct EmailPollJob {
    poller: Arc<EmailPoller>,
    every: Duration,
}

impl EmailPollJob {
    #[must_use]
    pub fn new(poller: Arc<EmailPoller>, every: Duration) -> Self {
        Self { poller, every }
    }
}

#[async_trait::async_trait]
impl Job for EmailPollJob {
    fn name(&self) -> &'static str {
        "email_poll"
    }

    fn every(&self) -> Duration {
        self.every
    }

    async fn run(&self) -> Result<()> {
        self.poller.poll_once().await?;
        Ok(())
    }
}

async fn run_job(job: &dyn Job) -> Result<()> {
    let start = Instant::now();
    info!(event = "job_started", job_name = job.name(), "Starting scheduled job");

    let result = job.run().await;
    if let Err(e) = &result {
        error!(event = "job_failed", job_name = job.name(), error = %e, "Scheduled job failed");
    }

    info!(
        event = "job_finished",
        job_name = job.name(),
        duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Scheduled job finished"
    );
    result
}

/// Runs each job on its own ticker. A job never overlaps with itself.
pub struct Scheduler {
    jobs: Vec<Arc<dyn Job>>,
    running: Arc<RwLock<bool>>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            jobs: Vec::new(),
            running: Arc::new(RwLock::new(false)),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_job(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    #[must_use]
    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Scheduler already running");
            return;
        }
        *running = true;
        self.shutdown.send_replace(false);

        let mut handles = self.handles.lock().await;
        for job in &self.jobs {
            let job = Arc::clone(job);
            let mut stop = self.shutdown.subscribe();
            info!(job_name = job.name(), every_secs = job.every().as_secs(), "Scheduling job");

            handles.push(tokio::spawn(async move {
                let mut ticker = interval(job.every());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let _ = run_job(job.as_ref()).await;
                        }
                        _ = stop.changed() => break,
                    }
                }
            }));
        }
        info!(jobs = self.jobs.len(), "Background scheduler started");
    }

    /// Signals every job loop and waits for in-flight runs to finish.
    pub async fn stop(&self) {
        info!("Stopping scheduler...");
        *self.running.write().await = false;
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job loop ended abnormally");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Runs every job once, in registration order.
    pub async fn run_once(&self) -> Result<()> {
        for job in &self.jobs {
            run_job(job.as_ref()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Job for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn every(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Job for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn every(&self) -> Duration {
            Duration::from_secs(3600)
        }

        async fn run(&self) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn start_and_stop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new().with_job(Arc::new(Counting { runs: runs.clone() }));

        scheduler.start().await;
        assert!(scheduler.is_running().await);
        tokio::time::sleep(Duration::from_millis(70)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn run_once_surfaces_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let ok = Scheduler::new().with_job(Arc::new(Counting { runs: runs.clone() }));
        ok.run_once().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let failing = Scheduler::new().with_job(Arc::new(Failing));
        assert!(failing.run_once().await.is_err());
        assert_eq!(failing.job_names(), vec!["failing"]);
    }
}
