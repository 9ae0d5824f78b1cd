//! One-shot job scheduling.
//!
//! Each registered job gets its own firing task that sleeps until the
//! job's deadline and then runs the job exactly once. Failures are caught
//! at the firing boundary and logged; they never reach the caller of
//! [`OneShotScheduler::register`], who has long since returned.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{RwLock, watch},
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

pub type JobId = u64;

#[async_trait]
pub trait OneShotJob: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fired,
    Failed,
    Cancelled,
}

/// Opaque handle to a registered job, usable for cancellation and state
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    id: JobId,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("pending job registry is full (capacity {capacity})")]
    RegistryFull { capacity: usize },
    #[error("no pending job for handle {id}")]
    NotPending { id: JobId },
}

struct JobEntry {
    state: JobState,
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

struct CleanupTask(watch::Sender<()>);

type JobStore = RwLock<HashMap<JobId, JobEntry>>;

pub struct OneShotScheduler {
    jobs: Arc<JobStore>,
    next_id: AtomicU64,
    max_pending: usize,
    cleanup_task: CleanupTask,
}

impl OneShotScheduler {
    pub fn new(max_pending: usize) -> Self {
        let jobs = Arc::new(RwLock::new(HashMap::new()));
        let cleanup_task = Self::spawn_cleanup_task(Arc::clone(&jobs));

        Self {
            jobs,
            next_id: AtomicU64::new(1),
            max_pending,
            cleanup_task,
        }
    }

    /// Registers `job` to run once at or shortly after `fire_at`.
    ///
    /// Non-blocking: the firing task sleeps on its own, the caller does
    /// not wait for it. A `fire_at` already in the past fires immediately.
    /// The only synchronous failure is a full registry.
    pub async fn register(
        &self,
        fire_at: DateTime<Utc>,
        job: Arc<dyn OneShotJob>,
    ) -> Result<JobHandle, ScheduleError> {
        let mut jobs = self.jobs.write().await;

        let pending = jobs
            .values()
            .filter(|entry| entry.state == JobState::Pending)
            .count();
        if pending >= self.max_pending {
            return Err(ScheduleError::RegistryFull {
                capacity: self.max_pending,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        log::info!("Registering job {id} to fire at {fire_at}");

        let cancellation_token = CancellationToken::new();
        let task = Self::spawn_firing_task(
            Arc::clone(&self.jobs),
            id,
            fire_at,
            job,
            cancellation_token.child_token(),
        );

        // The firing task cannot touch the store before this guard drops,
        // so the entry is always in place by the time it fires.
        jobs.insert(
            id,
            JobEntry {
                state: JobState::Pending,
                cancellation_token,
                task,
            },
        );

        Ok(JobHandle { id })
    }

    /// Removes a pending job by handle. Other jobs are unaffected.
    pub async fn cancel(&self, handle: &JobHandle) -> Result<(), ScheduleError> {
        let jobs = self.jobs.read().await;
        match jobs.get(&handle.id) {
            Some(entry) if entry.state == JobState::Pending => {
                entry.cancellation_token.cancel();
                Ok(())
            }
            _ => Err(ScheduleError::NotPending { id: handle.id }),
        }
    }

    pub async fn state(&self, handle: &JobHandle) -> Option<JobState> {
        self.jobs.read().await.get(&handle.id).map(|entry| entry.state)
    }

    fn spawn_firing_task(
        jobs: Arc<JobStore>,
        id: JobId,
        fire_at: DateTime<Utc>,
        job: Arc<dyn OneShotJob>,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        task::spawn(async move {
            let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    log::info!("Job {id} was cancelled before firing");
                    Self::transition(&jobs, id, JobState::Cancelled).await;
                }
                _ = tokio::time::sleep(delay) => {
                    match job.run().await {
                        Ok(()) => {
                            log::info!("Job {id} fired");
                            Self::transition(&jobs, id, JobState::Fired).await;
                        }
                        Err(error) => {
                            log::error!("Job {id} failed at the firing boundary: {error:#}");
                            Self::transition(&jobs, id, JobState::Failed).await;
                        }
                    }
                }
            }
        })
    }

    async fn transition(jobs: &JobStore, id: JobId, state: JobState) {
        if let Some(entry) = jobs.write().await.get_mut(&id) {
            entry.state = state;
        }
    }

    fn spawn_cleanup_task(jobs: Arc<JobStore>) -> CleanupTask {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        task::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(300)) => {
                        Self::clean_finished_jobs(&jobs).await;
                    }
                    _ = shutdown_rx.changed() => {
                        log::info!("Cleanup task shutting down");
                        break;
                    }
                };
            }
        });

        CleanupTask(shutdown_tx)
    }

    async fn clean_finished_jobs(jobs: &JobStore) {
        let mut jobs = jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.task.is_finished());
        let after = jobs.len();

        if before != after {
            log::info!("Cleaned up {} finished jobs", before - after);
        }
    }
}

impl Drop for OneShotScheduler {
    fn drop(&mut self) {
        let _ = self.cleanup_task.0.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        fired: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OneShotJob for CountingJob {
        async fn run(&self) -> anyhow::Result<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingJob;

    #[async_trait]
    impl OneShotJob for FailingJob {
        async fn run(&self) -> anyhow::Result<()> {
            anyhow::bail!("delivery channel rejected the message")
        }
    }

    fn counting_job() -> (Arc<AtomicUsize>, Arc<dyn OneShotJob>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            fired: Arc::clone(&fired),
        });
        (fired, job)
    }

    fn in_seconds(seconds: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(seconds)
    }

    async fn wait_seconds(seconds: u64) {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn coincident_deadlines_each_fire_exactly_once() {
        let scheduler = OneShotScheduler::new(16);
        let fire_at = in_seconds(5);

        let mut counters = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let (fired, job) = counting_job();
            handles.push(scheduler.register(fire_at, job).await.unwrap());
            counters.push(fired);
        }

        wait_seconds(6).await;

        for fired in &counters {
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
        for handle in &handles {
            assert_eq!(scheduler.state(handle).await, Some(JobState::Fired));
        }

        // No second firing later on.
        wait_seconds(60).await;
        for fired in &counters {
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_do_not_fire_before_their_deadline() {
        let scheduler = OneShotScheduler::new(16);
        let (fired, job) = counting_job();

        let handle = scheduler.register(in_seconds(60), job).await.unwrap();

        wait_seconds(1).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state(&handle).await, Some(JobState::Pending));

        wait_seconds(61).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(&handle).await, Some(JobState::Fired));
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_job_does_not_block_other_jobs() {
        let scheduler = OneShotScheduler::new(16);

        let failing_handle = scheduler
            .register(in_seconds(5), Arc::new(FailingJob))
            .await
            .unwrap();
        let (fired, job) = counting_job();
        let counting_handle = scheduler.register(in_seconds(10), job).await.unwrap();

        wait_seconds(12).await;

        assert_eq!(
            scheduler.state(&failing_handle).await,
            Some(JobState::Failed)
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.state(&counting_handle).await,
            Some(JobState::Fired)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let scheduler = OneShotScheduler::new(16);
        let (fired, job) = counting_job();

        let handle = scheduler.register(in_seconds(-60), job).await.unwrap();

        wait_seconds(1).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(&handle).await, Some(JobState::Fired));
    }

    #[tokio::test(start_paused = true)]
    async fn full_registry_rejects_registration() {
        let scheduler = OneShotScheduler::new(1);
        let (_fired, job) = counting_job();
        scheduler.register(in_seconds(60), job).await.unwrap();

        let (_fired, job) = counting_job();
        let error = scheduler.register(in_seconds(60), job).await.unwrap_err();

        assert!(matches!(
            error,
            ScheduleError::RegistryFull { capacity: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fired_jobs_free_registry_capacity() {
        let scheduler = OneShotScheduler::new(1);
        let (_fired, job) = counting_job();
        scheduler.register(in_seconds(5), job).await.unwrap();

        wait_seconds(6).await;

        let (_fired, job) = counting_job();
        assert!(scheduler.register(in_seconds(5), job).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_fires_and_leaves_others_intact() {
        let scheduler = OneShotScheduler::new(16);
        let (cancelled_fired, job) = counting_job();
        let cancelled_handle = scheduler.register(in_seconds(30), job).await.unwrap();
        let (other_fired, job) = counting_job();
        let other_handle = scheduler.register(in_seconds(30), job).await.unwrap();

        scheduler.cancel(&cancelled_handle).await.unwrap();

        wait_seconds(40).await;

        assert_eq!(cancelled_fired.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler.state(&cancelled_handle).await,
            Some(JobState::Cancelled)
        );
        assert_eq!(other_fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(&other_handle).await, Some(JobState::Fired));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_fired_job_is_an_error() {
        let scheduler = OneShotScheduler::new(16);
        let (_fired, job) = counting_job();
        let handle = scheduler.register(in_seconds(5), job).await.unwrap();

        wait_seconds(6).await;

        let error = scheduler.cancel(&handle).await.unwrap_err();
        assert!(matches!(error, ScheduleError::NotPending { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_registrations_do_not_drop_jobs() {
        let scheduler = Arc::new(OneShotScheduler::new(128));
        let fire_at = in_seconds(5);

        let fired = Arc::new(AtomicUsize::new(0));
        let mut registrations = Vec::new();
        for _ in 0..64 {
            let scheduler = Arc::clone(&scheduler);
            let job = Arc::new(CountingJob {
                fired: Arc::clone(&fired),
            });
            registrations.push(task::spawn(async move {
                scheduler.register(fire_at, job).await.unwrap()
            }));
        }
        for registration in registrations {
            registration.await.unwrap();
        }

        wait_seconds(6).await;

        assert_eq!(fired.load(Ordering::SeqCst), 64);
    }
}
