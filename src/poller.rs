use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::types::{GenerationJob, JobStatus, JobStatusUpdate};
use crate::api::JobApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, ErrorClass};

/// What a status update did to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Same status and progress as cached.
    Unchanged,
    /// Status or completed count moved.
    Updated,
    /// Job reached a terminal status and is no longer tracked.
    Finished,
}

/// A status update the board refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("job {job_id}: {completed} completed images exceeds total of {total}")]
    CompletedExceedsTotal { job_id: i64, completed: u32, total: u32 },

    #[error("job {job_id}: status cannot move from {from} to {to}")]
    Regression {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id}: completed images cannot drop from {from} to {to}")]
    CompletedDecreased { job_id: i64, from: u32, to: u32 },

    #[error("job {0} is not on the board")]
    UnknownJob(i64),
}

/// Counts for the dashboard summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
}

/// A page's local copy of its jobs plus the set still being polled.
#[derive(Debug, Default)]
pub struct JobBoard {
    jobs: Vec<GenerationJob>,
    tracked: BTreeSet<i64>,
    dirty: BTreeSet<i64>,
    reload_required: bool,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_jobs(jobs: Vec<GenerationJob>) -> Self {
        let mut board = Self::new();
        board.load(jobs);
        board
    }

    /// Replace the collection with a full load. Every non-terminal job is
    /// tracked; returns how many.
    pub fn load(&mut self, jobs: Vec<GenerationJob>) -> usize {
        self.tracked = jobs
            .iter()
            .filter(|j| !j.is_terminal())
            .map(|j| j.id)
            .collect();
        self.jobs = jobs;
        self.dirty.clear();
        self.reload_required = false;
        self.tracked.len()
    }

    pub fn jobs(&self) -> &[GenerationJob] {
        &self.jobs
    }

    pub fn job(&self, job_id: i64) -> Option<&GenerationJob> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn tracked(&self) -> Vec<i64> {
        self.tracked.iter().copied().collect()
    }

    pub fn is_tracking(&self) -> bool {
        !self.tracked.is_empty()
    }

    /// Still polling: jobs are unfinished or a reload is outstanding.
    pub fn needs_polling(&self) -> bool {
        self.is_tracking() || self.reload_required
    }

    /// A job finished since the last full load, so generated-image lists are
    /// stale.
    pub fn reload_required(&self) -> bool {
        self.reload_required
    }

    /// Ids changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn stats(&self) -> BoardStats {
        let mut stats = BoardStats {
            total: self.jobs.len(),
            ..Default::default()
        };
        for job in &self.jobs {
            match job.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed | JobStatus::Cancelled => stats.failed += 1,
                JobStatus::Pending | JobStatus::Processing => stats.in_progress += 1,
            }
        }
        stats
    }

    /// Merge a lightweight status response into the cached job. Only status
    /// and completed count change; everything else waits for a full load.
    pub fn apply_status(
        &mut self,
        job_id: i64,
        update: &JobStatusUpdate,
    ) -> Result<ApplyOutcome, ProgressError> {
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == job_id) else {
            self.tracked.remove(&job_id);
            return Err(ProgressError::UnknownJob(job_id));
        };

        let total = if job.total_images > 0 {
            job.total_images
        } else {
            update.total_images
        };
        if update.completed_images > total {
            return Err(ProgressError::CompletedExceedsTotal {
                job_id,
                completed: update.completed_images,
                total,
            });
        }

        // Terminal jobs are immutable; just make sure they are not polled.
        if job.status.is_terminal() {
            self.tracked.remove(&job_id);
            return Ok(ApplyOutcome::Unchanged);
        }

        if update.status.rank() < job.status.rank() {
            return Err(ProgressError::Regression {
                job_id,
                from: job.status,
                to: update.status,
            });
        }

        if update.status == job.status && update.completed_images < job.completed_images {
            return Err(ProgressError::CompletedDecreased {
                job_id,
                from: job.completed_images,
                to: update.completed_images,
            });
        }

        let changed =
            job.status != update.status || job.completed_images != update.completed_images;
        if changed {
            debug!(
                "Job {}: {} {}/{} -> {} {}/{}",
                job_id,
                job.status,
                job.completed_images,
                total,
                update.status,
                update.completed_images,
                total
            );
            job.status = update.status;
            job.completed_images = update.completed_images;
            if job.total_images == 0 {
                job.total_images = update.total_images;
            }
            self.dirty.insert(job_id);
        }

        if update.status.is_terminal() {
            self.tracked.remove(&job_id);
            self.reload_required = true;
            return Ok(ApplyOutcome::Finished);
        }

        Ok(if changed {
            ApplyOutcome::Updated
        } else {
            ApplyOutcome::Unchanged
        })
    }
}

/// Summary of one poll tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub requested: usize,
    pub updated: usize,
    pub finished: Vec<i64>,
    /// Requests that failed; those jobs stay tracked.
    pub failed: Vec<i64>,
    /// Updates the board rejected.
    pub rejected: Vec<i64>,
    pub reloaded: bool,
    /// The backend rejected the session; polling cannot continue.
    pub auth_lost: bool,
}

/// Why a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Nothing left to track.
    Idle,
    /// The owning view went away.
    BoardDropped,
    /// The session ended mid-poll.
    AuthLost,
}

fn lock(board: &Mutex<JobBoard>) -> MutexGuard<'_, JobBoard> {
    board.lock().unwrap_or_else(|e| e.into_inner())
}

/// Polls job status on a fixed interval until every tracked job is terminal.
///
/// The poller only holds a weak reference to the board, so once the owner
/// drops it any response still in flight is discarded.
pub struct JobPoller<A: ?Sized> {
    api: Arc<A>,
    board: Weak<Mutex<JobBoard>>,
    interval: Duration,
    reload_limit: u32,
}

impl<A: JobApi + ?Sized + 'static> JobPoller<A> {
    pub fn new(
        api: Arc<A>,
        board: &Arc<Mutex<JobBoard>>,
        interval: Duration,
        reload_limit: u32,
    ) -> Self {
        Self {
            api,
            board: Arc::downgrade(board),
            interval,
            reload_limit,
        }
    }

    fn with_board<R>(&self, f: impl FnOnce(&mut JobBoard) -> R) -> Option<R> {
        let board = self.board.upgrade()?;
        let mut guard = lock(&board);
        Some(f(&mut guard))
    }

    /// One round: a status request per tracked job, then a full reload if any
    /// job finished. Returns `None` if the board was dropped mid-tick.
    pub async fn tick(&self) -> Option<TickReport> {
        let ids = self.with_board(|b| b.tracked())?;
        let mut report = TickReport {
            requested: ids.len(),
            ..Default::default()
        };

        for job_id in ids {
            match self.api.job_status(job_id).await {
                Ok(update) => match self.with_board(|b| b.apply_status(job_id, &update))? {
                    Ok(ApplyOutcome::Finished) => {
                        info!("Job {} finished with status {}", job_id, update.status);
                        report.finished.push(job_id);
                    }
                    Ok(ApplyOutcome::Updated) => report.updated += 1,
                    Ok(ApplyOutcome::Unchanged) => {}
                    Err(e) => {
                        warn!("Rejected status update: {}", e);
                        report.rejected.push(job_id);
                    }
                },
                Err(e) if e.class() == ErrorClass::AuthFailure => {
                    warn!("Session lost while polling job {}", job_id);
                    report.failed.push(job_id);
                    report.auth_lost = true;
                    return Some(report);
                }
                Err(e) => {
                    warn!("Failed to poll job {}: {}", job_id, e);
                    report.failed.push(job_id);
                }
            }
        }

        // Reload only after this tick's updates are applied so a stale partial
        // update cannot overwrite the fresh collection.
        if self.with_board(|b| b.reload_required())? {
            match self.api.list_jobs(self.reload_limit).await {
                Ok(jobs) => {
                    let tracked = self.with_board(|b| b.load(jobs))?;
                    debug!("Reloaded jobs, {} still in progress", tracked);
                    report.reloaded = true;
                }
                Err(ClientError::Unauthorized) => {
                    report.auth_lost = true;
                }
                Err(e) => {
                    // Flag stays set; the next tick retries the reload.
                    warn!("Failed to reload jobs after completion: {}", e);
                }
            }
        }

        Some(report)
    }

    /// Tick every interval until nothing is tracked and no reload is
    /// outstanding. The first tick fires one interval after start.
    pub async fn run(self) -> PollExit {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        match self.with_board(|b| b.tracked().len()) {
            Some(count) => info!("Polling {} job(s) every {:?}", count, self.interval),
            None => return PollExit::BoardDropped,
        }

        loop {
            match self.with_board(|b| b.needs_polling()) {
                None => return PollExit::BoardDropped,
                Some(false) => {
                    info!("All jobs settled, polling stopped");
                    return PollExit::Idle;
                }
                Some(true) => {}
            }

            ticker.tick().await;

            match self.tick().await {
                None => return PollExit::BoardDropped,
                Some(report) if report.auth_lost => return PollExit::AuthLost,
                Some(_) => {}
            }
        }
    }

    pub fn spawn(self) -> PollerHandle {
        PollerHandle {
            handle: Some(tokio::spawn(self.run())),
        }
    }
}

/// A running poll loop. Dropping the handle cancels it.
pub struct PollerHandle {
    handle: Option<JoinHandle<PollExit>>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the loop to end. `None` if it was cancelled.
    pub async fn join(mut self) -> Option<PollExit> {
        let handle = self.handle.take()?;
        handle.await.ok()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owner of a job list view: loads jobs, polls the unfinished ones and stops
/// polling when dropped.
pub struct JobDashboard<A: ?Sized> {
    api: Arc<A>,
    board: Arc<Mutex<JobBoard>>,
    poller: Option<PollerHandle>,
    interval: Duration,
    limit: u32,
}

impl<A: JobApi + ?Sized + 'static> JobDashboard<A> {
    pub fn new(api: Arc<A>, interval: Duration, limit: u32) -> Self {
        Self {
            api,
            board: Arc::new(Mutex::new(JobBoard::new())),
            poller: None,
            interval,
            limit,
        }
    }

    pub fn from_config(api: Arc<A>, config: &ClientConfig) -> Self {
        Self::new(api, config.poll_interval(), config.jobs_page_limit)
    }

    /// Full load. Starts polling if the load brought in unfinished jobs and
    /// no poll loop is running.
    pub async fn refresh(&mut self) -> Result<usize, ClientError> {
        let jobs = self.api.list_jobs(self.limit).await?;
        let tracked = lock(&self.board).load(jobs);
        if tracked > 0 && !self.is_polling() {
            let poller = JobPoller::new(self.api.clone(), &self.board, self.interval, self.limit);
            self.poller = Some(poller.spawn());
        }
        Ok(tracked)
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    pub fn jobs(&self) -> Vec<GenerationJob> {
        lock(&self.board).jobs().to_vec()
    }

    pub fn job(&self, job_id: i64) -> Option<GenerationJob> {
        lock(&self.board).job(job_id).cloned()
    }

    pub fn stats(&self) -> BoardStats {
        lock(&self.board).stats()
    }

    pub fn take_dirty(&self) -> Vec<i64> {
        lock(&self.board).take_dirty()
    }

    /// Wait for the current poll loop, if any, to finish.
    pub async fn wait_idle(&mut self) -> Option<PollExit> {
        match self.poller.take() {
            Some(poller) => poller.join().await,
            None => Some(PollExit::Idle),
        }
    }

    pub fn stop_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.cancel();
        }
    }
}
