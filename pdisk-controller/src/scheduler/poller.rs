//! Job poller
//!
//! Runs the controller cycle: pause, reload settings, report liveness,
//! then claim and execute every queued volume job found in the store.
//! Jobs are handled one at a time, each in its own task so that a panic is
//! contained to that job.

use anyhow::{Context as AnyhowContext, Result};
use pdisk_core::domain::heartbeat::Heartbeat;
use pdisk_core::domain::job::{Job, JobTransition};
use pdisk_core::keys;
use pdisk_store::{KeyRange, Versioned, typed};
use std::future::Future;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::context::ControllerContext;
use crate::service::protocol::{self, Claimed};
use crate::service::volumes::{JobOutcome, VolumeHandler};

/// Tally of one poll iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Candidate jobs seen
    pub candidates: usize,
    /// Candidates another instance got first
    pub not_claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Job documents that could not be decoded
    pub undecodable: usize,
}

/// Job poller that continuously polls for and executes jobs
pub struct JobPoller {
    context: ControllerContext,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(context: ControllerContext) -> Self {
        Self { context }
    }

    /// Starts the polling loop
    ///
    /// Returns once `shutdown` completes. Shutdown only cuts the pause
    /// between iterations short; an iteration in progress always finishes.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting job poller (interval: {:?}, executor: {}, heartbeat: {})",
            self.context.config.poll_interval,
            self.context.config.executor_id,
            self.context.heartbeat.id()
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = time::sleep(self.context.config.poll_interval) => {}
            }

            if let Some(summary) = self.run_once().await {
                if summary.candidates > 0 || summary.undecodable > 0 {
                    info!(
                        "Cycle done: {} candidate(s), {} claimed elsewhere, {} succeeded, {} failed, {} undecodable",
                        summary.candidates,
                        summary.not_claimed,
                        summary.succeeded,
                        summary.failed,
                        summary.undecodable
                    );
                }
            }
        }

        info!("Shutting down job poller");
        self.context.heartbeat.beat(Heartbeat::stopped()).await;

        Ok(())
    }

    /// Performs one iteration, reporting iteration-level failures
    /// through an ERROR heartbeat
    pub async fn run_once(&self) -> Option<IterationSummary> {
        debug!("Polling for queued jobs");

        match self.run_iteration().await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Error during poll cycle: {:#}", e);
                self.context
                    .heartbeat
                    .beat(Heartbeat::error(format!("{:#}", e)))
                    .await;
                None
            }
        }
    }

    /// Performs a single poll cycle
    ///
    /// Returns `None` when the service settings are unusable; that case is
    /// already reported through the heartbeat.
    async fn run_iteration(&self) -> Result<Option<IterationSummary>> {
        let iteration = match self.context.refresh().await {
            Ok(iteration) => iteration,
            Err(e) => {
                warn!("Skipping cycle, configuration is unusable: {:#}", e);
                self.context
                    .heartbeat
                    .beat(Heartbeat::error(format!("{:#}", e)))
                    .await;
                return Ok(None);
            }
        };

        debug!("Disk service endpoint: {}", iteration.settings.endpoint);
        self.context.heartbeat.beat(Heartbeat::ok()).await;

        let summary = self.process_jobs(&iteration.handler).await?;
        Ok(Some(summary))
    }

    /// Claims and executes every candidate job
    async fn process_jobs(&self, handler: &VolumeHandler) -> Result<IterationSummary> {
        let (jobs, failures) =
            typed::query::<Job>(self.context.store.as_ref(), &KeyRange::prefix(keys::JOB_PREFIX))
                .await
                .context("Failed to list jobs")?;

        let mut summary = IterationSummary {
            undecodable: failures.len(),
            ..Default::default()
        };
        for failure in failures {
            warn!("Skipping undecodable job: {}", failure);
        }

        let candidates: Vec<_> = jobs
            .into_iter()
            .filter(|job| job.value.is_candidate())
            .collect();

        if candidates.is_empty() {
            debug!("No jobs available");
            return Ok(summary);
        }

        info!("Found {} candidate job(s)", candidates.len());
        summary.candidates = candidates.len();

        for candidate in candidates {
            let job = match protocol::claim_job(
                self.context.store.as_ref(),
                &candidate.id,
                &self.context.config.executor_id,
                &self.context.retry,
            )
            .await
            {
                Ok(Claimed(job)) => job,
                Err(reason) => {
                    debug!("Job {} not claimed: {}", candidate.id, reason);
                    summary.not_claimed += 1;
                    continue;
                }
            };

            info!("Claimed job {} ({})", job.id, job.value.action);
            let job_id = job.id.clone();

            match self.dispatch(handler, job).await {
                JobOutcome::Succeeded => summary.succeeded += 1,
                JobOutcome::Failed(reason) => {
                    debug!("Job {} ended as FAILED: {}", job_id, reason);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Runs a claimed job in its own task and waits for it
    ///
    /// Any error or panic leaving the handler ends the job as FAILED and is
    /// reported through an ERROR heartbeat.
    async fn dispatch(&self, handler: &VolumeHandler, job: Versioned<Job>) -> JobOutcome {
        let job_id = job.id.clone();
        let handler = handler.clone();

        let result = tokio::spawn(async move { handler.handle(&job).await }).await;

        let message = match result {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) => format!("{:#}", e),
            Err(e) if e.is_panic() => "job handler panicked".to_string(),
            Err(e) => format!("job handler did not complete: {}", e),
        };

        error!("Failed to execute job {}: {}", job_id, message);

        let mut report = format!("job {} failed: {}", job_id, message);
        if let Err(e) = protocol::update_job(
            self.context.store.as_ref(),
            &job_id,
            &JobTransition::fail(message.clone()),
            &self.context.retry,
        )
        .await
        {
            error!("Failed to mark job {} as FAILED: {}", job_id, e);
            report = format!("{}; could not mark it FAILED: {}", report, e);
        }

        self.context.heartbeat.beat(Heartbeat::error(report)).await;

        JobOutcome::Failed(message)
    }
}
