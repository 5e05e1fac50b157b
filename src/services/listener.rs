use anyhow::Result;
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::core::io::JobQueue;
use crate::core::state::JobStatus;
use crate::services::workflow::JobOrchestrator;

/// What the listener hands a job id to. Split out so the loop can be
/// exercised without a full pipeline.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process_job(&self, job_id: &str) -> Result<JobStatus>;
}

#[async_trait]
impl JobProcessor for JobOrchestrator {
    async fn process_job(&self, job_id: &str) -> Result<JobStatus> {
        JobOrchestrator::process_job(self, job_id).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The long poll returned nothing.
    Idle,
    /// A job ran to a terminal ledger state and its message was deleted.
    Processed { job_id: String, status: JobStatus },
    /// The message had no job id and was deleted unprocessed.
    Discarded,
}

/// Sequential poll loop: one message, one job, then the next message.
pub struct JobQueueListener {
    queue: Arc<dyn JobQueue>,
    processor: Arc<dyn JobProcessor>,
    error_backoff: Duration,
}

impl JobQueueListener {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<dyn JobProcessor>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            processor,
            error_backoff,
        }
    }

    /// Receives at most one message and handles it. The message is deleted
    /// only once the job has reached a terminal ledger state.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let message = match self.queue.receive().await? {
            Some(message) => message,
            None => return Ok(PollOutcome::Idle),
        };

        // The body is the job id verbatim; it is never normalized.
        let job_id = message.body;
        if job_id.is_empty() {
            warn!("Received a message with an empty body, deleting it.");
            self.queue.delete(&message.receipt_handle).await?;
            return Ok(PollOutcome::Discarded);
        }

        info!("Received job: {}", job_id);
        let status = self.processor.process_job(&job_id).await?;
        self.queue.delete(&message.receipt_handle).await?;
        info!("[{}] - Message deleted from queue.", job_id);
        Ok(PollOutcome::Processed { job_id, status })
    }

    /// Never returns; every failure is logged and followed by a backoff.
    pub async fn run(&self) {
        info!("Worker started. Polling for jobs...");
        loop {
            if let Err(e) = self.poll_once().await {
                error!("Error in main polling loop: {:#}", e);
                tokio::time::sleep(self.error_backoff).await;
            }
        }
    }
}
