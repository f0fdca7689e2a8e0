use crate::config::Config;
use crate::db::JobStore;
use crate::functions::{FunctionResponse, Functions};
use crate::notifier::Notifier;
use crate::rate_limit::RateLimiter;
use crate::selector;
use crate::{truncate, Job, JobPatch, JobType, Status, RATE_LIMIT_MESSAGE};
use anyhow::Error;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What one processor invocation achieved. The scheduler only paces itself
/// after `Processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Idle,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    RateLimited(String),
    Retryable(String),
}

impl Failure {
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit(&message) {
            Failure::RateLimited(message)
        } else {
            Failure::Retryable(message)
        }
    }
}

pub fn is_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("rate_limit")
}

/// How a generation function answer is read by a job kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    /// Finished; the patch carries the produced asset.
    Completed(JobPatch),
    /// Accepted by an asynchronous provider under this handle.
    Submitted(String),
    Failed(Failure),
}

/// The type-specific part of running a job.
pub trait JobKind: Send + Sync {
    fn job_type(&self) -> JobType;

    fn function_name(&self) -> &'static str;

    /// Whether the job's inputs exist yet. Jobs that are not ready are left alone.
    fn dependency_ready(&self, _job: &Job) -> bool {
        true
    }

    fn prepare_request(&self, job: &Job) -> Value;

    fn interpret_result(&self, response: &FunctionResponse) -> Interpretation;
}

/// Retry budget and error text limits applied on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub retry_error_limit: usize,
    pub terminal_error_limit: usize,
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            retry_error_limit: config.retry_error_limit,
            terminal_error_limit: config.terminal_error_limit,
        }
    }
}

/// Drives one job at a time of kind `K` through
/// PENDING -> PROCESSING -> COMPLETED / FAILED.
pub struct Processor<K> {
    pub(crate) kind: K,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) functions: Arc<dyn Functions>,
    pub(crate) notifier: Notifier,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl<K: JobKind> Processor<K> {
    pub fn new(
        kind: K,
        store: Arc<dyn JobStore>,
        functions: Arc<dyn Functions>,
        limiter: RateLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Processor {
            kind,
            notifier: Notifier::new(store.clone()),
            store,
            functions,
            limiter,
            retry,
        }
    }

    pub fn limiter(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// Claims and runs the next job, if the type is not cooling down and one is ready.
    #[instrument(name = "processor.run_once", skip(self), fields(job_type = %self.kind.job_type()))]
    pub async fn run_once(&mut self) -> Result<Outcome, Error> {
        let job_type = self.kind.job_type();
        if self.limiter.is_blocked() {
            debug!("Rate limited, skipping");
            return Ok(Outcome::Idle);
        }

        let Some(job) = selector::select_next(&*self.store, job_type).await? else {
            return Ok(Outcome::Idle);
        };

        if !self.kind.dependency_ready(&job) {
            info!(job_id = %job.id, segment = job.segment_number, "Job waiting for its dependency");
            return Ok(Outcome::Idle);
        }

        info!(
            job_id = %job.id,
            session_id = %job.session_id,
            segment = job.segment_number,
            "Processing job"
        );

        let mut claim = JobPatch::status(Status::Processing);
        if job.started_at.is_none() {
            claim.started_at = Some(Utc::now());
        }
        let job = self.store.patch(job_type, job.id, &claim).await?;

        let result = self.settle(&job).await;
        if let Err(err) = &result {
            warn!(
                job_id = %job.id,
                session_id = %job.session_id,
                error = ?err,
                "Job stranded in processing"
            );
        }
        result
    }

    /// Runs a claimed job and records what became of it.
    async fn settle(&mut self, job: &Job) -> Result<Outcome, Error> {
        let job_type = self.kind.job_type();
        let request = self.kind.prepare_request(job);
        let interpretation = match self.functions.invoke(self.kind.function_name(), request).await {
            Ok(response) => self.kind.interpret_result(&response),
            Err(err) => Interpretation::Failed(Failure::classify(format!("{err:#}"))),
        };

        match interpretation {
            Interpretation::Completed(patch) => self.complete(job, patch).await,
            Interpretation::Submitted(handle) => {
                let patch = JobPatch {
                    veo_uuid: Some(Some(handle.clone())),
                    ..Default::default()
                };
                self.store.patch(job_type, job.id, &patch).await?;
                info!(job_id = %job.id, handle = %handle, "Job submitted to provider");
                Ok(Outcome::Processed)
            }
            Interpretation::Failed(Failure::RateLimited(message)) => {
                self.rate_limited(job, &message).await
            }
            Interpretation::Failed(Failure::Retryable(message)) => self.fail(job, &message).await,
        }
    }

    async fn complete(&self, job: &Job, mut patch: JobPatch) -> Result<Outcome, Error> {
        patch.status = Some(Status::Completed);
        patch.completed_at = Some(Utc::now());
        self.store.patch(self.kind.job_type(), job.id, &patch).await?;
        info!(job_id = %job.id, segment = job.segment_number, "Job completed");

        self.notify(job).await;
        Ok(Outcome::Processed)
    }

    async fn rate_limited(&mut self, job: &Job, message: &str) -> Result<Outcome, Error> {
        warn!(
            job_id = %job.id,
            cooldown = ?self.limiter.cooldown(),
            "Rate limited: {}",
            truncate(message, 200)
        );
        self.limiter.trip();

        let mut patch = JobPatch {
            retry_count: Some(job.retry_count + 1),
            error_message: Some(Some(RATE_LIMIT_MESSAGE.to_string())),
            ..JobPatch::status(Status::Pending)
        };
        if self.kind.job_type().carries_provider_handle() {
            patch.veo_uuid = Some(None);
        }
        self.store.patch(self.kind.job_type(), job.id, &patch).await?;
        Ok(Outcome::Idle)
    }

    async fn fail(&self, job: &Job, message: &str) -> Result<Outcome, Error> {
        let retry_count = job.retry_count + 1;
        let patch = if retry_count < self.retry.max_retries {
            warn!(
                job_id = %job.id,
                attempt = retry_count,
                max_retries = self.retry.max_retries,
                "Job failed: {}",
                truncate(message, 100)
            );
            let mut patch = JobPatch {
                retry_count: Some(retry_count),
                error_message: Some(Some(format!(
                    "Retry {}: {}",
                    retry_count,
                    truncate(message, self.retry.retry_error_limit)
                ))),
                ..JobPatch::status(Status::Pending)
            };
            if self.kind.job_type().carries_provider_handle() {
                patch.veo_uuid = Some(None);
            }
            patch
        } else {
            error!(job_id = %job.id, "Job failed permanently: {}", truncate(message, 200));
            JobPatch {
                retry_count: Some(retry_count),
                error_message: Some(Some(truncate(message, self.retry.terminal_error_limit))),
                completed_at: Some(Utc::now()),
                ..JobPatch::status(Status::Failed)
            }
        };
        self.store.patch(self.kind.job_type(), job.id, &patch).await?;

        self.notify(job).await;
        Ok(Outcome::Processed)
    }

    async fn notify(&self, job: &Job) {
        if let Err(err) = self
            .notifier
            .check_and_notify(job.user_id, &job.session_id, self.kind.job_type())
            .await
        {
            warn!(job_id = %job.id, error = ?err, "Completion check failed");
        }
    }
}
