use crate::db::{JobFilter, Order};
use crate::functions::FunctionResponse;
use crate::processor::{Failure, Interpretation, JobKind, Processor};
use crate::{Job, JobPatch, JobType, Status};
use anyhow::Error;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub const FUNCTION_NAME: &str = "generate-videos";
pub const STATUS_FUNCTION_NAME: &str = "check-video-status";

/// Video jobs need their segment's image first and usually finish
/// asynchronously: the function hands back a provider handle that is polled
/// until the provider reports a result.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoJobs;

impl JobKind for VideoJobs {
    fn job_type(&self) -> JobType {
        JobType::Video
    }

    fn function_name(&self) -> &'static str {
        FUNCTION_NAME
    }

    fn dependency_ready(&self, job: &Job) -> bool {
        job.image_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    fn prepare_request(&self, job: &Job) -> Value {
        json!({
            "mode": "process_single",
            "session_id": job.session_id,
            "user_id": job.user_id,
            "job_id": job.id,
        })
    }

    fn interpret_result(&self, response: &FunctionResponse) -> Interpretation {
        if response.success {
            let job = response.data.as_ref().and_then(|data| data.get("job"));
            if let Some(handle) = non_empty(job, "veo_uuid") {
                return Interpretation::Submitted(handle.to_string());
            }
            if let Some(url) = non_empty(job, "video_url") {
                return Interpretation::Completed(JobPatch {
                    video_url: Some(url.to_string()),
                    ..Default::default()
                });
            }
        }
        Interpretation::Failed(Failure::classify(response.error_message()))
    }
}

fn non_empty<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a str> {
    value
        .and_then(|value| value.get(key))
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}

/// One entry of the status function's answer.
#[derive(Debug, Clone, Deserialize)]
struct ProviderStatus {
    uuid: String,
    status: i32,
    #[serde(default)]
    video_url: Option<String>,
}

impl Processor<VideoJobs> {
    /// Asks the provider about jobs already submitted. The status function
    /// updates the records itself; this only reports terminal results and
    /// checks whether their sessions are done. Errors are logged, never
    /// returned, and no job is mutated here. Returns how many handles were checked.
    #[instrument(name = "processor.poll_in_flight", skip(self))]
    pub async fn poll_in_flight(&self, batch: i64) -> usize {
        match self.check_in_flight(batch).await {
            Ok(checked) => checked,
            Err(err) => {
                error!(error = ?err, "Error checking video status");
                0
            }
        }
    }

    async fn check_in_flight(&self, batch: i64) -> Result<usize, Error> {
        let filter = JobFilter::with_status(Status::Processing)
            .with_provider_handle()
            .ordered_by(Order::StartedAsc);
        let jobs = self
            .store
            .select_candidates(JobType::Video, &filter, Some(batch))
            .await?;

        let mut handles: Vec<&str> = Vec::new();
        for handle in jobs.iter().filter_map(|job| job.veo_uuid.as_deref()) {
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }
        if handles.is_empty() {
            return Ok(0);
        }
        debug!(count = handles.len(), "Checking in-flight videos");

        let response = self
            .functions
            .invoke(
                STATUS_FUNCTION_NAME,
                json!({ "video_uuids": handles, "update_db": true }),
            )
            .await?;
        if !response.success {
            warn!("Video status check failed: {}", response.error_message());
            return Ok(handles.len());
        }

        let entries: &[Value] = match response.data.as_ref().and_then(|data| data.get("videos")) {
            Some(Value::Array(entries)) => entries.as_slice(),
            _ => &[],
        };

        let mut finished: Vec<(Uuid, &str)> = Vec::new();
        for entry in entries {
            let video = match ProviderStatus::deserialize(entry) {
                Ok(video) => video,
                Err(err) => {
                    warn!(error = %err, "Skipping unreadable video status: {}", entry);
                    continue;
                }
            };
            let short = video.uuid.chars().take(8).collect::<String>();
            match Status::try_from(video.status) {
                Ok(Status::Completed) if video.video_url.is_some() => {
                    info!(handle = %short, "Video completed");
                }
                Ok(Status::Completed) => warn!(handle = %short, "Video completed without a url"),
                Ok(Status::Failed) => warn!(handle = %short, "Video failed"),
                Ok(_) => {
                    debug!(handle = %short, "Video still processing");
                    continue;
                }
                Err(err) => {
                    warn!(handle = %short, error = %err, "Video status unknown");
                    continue;
                }
            }
            let owner = jobs
                .iter()
                .find(|job| job.veo_uuid.as_deref() == Some(video.uuid.as_str()));
            if let Some(job) = owner {
                let key = (job.user_id, job.session_id.as_str());
                if !finished.contains(&key) {
                    finished.push(key);
                }
            }
        }

        for (user_id, session_id) in finished {
            if let Err(err) = self
                .notifier
                .check_and_notify(user_id, session_id, JobType::Video)
                .await
            {
                warn!(session_id = %session_id, error = ?err, "Completion check failed");
            }
        }

        Ok(handles.len())
    }
}
