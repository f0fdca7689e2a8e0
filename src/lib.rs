use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod db;
pub mod functions;
pub mod image;
pub mod memory;
pub mod notifier;
pub mod processor;
pub mod rate_limit;
pub mod selector;
pub mod server;
pub mod telemetry;
pub mod video;
pub mod worker;

/// Error message stored on a job that was put back to pending after a rate limit.
pub const RATE_LIMIT_MESSAGE: &str = "RATE_LIMIT: Will retry automatically";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Image,
    Video,
}

impl JobType {
    pub fn table(self) -> &'static str {
        match self {
            JobType::Image => "image_generation_jobs",
            JobType::Video => "video_generation_jobs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Image => "image",
            JobType::Video => "video",
        }
    }

    /// Only video jobs are handed to an asynchronous provider and carry a `veo_uuid`.
    pub fn carries_provider_handle(self) -> bool {
        matches!(self, JobType::Video)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job status. Stored as the integer codes 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Processing => 1,
            Status::Completed => 2,
            Status::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown job status code {0}")]
pub struct StatusError(pub i32);

impl TryFrom<i32> for Status {
    type Error = StatusError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Status::Pending),
            1 => Ok(Status::Processing),
            2 => Ok(Status::Completed),
            3 => Ok(Status::Failed),
            other => Err(StatusError(other)),
        }
    }
}

/// One unit of generation work. Image and video jobs share this shape; the
/// columns that only exist on one of the tables are `None` for the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub session_id: String,
    pub user_id: Uuid,
    pub segment_id: Option<String>,
    pub segment_number: i32,
    pub segment_type: Option<String>,
    pub status: Status,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub visual_prompt: Option<String>,
    pub style: Option<String>,
    pub aspect_ratio: Option<String>,
    pub provider: Option<String>,
    pub image_url: Option<String>,
    pub veo_uuid: Option<String>,
    pub video_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Job {
    /// A fresh pending job with no payload, as the job-creation endpoint would insert it.
    pub fn new(job_type: JobType, user_id: Uuid, session_id: impl Into<String>, segment_number: i32) -> Self {
        Job {
            id: Uuid::new_v4(),
            job_type,
            session_id: session_id.into(),
            user_id,
            segment_id: None,
            segment_number,
            segment_type: None,
            status: Status::Pending,
            retry_count: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            visual_prompt: None,
            style: None,
            aspect_ratio: None,
            provider: None,
            image_url: None,
            veo_uuid: None,
            video_url: None,
            metadata: None,
        }
    }
}

/// Partial update of a job row. `None` leaves a column untouched; the nested
/// options on nullable columns allow clearing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<Status>,
    pub retry_count: Option<i32>,
    pub error_message: Option<Option<String>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub veo_uuid: Option<Option<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl JobPatch {
    pub fn status(status: Status) -> Self {
        JobPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Whether the patch touches a column that only video jobs have.
    pub fn touches_video_columns(&self) -> bool {
        self.video_url.is_some() || self.veo_uuid.is_some()
    }

    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(error_message) = &self.error_message {
            job.error_message = error_message.clone();
        }
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = Some(completed_at);
        }
        if let Some(image_url) = &self.image_url {
            job.image_url = Some(image_url.clone());
        }
        if let Some(video_url) = &self.video_url {
            job.video_url = Some(video_url.clone());
        }
        if let Some(veo_uuid) = &self.veo_uuid {
            job.veo_uuid = veo_uuid.clone();
        }
        if let Some(metadata) = &self.metadata {
            job.metadata = Some(metadata.clone());
        }
    }
}

/// A row for the `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

/// Cuts `text` down to at most `max` characters.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
