use crate::db::{JobFilter, JobStore};
use crate::{Job, JobType, Notification, Status};
use anyhow::Error;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub const NOTIFICATION_TYPE: &str = "generation_complete";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SessionSummary {
    pub fn from_jobs(jobs: &[Job]) -> Self {
        SessionSummary {
            total: jobs.len(),
            completed: jobs.iter().filter(|job| job.status == Status::Completed).count(),
            failed: jobs.iter().filter(|job| job.status == Status::Failed).count(),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.total - self.completed - self.failed
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.outstanding() == 0
    }
}

/// Emits a notification once every job of a session has reached a terminal state.
///
/// Nothing records that a session was already announced, so two terminal
/// transitions observed for the same finished session produce two
/// notifications. Only call this right after a job became terminal.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn JobStore>,
}

impl Notifier {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Notifier { store }
    }

    /// Returns the summary that was announced, if the session is done.
    #[instrument(skip(self), fields(job_type = %job_type))]
    pub async fn check_and_notify(
        &self,
        user_id: Uuid,
        session_id: &str,
        job_type: JobType,
    ) -> Result<Option<SessionSummary>, Error> {
        let filter = JobFilter::default().for_user(user_id).in_session(session_id);
        let jobs = self.store.select_candidates(job_type, &filter, None).await?;
        let summary = SessionSummary::from_jobs(&jobs);

        if !summary.is_done() {
            debug!(outstanding = summary.outstanding(), total = summary.total, "Session not done yet");
            return Ok(None);
        }

        let notification = build_notification(user_id, session_id, job_type, summary);
        self.store.insert_notification(&notification).await?;
        info!(
            user_id = %user_id,
            completed = summary.completed,
            failed = summary.failed,
            total = summary.total,
            "Sent notification: {}",
            notification.title
        );
        Ok(Some(summary))
    }
}

fn build_notification(
    user_id: Uuid,
    session_id: &str,
    job_type: JobType,
    summary: SessionSummary,
) -> Notification {
    let (title, noun) = match job_type {
        JobType::Image => ("Image Generation Complete", "images"),
        JobType::Video => ("Video Generation Complete", "videos"),
    };
    let mut message = format!("{}/{} {} ready", summary.completed, summary.total, noun);
    if summary.failed > 0 {
        message.push_str(&format!(" ({} failed)", summary.failed));
    }

    Notification {
        user_id,
        title: title.to_string(),
        message,
        kind: NOTIFICATION_TYPE.to_string(),
        data: json!({
            "session_id": session_id,
            "job_type": job_type,
            "total": summary.total,
            "completed": summary.completed,
            "failed": summary.failed,
        }),
    }
}
