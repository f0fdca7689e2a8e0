use crate::db::{JobFilter, JobStore};
use crate::{Job, JobType, Status};
use anyhow::Error;
use tracing::{debug, instrument};

/// Picks the next pending job of `job_type`.
///
/// A session with a job already processing keeps priority until it has no
/// pending segments left, so sessions finish in segment order before the
/// next session's first segment starts. Otherwise the lowest pending segment
/// across all sessions wins.
#[instrument(skip(store), fields(job_type = %job_type))]
pub async fn select_next(store: &dyn JobStore, job_type: JobType) -> Result<Option<Job>, Error> {
    let active_session = store.select_active_session(job_type).await?;
    let pending = JobFilter::with_status(Status::Pending);

    if let Some(session_id) = active_session {
        let filter = pending.clone().in_session(session_id.as_str());
        if let Some(job) = first(store, job_type, &filter).await? {
            debug!(session_id = %session_id, "Continuing active session");
            return Ok(Some(job));
        }
        debug!(session_id = %session_id, "Active session has no pending jobs");
    }

    first(store, job_type, &pending).await
}

async fn first(store: &dyn JobStore, job_type: JobType, filter: &JobFilter) -> Result<Option<Job>, Error> {
    Ok(store
        .select_candidates(job_type, filter, Some(1))
        .await?
        .into_iter()
        .next())
}
