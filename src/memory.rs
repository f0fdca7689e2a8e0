//! In-process [`JobStore`] for dry runs and tests.

use crate::db::{JobFilter, JobStore, Order};
use crate::{Job, JobPatch, JobType, Notification, Status};
use anyhow::{anyhow, Error};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, job: Job) -> Uuid {
        let id = job.id;
        self.state().jobs.push(job);
        id
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.state().jobs.iter().find(|job| job.id == id).cloned()
    }

    pub fn jobs(&self, job_type: JobType) -> Vec<Job> {
        self.state()
            .jobs
            .iter()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state().notifications.clone()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn select_candidates(
        &self,
        job_type: JobType,
        filter: &JobFilter,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, Error> {
        let mut jobs: Vec<Job> = self
            .state()
            .jobs
            .iter()
            .filter(|job| job.job_type == job_type && filter.matches(job))
            .cloned()
            .collect();
        match filter.order {
            Order::SegmentAsc => jobs.sort_by_key(|job| job.segment_number),
            Order::StartedAsc => jobs.sort_by_key(|job| (job.started_at.is_none(), job.started_at)),
        }
        if let Some(limit) = limit {
            jobs.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(jobs)
    }

    async fn select_active_session(&self, job_type: JobType) -> Result<Option<String>, Error> {
        let filter = JobFilter::with_status(Status::Processing).ordered_by(Order::StartedAsc);
        let active = self.select_candidates(job_type, &filter, Some(1)).await?;
        Ok(active.into_iter().next().map(|job| job.session_id))
    }

    async fn patch(&self, job_type: JobType, id: Uuid, patch: &JobPatch) -> Result<Job, Error> {
        if job_type == JobType::Image && patch.touches_video_columns() {
            return Err(anyhow!("image job {} has no provider handle or video url", id));
        }
        let mut state = self.state();
        let job = state
            .jobs
            .iter_mut()
            .find(|job| job.id == id && job.job_type == job_type)
            .ok_or_else(|| anyhow!("{} job {} not found", job_type, id))?;
        patch.apply(job);
        Ok(job.clone())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), Error> {
        self.state().notifications.push(notification.clone());
        Ok(())
    }
}
