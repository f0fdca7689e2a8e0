use crate::{Job, JobPatch, JobType, Notification, Status};
use anyhow::{anyhow, Error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, QueryBuilder};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Narrative order within a session.
    #[default]
    SegmentAsc,
    /// Oldest claim first.
    StartedAsc,
}

/// Which rows `select_candidates` returns. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub status: Option<Status>,
    pub session_id: Option<String>,
    pub user_id: Option<Uuid>,
    /// Only rows whose `veo_uuid` is set.
    pub with_provider_handle: bool,
    pub order: Order,
}

impl JobFilter {
    pub fn with_status(status: Status) -> Self {
        JobFilter {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_provider_handle(mut self) -> Self {
        self.with_provider_handle = true;
        self
    }

    pub fn ordered_by(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |status| job.status == status)
            && self.session_id.as_ref().map_or(true, |session| &job.session_id == session)
            && self.user_id.map_or(true, |user| job.user_id == user)
            && (!self.with_provider_handle || job.veo_uuid.is_some())
    }
}

/// Data access used by the scheduler. Implementations must apply patches
/// partially and return the updated record.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn select_candidates(
        &self,
        job_type: JobType,
        filter: &JobFilter,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, Error>;

    /// Session of some job of this type that is currently processing.
    async fn select_active_session(&self, job_type: JobType) -> Result<Option<String>, Error>;

    async fn patch(&self, job_type: JobType, id: Uuid, patch: &JobPatch) -> Result<Job, Error>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), Error>;
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    session_id: String,
    user_id: Uuid,
    segment_id: Option<String>,
    segment_number: i32,
    segment_type: Option<String>,
    status: i32,
    retry_count: i32,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    visual_prompt: Option<String>,
    style: Option<String>,
    aspect_ratio: Option<String>,
    provider: Option<String>,
    image_url: Option<String>,
    veo_uuid: Option<String>,
    video_url: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl JobRow {
    fn into_job(self, job_type: JobType) -> Result<Job, Error> {
        Ok(Job {
            id: self.id,
            job_type,
            session_id: self.session_id,
            user_id: self.user_id,
            segment_id: self.segment_id,
            segment_number: self.segment_number,
            segment_type: self.segment_type,
            status: Status::try_from(self.status)?,
            retry_count: self.retry_count,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            visual_prompt: self.visual_prompt,
            style: self.style,
            aspect_ratio: self.aspect_ratio,
            provider: self.provider,
            image_url: self.image_url,
            veo_uuid: self.veo_uuid,
            video_url: self.video_url,
            metadata: self.metadata,
        })
    }
}

const SHARED_COLUMNS: &str = "id, session_id::text AS session_id, user_id, \
    segment_id::text AS segment_id, segment_number, segment_type, status, retry_count, \
    error_message, started_at, completed_at, aspect_ratio, image_url, metadata";

fn columns(job_type: JobType) -> String {
    let specific = match job_type {
        JobType::Image => {
            "visual_prompt, style, provider, NULL::text AS veo_uuid, NULL::text AS video_url"
        }
        JobType::Video => {
            "NULL::text AS visual_prompt, NULL::text AS style, NULL::text AS provider, veo_uuid, video_url"
        }
    };
    format!("{SHARED_COLUMNS}, {specific}")
}

#[derive(Clone)]
pub struct DbHandle {
    pool: Arc<PgPool>,
}

impl DbHandle {
    // #[instrument(name = "db.new")]
    pub async fn new(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

        (&pool).execute(include_str!("setup.sql")).await?;

        Ok(DbHandle {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl JobStore for DbHandle {
    async fn select_candidates(
        &self,
        job_type: JobType,
        filter: &JobFilter,
        limit: Option<i64>,
    ) -> Result<Vec<Job>, Error> {
        debug!(job_type = %job_type, ?filter, ?limit, "Selecting candidate jobs");
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query
            .push(columns(job_type))
            .push(" FROM ")
            .push(job_type.table())
            .push(" WHERE TRUE");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.code());
        }
        if let Some(session_id) = &filter.session_id {
            query.push(" AND session_id::text = ").push_bind(session_id.clone());
        }
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if filter.with_provider_handle {
            query.push(" AND veo_uuid IS NOT NULL");
        }
        query.push(match filter.order {
            Order::SegmentAsc => " ORDER BY segment_number ASC, created_at ASC",
            Order::StartedAsc => " ORDER BY started_at ASC NULLS LAST",
        });
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let rows: Vec<JobRow> = query.build_query_as().fetch_all(&*self.pool).await?;
        rows.into_iter().map(|row| row.into_job(job_type)).collect()
    }

    async fn select_active_session(&self, job_type: JobType) -> Result<Option<String>, Error> {
        let sql = format!(
            "SELECT session_id::text FROM {} \
            WHERE status = $1 \
            ORDER BY started_at ASC NULLS LAST \
            LIMIT 1",
            job_type.table()
        );
        Ok(sqlx::query_scalar(&sql)
            .bind(Status::Processing.code())
            .fetch_optional(&*self.pool)
            .await?)
    }

    // #[instrument(name = "db.patch", skip_all, fields(job_id = %id))]
    async fn patch(&self, job_type: JobType, id: Uuid, patch: &JobPatch) -> Result<Job, Error> {
        if job_type == JobType::Image && patch.touches_video_columns() {
            return Err(anyhow!("image job {} has no provider handle or video url", id));
        }

        let mut query = QueryBuilder::<Postgres>::new("UPDATE ");
        query.push(job_type.table()).push(" SET ");
        let mut set = query.separated(", ");
        if let Some(status) = patch.status {
            set.push("status = ").push_bind_unseparated(status.code());
        }
        if let Some(retry_count) = patch.retry_count {
            set.push("retry_count = ").push_bind_unseparated(retry_count);
        }
        if let Some(error_message) = &patch.error_message {
            set.push("error_message = ")
                .push_bind_unseparated(error_message.clone());
        }
        if let Some(started_at) = patch.started_at {
            set.push("started_at = ").push_bind_unseparated(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            set.push("completed_at = ").push_bind_unseparated(completed_at);
        }
        if let Some(image_url) = &patch.image_url {
            set.push("image_url = ").push_bind_unseparated(image_url.clone());
        }
        if let Some(video_url) = &patch.video_url {
            set.push("video_url = ").push_bind_unseparated(video_url.clone());
        }
        if let Some(veo_uuid) = &patch.veo_uuid {
            set.push("veo_uuid = ").push_bind_unseparated(veo_uuid.clone());
        }
        if let Some(metadata) = &patch.metadata {
            set.push("metadata = ").push_bind_unseparated(metadata.clone());
        }
        set.push("updated_at = now()");
        query
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(columns(job_type));

        let row: Option<JobRow> = query.build_query_as().fetch_optional(&*self.pool).await?;
        row.ok_or_else(|| anyhow!("{} job {} not found", job_type, id))?
            .into_job(job_type)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), Error> {
        debug!("Inserting notification {:?}", notification);
        sqlx::query(
            "INSERT INTO notifications \
            (user_id, title, message, type, data, read) \
            VALUES ($1, $2, $3, $4, $5, false)",
        )
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.kind)
        .bind(&notification.data)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_only_requested_rows() {
        let user = Uuid::new_v4();
        let mut job = Job::new(JobType::Video, user, "a", 1);
        job.status = Status::Processing;

        assert!(JobFilter::with_status(Status::Processing).matches(&job));
        assert!(!JobFilter::with_status(Status::Pending).matches(&job));
        assert!(!JobFilter::default().in_session("b").matches(&job));
        assert!(JobFilter::default().in_session("a").for_user(user).matches(&job));
        assert!(!JobFilter::default().with_provider_handle().matches(&job));

        job.veo_uuid = Some("handle".into());
        assert!(JobFilter::default().with_provider_handle().matches(&job));
    }

    #[test]
    fn image_columns_null_out_video_fields() {
        assert!(columns(JobType::Image).contains("NULL::text AS veo_uuid"));
        assert!(columns(JobType::Video).contains("NULL::text AS visual_prompt"));
    }
}
