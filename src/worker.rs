use crate::config::Config;
use crate::db::JobStore;
use crate::functions::Functions;
use crate::image::ImageJobs;
use crate::processor::{Outcome, Processor, RetryPolicy};
use crate::rate_limit::RateLimiter;
use crate::video::VideoJobs;
use anyhow::Error;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Stopped,
    Running,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub image: Outcome,
    pub polled: usize,
    pub video: Outcome,
}

/// Single sequential worker: each cycle runs at most one image job, polls
/// in-flight videos, then runs at most one video job. It owns the rate
/// limiters of both job types, so independent schedulers share no state.
pub struct Scheduler {
    image: Processor<ImageJobs>,
    video: Processor<VideoJobs>,
    config: Config,
    state: State,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, functions: Arc<dyn Functions>, config: Config) -> Self {
        let retry = RetryPolicy::from(&config);
        Scheduler {
            image: Processor::new(
                ImageJobs,
                store.clone(),
                functions.clone(),
                RateLimiter::new(config.rate_limit_cooldown),
                retry,
            ),
            video: Processor::new(
                VideoJobs,
                store,
                functions,
                RateLimiter::new(config.rate_limit_cooldown),
                retry,
            ),
            config,
            state: State::Stopped,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn image(&mut self) -> &mut Processor<ImageJobs> {
        &mut self.image
    }

    pub fn video(&mut self) -> &mut Processor<VideoJobs> {
        &mut self.video
    }

    #[instrument(name = "scheduler.cycle", skip(self))]
    pub async fn cycle(&mut self) -> Result<CycleReport, Error> {
        let image = self.image.run_once().await?;
        if image == Outcome::Processed {
            sleep(self.config.image_delay).await;
        }

        let polled = self.video.poll_in_flight(self.config.poll_batch).await;

        let video = self.video.run_once().await?;
        if video == Outcome::Processed {
            sleep(self.config.video_delay).await;
        }

        let report = CycleReport {
            image,
            polled,
            video,
        };
        debug!(?report, "Cycle complete");
        Ok(report)
    }

    /// Runs cycles until `cancel_token` is cancelled. Cancellation is only
    /// observed between cycles; a cycle in progress always finishes.
    pub async fn run(&mut self, cancel_token: CancellationToken) {
        self.state = State::Running;
        info!(
            poll_interval = ?self.config.poll_interval,
            max_retries = self.config.max_retries,
            "Scheduler started"
        );

        while !cancel_token.is_cancelled() {
            if let Err(err) = self.cycle().await {
                error!(message = "Scheduler cycle error", error = ?err);
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Scheduler Cancelled");
                    break;
                },
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.state = State::Stopped;
        info!("Scheduler stopped.");
    }
}
