use anyhow::Error;
use clap::Parser;

use mediaq::config::{Config, Connection};
use mediaq::{server, telemetry};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span, instrument, Instrument};

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version)]
pub struct ConfigContext {
    #[arg(
        short = 'c',
        long = "database-url",
        env = "DATABASE_URL",
        help = "PostgreSQL Connection URL"
    )]
    database_url: String,

    #[arg(
        long = "supabase-url",
        env = "SUPABASE_URL",
        help = "Platform URL serving the generation functions"
    )]
    supabase_url: String,

    #[arg(
        long = "service-key",
        env = "SUPABASE_SERVICE_ROLE_KEY",
        hide_env_values = true,
        help = "Service key used to invoke the generation functions"
    )]
    service_key: String,

    #[arg(
        long = "jaeger-endpoint",
        env = "JAEGER_ENDPOINT",
        help = "Jaeger collector endpoint, tracing export is off when unset"
    )]
    jaeger_endpoint: Option<String>,

    #[arg(
        long = "poll-interval",
        env = "POLL_INTERVAL",
        help = "Seconds between scheduler cycles",
        default_value = "15"
    )]
    poll_interval: u64,

    #[arg(
        long = "max-retries",
        env = "MAX_RETRIES",
        help = "Failed attempts before a job is marked failed",
        default_value = "3"
    )]
    max_retries: i32,

    #[arg(
        long = "rate-limit-delay",
        env = "RATE_LIMIT_DELAY",
        help = "Seconds a job type is paused after a rate limit",
        default_value = "60"
    )]
    rate_limit_delay: u64,

    #[arg(
        long = "image-delay",
        env = "IMAGE_PROCESS_DELAY",
        help = "Seconds to wait after processing an image job",
        default_value = "5"
    )]
    image_delay: u64,

    #[arg(
        long = "video-delay",
        env = "VIDEO_PROCESS_DELAY",
        help = "Seconds to wait after processing a video job",
        default_value = "10"
    )]
    video_delay: u64,

    #[arg(
        long = "function-timeout",
        env = "FUNCTION_TIMEOUT",
        help = "Seconds before a generation call is abandoned",
        default_value = "120"
    )]
    function_timeout: u64,
}

impl ConfigContext {
    fn connection(&self) -> Connection {
        Connection {
            database_url: self.database_url.clone(),
            supabase_url: self.supabase_url.clone(),
            service_key: self.service_key.clone(),
        }
    }

    fn config(&self) -> Config {
        Config {
            poll_interval: Duration::from_secs(self.poll_interval),
            max_retries: self.max_retries,
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_delay),
            image_delay: Duration::from_secs(self.image_delay),
            video_delay: Duration::from_secs(self.video_delay),
            function_timeout: Duration::from_secs(self.function_timeout),
            ..Config::default()
        }
    }
}

#[instrument(skip(cancel_token, context))]
async fn setup(cancel_token: CancellationToken, context: ConfigContext) -> Result<(), Error> {
    let connection = context.connection();
    let config = context.config();

    server::serve(cancel_token, connection, config)
        .instrument(info_span!("server"))
        .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let context = ConfigContext::parse();

    telemetry::init(context.jaeger_endpoint.as_deref())?;

    let token = CancellationToken::new();

    let cloned_token = token.clone();
    let app = tokio::spawn(setup(cloned_token, context));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {println!("Received SIGTERM"); token.cancel()},
            _ = sigint.recv() => {println!("Received SIGINT"); token.cancel()},
        }
    });

    let result = app.await?;
    if let Err(err) = &result {
        error!("Error starting server: {:#}", err);
    }
    println!("Shutting down.");
    telemetry::shutdown();

    result?;
    Ok(())
}
