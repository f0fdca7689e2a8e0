use crate::config::{Config, Connection};
use crate::db::DbHandle;
use crate::functions::FunctionClient;
use crate::worker::Scheduler;
use anyhow::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Connects the store and the generation functions, then runs the scheduler
/// until cancelled. Configuration problems are returned before anything runs.
pub async fn serve(
    cancel_token: CancellationToken,
    connection: Connection,
    config: Config,
) -> Result<(), Error> {
    connection.validate()?;
    config.validate()?;

    trace!("Connecting to db:{}", connection.database_url);
    let handle = DbHandle::new(&connection.database_url).await?;
    let functions = FunctionClient::new(
        &connection.functions_url(),
        &connection.service_key,
        config.function_timeout,
    )?;

    let mut scheduler = Scheduler::new(Arc::new(handle), Arc::new(functions), config);
    scheduler.run(cancel_token).await;

    info!("Server stopped.");

    Ok(())
}
