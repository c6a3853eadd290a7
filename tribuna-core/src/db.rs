use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Connect the shared Postgres pool. Durable rows (questions, chat history,
/// poll audit, session analytics) all go through this pool; each operation
/// takes a per-call lease that is released on every exit path.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to Postgres");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    info!("Postgres pool ready");
    Ok(pool)
}
