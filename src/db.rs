use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;

/// Build the Postgres pool from config. Returns `None` when no database URL
/// is configured (the service then falls back to the in-memory store).
pub async fn build_pool(
    config: &AppConfig,
) -> Result<Option<PgPool>, Box<dyn std::error::Error + Send + Sync>> {
    let Some(url) = config.database_url.as_deref() else {
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections)
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .connect(url)
        .await?;

    if config.db_run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    Ok(Some(pool))
}
