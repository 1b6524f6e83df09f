use sqlx::postgres::{PgPool, PgPoolOptions};
use std::env;
use std::time::Duration;
use tracing::info;

pub type DbPool = PgPool;

pub async fn establish_pool() -> Result<DbPool, sqlx::Error> {
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| sqlx::Error::Configuration("DATABASE_URL not set".into()))?;

    let pool = PgPoolOptions::new()
        .max_connections(
            env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        )
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool established");

    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("Migrations up to date");

    Ok(pool)
}
