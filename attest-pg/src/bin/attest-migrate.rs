//! Apply the Attest schema to the database named by `ATTEST_DB_*`.

use attest_core::CoreResult;
use attest_pg::{migrate, DbConfig, DbResultExt};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> CoreResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = DbConfig::from_env();
    tracing::info!(host = %config.host, dbname = %config.dbname, "Migrating database");

    let pool = config.create_pool()?;
    let mut client = pool.get().await.db_context("migrate")?;
    let applied = migrate(&mut client).await?;

    tracing::info!(statements = applied, "Migration complete");
    Ok(())
}
