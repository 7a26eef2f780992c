//! Embedded schema and migration.

use crate::error::DbResultExt;
use attest_core::CoreResult;
use deadpool_postgres::Client;

const SCHEMA: &str = include_str!("schema.sql");

/// The statements of the embedded schema, comments stripped.
pub fn statements() -> impl Iterator<Item = String> {
    SCHEMA.split(';').filter_map(|chunk| {
        let statement = chunk
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        (!statement.is_empty()).then(|| statement.to_string())
    })
}

/// Apply the schema in one transaction. Safe to run repeatedly.
pub async fn migrate(client: &mut Client) -> CoreResult<usize> {
    let tx = client.transaction().await.db_context("migrate")?;
    let mut applied = 0;
    for statement in statements() {
        tx.batch_execute(&statement).await.db_context("migrate")?;
        applied += 1;
    }
    tx.commit().await.db_context("migrate")?;
    tracing::info!(statements = applied, "Schema applied");
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_split_and_stripped() {
        let statements: Vec<String> = statements().collect();
        assert!(statements.iter().all(|s| !s.starts_with("--") && !s.contains(';')));
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS organizations"));

        let tables = statements
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .count();
        assert_eq!(tables, 12);
    }

    #[test]
    fn test_every_table_is_tenant_scoped() {
        for statement in statements().filter(|s| s.starts_with("CREATE TABLE")) {
            assert!(statement.contains("tenant_id BYTEA NOT NULL"), "{}", statement);
        }
    }
}
