use sqlx::SqlitePool;

use crate::error::Result;

/// Create the local schema. Safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            last_updated INTEGER NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row table; id is pinned to 1.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync INTEGER NOT NULL,
            status TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO sync_status (id, last_sync, status) VALUES (1, 0, 'Never synced')")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_synced ON document_chunks(synced)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("nested/dir/local.sqlite"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let (last_sync, status): (i64, String) =
            sqlx::query_as("SELECT last_sync, status FROM sync_status WHERE id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(last_sync, 0);
        assert_eq!(status, "Never synced");

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_status")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}
