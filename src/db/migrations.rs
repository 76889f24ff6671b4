//! Ledger store initialization.
//!
//! Every pooled connection gets the same pragmas; the schema script runs in
//! one transaction and stamps `user_version`, so a store written by a newer
//! build is refused instead of being read with the wrong layout.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// Layout version written by `schema.sql`.
pub const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the ledger store at `db_path` and bring its schema up to date.
///
/// # Errors
/// Returns an error if the file cannot be opened, a statement fails, or the
/// store carries a schema version newer than [`SCHEMA_VERSION`].
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_connection(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    apply_schema(&pool).await?;

    info!(db_path, schema_version = SCHEMA_VERSION, "ledger store ready");
    Ok(pool)
}

async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("PRAGMA user_version").fetch_one(pool).await?;
    row.try_get(0)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let found = schema_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(sqlx::Error::Configuration(
            format!(
                "ledger store has schema version {}, this build supports up to {}",
                found, SCHEMA_VERSION
            )
            .into(),
        ));
    }

    let mut tx = pool.begin().await?;
    let mut statements = 0;
    for statement in include_str!("schema.sql").split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(&mut *tx).await?;
        statements += 1;
    }
    // PRAGMA does not take bind parameters
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    debug!(statements, from_version = found, "schema applied");
    Ok(())
}

/// Foreign keys keep state changes tied to their transfer; the busy timeout
/// queues ledger writers behind the position lock instead of failing them.
async fn configure_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode reports the mode actually in effect
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.try_get(0)?;
    debug!(journal_mode = %journal_mode, "connection configured");

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db_path(dir: &TempDir) -> String {
        dir.path().join("ledger.db").to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_init_db_creates_ledger_tables() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);
        let pool = init_db(&path).await.expect("init_db failed");
        assert!(Path::new(&path).exists());

        for table in ["participant_position", "transfer", "fx_transfer", "fx_watch_list"] {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }

        let (namespaces,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name LIKE '%duplicate_check'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(namespaces, 6);
        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);
        let pool = init_db(&path).await.unwrap();
        sqlx::query("INSERT INTO participant (name, is_active, is_proxy, created_at) VALUES ('dfsp1', 1, 0, 0)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = init_db(&path).await.expect("reopen failed");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM participant")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);
        let pool = init_db(&path).await.unwrap();
        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION + 1))
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let result = init_db(&path).await;
        assert!(matches!(result, Err(sqlx::Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&db_path(&temp_dir)).await.unwrap();

        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);

        // a state change for a transfer that was never stored
        let result = sqlx::query(
            "INSERT INTO transfer_state_change (transfer_id, transfer_state, created_at) VALUES ('missing', 'RESERVED', 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
