use anyhow::Context;
use chrono::Utc;
use serde_json::Value;
use sqlx::{
    migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool,
};
use std::path::Path;

// One row per named document; the JSON payload is stored as text
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS documents (
    name TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL -- Unix Timestamp (milliseconds)
);
";

const UPSERT_SQL: &str = "
INSERT INTO documents (name, value, updated_at)
VALUES (?, ?, ?)
ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
";

/// Embedded-database backend used when the document directory is unusable.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self, anyhow::Error> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Process-lifetime database. A single pinned connection keeps the data alive.
    pub async fn in_memory() -> Result<Self, anyhow::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite database")?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::debug!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<Option<Value>, anyhow::Error> {
        let row = sqlx::query("SELECT value FROM documents WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch document '{}'", name))?;

        match row {
            Some(row) => {
                let text: String = row.try_get("value")?;
                let value = serde_json::from_str(&text)
                    .with_context(|| format!("Document '{}' is not valid JSON", name))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn write(&self, name: &str, value: &Value) -> Result<(), anyhow::Error> {
        let text = serde_json::to_string(value)?;
        sqlx::query(UPSERT_SQL)
            .bind(name)
            .bind(text)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to write document '{}'", name))?;
        Ok(())
    }

    /// Writes every entry inside one transaction.
    pub async fn write_batch(&self, entries: &[(&str, Value)]) -> Result<(), anyhow::Error> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        for (name, value) in entries {
            let text = serde_json::to_string(value)?;
            sqlx::query(UPSERT_SQL)
                .bind(*name)
                .bind(text)
                .bind(now)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to write document '{}'", name))?;
        }
        tx.commit().await.context("Failed to commit document batch")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_document_reads_as_none() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        assert_eq!(backend.read("sessions").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_overwrites_previous_value() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        backend.write("settings", &json!({"theme": "dark"})).await.unwrap();
        backend.write("settings", &json!({"theme": "light"})).await.unwrap();
        assert_eq!(
            backend.read("settings").await.unwrap(),
            Some(json!({"theme": "light"}))
        );
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");
        {
            let backend = SqliteBackend::open(&path).await.unwrap();
            backend
                .write_batch(&[("sessions", json!([])), ("instructions", json!([{"id": 1}]))])
                .await
                .unwrap();
        }
        let reopened = SqliteBackend::open(&path).await.unwrap();
        assert_eq!(
            reopened.read("instructions").await.unwrap(),
            Some(json!([{"id": 1}]))
        );
    }
}
