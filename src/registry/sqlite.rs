//! SQLite-based configuration store

use crate::registry::{
    check_step_id, Configuration, ConfigurationStore, Origin, Result, Revision, RevisionDraft,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite configuration store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path`
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS configurations (
                step_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                version INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS revisions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                step_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                origin TEXT NOT NULL,
                score REAL,
                error TEXT,
                content TEXT NOT NULL,
                UNIQUE (step_id, version)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_revisions_step ON revisions(step_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    fn revision_from_row(row: &SqliteRow) -> Result<Revision> {
        let timestamp: String = row.get("timestamp");
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", timestamp, e)))?
            .with_timezone(&Utc);
        let origin: String = row.get("origin");

        Ok(Revision {
            step_id: row.get("step_id"),
            version: row.get::<i64, _>("version") as u64,
            timestamp,
            origin: origin.parse()?,
            score: row.get("score"),
            error: row.get("error"),
            content: row.get("content"),
        })
    }
}

#[async_trait]
impl ConfigurationStore for SqliteStore {
    async fn read(&self, step_id: &str) -> Result<Configuration> {
        let row = sqlx::query(
            "SELECT step_id, content, version FROM configurations WHERE step_id = ?1",
        )
        .bind(step_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Configuration {
                step_id: row.get("step_id"),
                content: row.get("content"),
                version: row.get::<Option<i64>, _>("version").map(|v| v as u64),
            }),
            None => Err(StoreError::NotFound(step_id.to_string())),
        }
    }

    async fn append(&self, step_id: &str, draft: RevisionDraft) -> Result<Revision> {
        check_step_id(step_id)?;

        let mut tx = self.pool.begin().await?;

        let last: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM revisions WHERE step_id = ?1",
        )
        .bind(step_id)
        .fetch_one(&mut *tx)
        .await?;

        let revision = draft.into_revision(step_id, last as u64 + 1);

        sqlx::query(
            r#"
            INSERT INTO revisions (step_id, version, timestamp, origin, score, error, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&revision.step_id)
        .bind(revision.version as i64)
        .bind(revision.timestamp.to_rfc3339())
        .bind(revision.origin.as_str())
        .bind(revision.score)
        .bind(&revision.error)
        .bind(&revision.content)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO configurations (step_id, content, version)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&revision.step_id)
        .bind(&revision.content)
        .bind(revision.version as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(revision)
    }

    async fn history(&self, step_id: &str) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            r#"
            SELECT step_id, version, timestamp, origin, score, error, content
            FROM revisions
            WHERE step_id = ?1
            ORDER BY version ASC
            "#,
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::revision_from_row).collect()
    }

    async fn log(&self) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            r#"
            SELECT step_id, version, timestamp, origin, score, error, content
            FROM revisions
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::revision_from_row).collect()
    }

    async fn seed(&self, step_id: &str, content: &str) -> Result<bool> {
        check_step_id(step_id)?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO configurations (step_id, content, version) VALUES (?1, ?2, NULL)",
        )
        .bind(step_id)
        .bind(content)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn steps(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT step_id FROM configurations ORDER BY step_id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("step_id")).collect())
    }
}
