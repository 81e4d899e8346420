//! Database connection pool and initialization.

use std::path::{Path, PathBuf};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

use crate::error::{DbError, DbResult};

/// Connection pool wrapper for the local index database.
///
/// Opens the file in WAL mode so the sync writer and recall readers can
/// overlap; writers are serialized by SQLite itself.
#[derive(Debug, Clone)]
pub struct IndexDb {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl IndexDb {
    /// Open (or create) the index database at `db_path` and apply the schema.
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // WAL keeps recall reads concurrent with the sync writer.
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA cache_size = -64000").execute(&pool).await?;

        run_migrations(&pool).await?;
        info!("index database ready at {}", db_path.display());

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await?;

        run_migrations(&pool).await?;

        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let migration_sql = include_str!("../migrations/001_initial_schema.sql");

    for statement in migration_sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| DbError::Migration(format!("failed to apply schema: {e}")))?;
        }
    }

    Ok(())
}
