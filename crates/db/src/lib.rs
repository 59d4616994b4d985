//! SQLite storage handle for Libris.
//!
//! A [`Database`] is opened once at startup and shared by every module. It
//! owns the connection pool and applies the migrations modules contribute,
//! recording each applied `(module, id)` pair in `schema_migrations` so a
//! restart never re-runs them.

use std::str::FromStr;
use std::time::Duration;

use libris_kernel::settings::DatabaseSettings;
use libris_kernel::Migration;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

mod error;

pub use error::DbError;

const MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        module     TEXT NOT NULL,
        id         TEXT NOT NULL,
        applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (module, id)
    );
"#;

/// Shared handle to the SQLite database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database described by `settings`.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&settings.url)
            .map_err(|source| DbError::InvalidUrl {
                url: settings.url.clone(),
                source,
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|source| DbError::Connect {
                url: settings.url.clone(),
                source,
            })?;

        tracing::info!(
            url = %settings.url,
            max_connections = settings.max_connections,
            "database opened"
        );

        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests.
    ///
    /// Every pooled connection to `sqlite::memory:` sees its own database, so
    /// the pool is pinned to one connection that never expires.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply every migration not yet recorded, in the order given.
    ///
    /// Each migration runs in its own transaction together with its
    /// bookkeeping row. Returns how many migrations were applied.
    pub async fn migrate(&self, migrations: &[(String, Migration)]) -> Result<usize, DbError> {
        sqlx::raw_sql(MIGRATIONS_TABLE).execute(&self.pool).await?;

        let mut applied = 0;
        for (module, migration) in migrations {
            let recorded: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM schema_migrations WHERE module = ? AND id = ?")
                    .bind(module.as_str())
                    .bind(migration.id)
                    .fetch_optional(&self.pool)
                    .await?;

            if recorded.is_some() {
                tracing::debug!(module = %module, migration = migration.id, "migration already applied");
                continue;
            }

            let mut tx = self.pool.begin().await?;

            sqlx::raw_sql(migration.up)
                .execute(&mut *tx)
                .await
                .map_err(|source| DbError::Migration {
                    module: module.clone(),
                    id: migration.id,
                    source,
                })?;

            sqlx::query("INSERT INTO schema_migrations (module, id) VALUES (?, ?)")
                .bind(module.as_str())
                .bind(migration.id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!(module = %module, migration = migration.id, "migration applied");
            applied += 1;
        }

        Ok(applied)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("database closed");
    }
}
