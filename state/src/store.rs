use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use tokio::sync::Notify;
use tracing::warn;

mod groups;
mod oauth_events;
mod tokens;
mod tool_index;
mod upstreams;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS upstreams (
    name TEXT PRIMARY KEY,
    record TEXT NOT NULL,
    ever_connected INTEGER NOT NULL DEFAULT 0,
    tool_count INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    server_name TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    token TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS oauth_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_name TEXT NOT NULL,
    completed_at INTEGER NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tool_index (
    server_name TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    description TEXT NOT NULL,
    params_schema TEXT NOT NULL,
    PRIMARY KEY (server_name, tool_name)
);

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
"#;

/// Handle to the proxy's SQLite database. Cheap to clone; all clones share
/// one pool.
#[derive(Clone)]
pub struct StateStore {
    pool: Arc<SqlitePool>,
    /// Signalled whenever a token is saved, so reactors can wake early
    /// instead of waiting for their next poll tick.
    token_arrivals: Arc<Notify>,
}

impl StateStore {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            warn!("failed to create state directory {}: {err}", parent.display());
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection only: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
            token_arrivals: Arc::new(Notify::new()),
        })
    }

    /// Notified on every token save. Intended for the OAuth reactors.
    pub fn token_arrivals(&self) -> Arc<Notify> {
        Arc::clone(&self.token_arrivals)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
