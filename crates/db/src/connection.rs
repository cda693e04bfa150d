use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

/// Opens the request store, creating the database file on first use.
/// `timeout_secs` bounds both pool checkout and waiting on a locked database.
///
/// An in-memory database lives and dies with its connection, so it is pinned
/// to one connection that never idles out; every caller then sees the same
/// rows and the same version counters.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = is_in_memory(database_url);
    let timeout = Duration::from_secs(timeout_secs.max(1));
    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(timeout);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { max_connections.max(1) })
        .acquire_timeout(timeout);
    let pool = if in_memory { pool.idle_timeout(None).max_lifetime(None) } else { pool };

    pool.connect_with(options).await
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::{connect, connect_with_settings, is_in_memory};

    #[test]
    fn memory_urls_are_recognised() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://requests?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://data/formflow.db?mode=rwc"));
    }

    #[tokio::test]
    async fn memory_pool_shares_one_database() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        sqlx::query("CREATE TABLE scratch (id INTEGER PRIMARY KEY)")
            .execute(&pool)
            .await
            .expect("create");

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scratch")
            .fetch_one(&pool)
            .await
            .expect("table visible to later queries");
        assert_eq!(count, 0);
        assert_eq!(pool.options().get_max_connections(), 1);
    }

    #[tokio::test]
    async fn lock_wait_follows_configured_timeout() {
        let pool = connect_with_settings("sqlite::memory:", 1, 12).await.expect("connect");

        let (busy_ms,): (i64,) =
            sqlx::query_as("PRAGMA busy_timeout").fetch_one(&pool).await.expect("pragma");
        assert_eq!(busy_ms, 12_000);
        assert_eq!(pool.options().get_acquire_timeout().as_secs(), 12);
    }
}
