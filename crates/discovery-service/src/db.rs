//! Relational persistence for the discovery-service: `sessions`,
//! `participants`, and `rate_events`, backed by an `sqlx::SqlitePool`.
//!
//! Database errors degrade to in-memory-only operation for the current
//! process rather than crashing the service — [`SessionRegistry`] and
//! [`crate::rate_limit_sqlite::SqliteRateLimiter`] both log and fall back
//! when a query fails, per the propagation policy.
//!
//! [`SessionRegistry`]: crate::session_registry::SessionRegistry

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub async fn open(path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            uuid TEXT PRIMARY KEY,
            session_string TEXT UNIQUE NOT NULL,
            creator_id TEXT NOT NULL,
            creator_pubkey BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            max_participants INTEGER NOT NULL,
            host_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS participants (
            session_uuid TEXT NOT NULL REFERENCES sessions(uuid),
            participant_id TEXT NOT NULL,
            pubkey BLOB NOT NULL,
            ip TEXT NOT NULL,
            joined_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            PRIMARY KEY (session_uuid, participant_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_events (
            ip TEXT NOT NULL,
            kind TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rate_events ON rate_events (ip, kind, timestamp_ms)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete `rate_events` older than `max_age` and empty sessions older than
/// one hour. Run from a `tokio::time::interval`-driven task every 5 minutes
/// per the wire protocol's cleanup-task section.
pub async fn cleanup(pool: &SqlitePool, rate_event_max_age_ms: i64, empty_session_max_age_ms: i64) -> Result<(), sqlx::Error> {
    let now = now_unix_ms();
    sqlx::query("DELETE FROM rate_events WHERE timestamp_ms < ?")
        .bind(now - rate_event_max_age_ms)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        DELETE FROM sessions
        WHERE created_at < ?
          AND NOT EXISTS (SELECT 1 FROM participants WHERE participants.session_uuid = sessions.uuid)
        "#,
    )
    .bind(now - empty_session_max_age_ms)
    .execute(pool)
    .await?;

    Ok(())
}

pub fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
