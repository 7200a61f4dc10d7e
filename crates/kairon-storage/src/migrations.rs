//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use kairon_core::error::KaironError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), KaironError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| KaironError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| KaironError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: action configs, bot settings, key vault, audit log, schedules.
fn apply_v1(conn: &Connection) -> Result<(), KaironError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS action_configs (
            bot             TEXT NOT NULL,
            name            TEXT NOT NULL,
            action_type     TEXT NOT NULL,
            config          TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'inactive')),
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (bot, name)
        );

        CREATE TABLE IF NOT EXISTS bot_settings (
            bot             TEXT PRIMARY KEY NOT NULL,
            settings        TEXT NOT NULL DEFAULT '{}',
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS key_vault (
            bot             TEXT NOT NULL,
            key             TEXT NOT NULL,
            ciphertext      BLOB NOT NULL,
            nonce           BLOB NOT NULL,
            updated_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (bot, key)
        );

        CREATE TABLE IF NOT EXISTS action_server_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            bot             TEXT NOT NULL,
            action          TEXT NOT NULL,
            action_type     TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            status          TEXT NOT NULL CHECK (status IN ('SUCCESS', 'FAILURE')),
            record          TEXT NOT NULL,
            timestamp       INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_action_logs_bot
            ON action_server_logs (bot, timestamp DESC);

        CREATE INDEX IF NOT EXISTS idx_action_logs_sender
            ON action_server_logs (bot, sender_id, timestamp DESC);

        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id              TEXT PRIMARY KEY NOT NULL,
            bot             TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            action_name     TEXT NOT NULL,
            run_at          INTEGER NOT NULL,
            data            TEXT NOT NULL DEFAULT '{}',
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'done', 'failed')),
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due
            ON scheduled_jobs (status, run_at ASC);

        CREATE TABLE IF NOT EXISTS callback_requests (
            token           TEXT PRIMARY KEY NOT NULL,
            bot             TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            callback_name   TEXT NOT NULL,
            url             TEXT NOT NULL,
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| KaironError::Storage(format!("Failed to apply migration v1: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO action_configs (bot, name, action_type, status) VALUES ('b', 'a', 'http_action', 'deleted')",
            [],
        );
        assert!(result.is_err());
    }
}
