use rusqlite::Connection;

use crate::error::Result;

/// Run all migrations on the key store database.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS active_keys (
            user_id         TEXT PRIMARY KEY,
            key_material    BLOB NOT NULL,
            fingerprint     TEXT NOT NULL,
            algorithm       TEXT NOT NULL,
            version         INTEGER NOT NULL,
            source          TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS key_ring (
            user_id         TEXT NOT NULL,
            fingerprint     TEXT NOT NULL,
            key_material    BLOB NOT NULL,
            algorithm       TEXT NOT NULL,
            version         INTEGER NOT NULL,
            source          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            retired_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (user_id, fingerprint)
        );

        CREATE TABLE IF NOT EXISTS key_rotation_events (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id             TEXT NOT NULL,
            old_key_fingerprint TEXT NOT NULL,
            new_key_fingerprint TEXT NOT NULL,
            rotated_at          TEXT NOT NULL,
            reason              TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rotation_events_user
            ON key_rotation_events(user_id);

        CREATE TABLE IF NOT EXISTS key_backups (
            id                  TEXT PRIMARY KEY,
            user_id             TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            backup_fingerprint  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_key_backups_user
            ON key_backups(user_id);
        ",
    )?;

    Ok(())
}
