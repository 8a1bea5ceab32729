use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use zeroize::Zeroizing;

use super::KeyStore;
use crate::error::{CocoonError, Result};
use crate::types::{ALGORITHM, KeyBackupRecord, KeyRecord, KeyRotationEvent, KeySource};

/// SQLite-backed key store. One transaction per mutation.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open (or create) the key store and run migrations. On Unix the
    /// database and its WAL sidecars are restricted to the owning account,
    /// and a newly created parent directory gets mode 0700.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            create_private_dir(parent)?;
        }
        create_private_file(path)?;
        restrict_permissions(path)?;
        let conn = Connection::open(path)?;
        super::schema::migrate(&conn)?;
        restrict_permissions(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CocoonError::Storage("key store lock poisoned".to_string()))
    }
}

#[cfg(unix)]
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// Create the database file at 0600 before SQLite opens it. SQLite gives
/// the `-wal` and `-shm` files the mode of the main file.
#[cfg(unix)]
fn create_private_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_file(_path: &Path) -> Result<()> {
    Ok(())
}

/// Tighten the database and any WAL sidecars that already exist, covering
/// files created by older builds.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    for file in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
        if file.exists() {
            std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CocoonError::Storage(format!("Invalid timestamp {value}: {e}")))
}

struct KeyRow {
    key_material: Zeroizing<Vec<u8>>,
    algorithm: String,
    version: u32,
    source: String,
    created_at: String,
}

impl KeyRow {
    const COLUMNS: &'static str = "key_material, algorithm, version, source, created_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key_material: Zeroizing::new(row.get(0)?),
            algorithm: row.get(1)?,
            version: row.get(2)?,
            source: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_record(self, user_id: &str) -> Result<KeyRecord> {
        if self.algorithm != ALGORITHM {
            return Err(CocoonError::Storage(format!(
                "Unsupported stored algorithm for {user_id}: {}",
                self.algorithm
            )));
        }
        let source: KeySource = serde_json::from_str(&self.source)?;
        KeyRecord::from_slice(
            user_id,
            &self.key_material,
            self.version,
            source,
            parse_time(&self.created_at)?,
        )
    }
}

fn select_active(conn: &Connection, user_id: &str) -> Result<Option<KeyRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM active_keys WHERE user_id=?1",
                KeyRow::COLUMNS
            ),
            params![user_id],
            KeyRow::from_row,
        )
        .optional()?;
    row.map(|r| r.into_record(user_id)).transpose()
}

fn write_active(conn: &Connection, record: &KeyRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO active_keys (user_id, key_material, fingerprint, algorithm, version, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
            key_material=excluded.key_material,
            fingerprint=excluded.fingerprint,
            algorithm=excluded.algorithm,
            version=excluded.version,
            source=excluded.source,
            created_at=excluded.created_at",
        params![
            record.user_id,
            &record.key_bytes()[..],
            record.fingerprint(),
            record.algorithm,
            record.version,
            serde_json::to_string(&record.source)?,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn retire(conn: &Connection, record: &KeyRecord) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO key_ring (user_id, fingerprint, key_material, algorithm, version, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.user_id,
            record.fingerprint(),
            &record.key_bytes()[..],
            record.algorithm,
            record.version,
            serde_json::to_string(&record.source)?,
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn insert_event(conn: &Connection, event: &KeyRotationEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO key_rotation_events (user_id, old_key_fingerprint, new_key_fingerprint, rotated_at, reason)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.user_id,
            event.old_key_fingerprint,
            event.new_key_fingerprint,
            event.rotated_at.to_rfc3339(),
            event.reason,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn get_active(&self, user_id: &str) -> Result<Option<KeyRecord>> {
        let conn = self.lock()?;
        select_active(&conn, user_id)
    }

    async fn insert_active_if_absent(&self, record: &KeyRecord) -> Result<KeyRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if let Some(existing) = select_active(&tx, &record.user_id)? {
            return Ok(existing);
        }
        write_active(&tx, record)?;
        tx.commit()?;
        Ok(record.clone())
    }

    async fn replace_active(
        &self,
        next: &KeyRecord,
        event: Option<&KeyRotationEvent>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let next_fp = next.fingerprint();

        if let Some(current) = select_active(&tx, &next.user_id)? {
            if current.fingerprint() != next_fp {
                retire(&tx, &current)?;
            }
        }
        // A key coming back from the ring (e.g. restored) is active again.
        tx.execute(
            "DELETE FROM key_ring WHERE user_id=?1 AND fingerprint=?2",
            params![next.user_id, next_fp],
        )?;
        write_active(&tx, next)?;
        if let Some(event) = event {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(())
    }

    async fn get_by_fingerprint(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<KeyRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {cols} FROM active_keys WHERE user_id=?1 AND fingerprint=?2
                     UNION ALL
                     SELECT {cols} FROM key_ring WHERE user_id=?1 AND fingerprint=?2
                     LIMIT 1",
                    cols = KeyRow::COLUMNS
                ),
                params![user_id, fingerprint],
                KeyRow::from_row,
            )
            .optional()?;
        row.map(|r| r.into_record(user_id)).transpose()
    }

    async fn list_fingerprints(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut fingerprints: Vec<String> = conn
            .query_row(
                "SELECT fingerprint FROM active_keys WHERE user_id=?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .into_iter()
            .collect();

        let mut stmt = conn.prepare(
            "SELECT fingerprint FROM key_ring WHERE user_id=?1 ORDER BY version DESC, retired_at DESC",
        )?;
        let retired = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        for fp in retired {
            fingerprints.push(fp?);
        }
        Ok(fingerprints)
    }

    async fn append_rotation_event(&self, event: &KeyRotationEvent) -> Result<()> {
        let conn = self.lock()?;
        insert_event(&conn, event)
    }

    async fn rotation_events(&self, user_id: &str) -> Result<Vec<KeyRotationEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT old_key_fingerprint, new_key_fingerprint, rotated_at, reason
             FROM key_rotation_events WHERE user_id=?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (old_key_fingerprint, new_key_fingerprint, rotated_at, reason) = row?;
            events.push(KeyRotationEvent {
                user_id: user_id.to_string(),
                old_key_fingerprint,
                new_key_fingerprint,
                rotated_at: parse_time(&rotated_at)?,
                reason,
            });
        }
        Ok(events)
    }

    async fn append_backup_record(&self, record: &KeyBackupRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO key_backups (id, user_id, created_at, backup_fingerprint) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.user_id,
                record.created_at.to_rfc3339(),
                record.backup_fingerprint,
            ],
        )?;
        Ok(())
    }

    async fn backup_records(&self, user_id: &str) -> Result<Vec<KeyBackupRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, backup_fingerprint FROM key_backups
             WHERE user_id=?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, created_at, backup_fingerprint) = row?;
            records.push(KeyBackupRecord {
                id,
                user_id: user_id.to_string(),
                created_at: parse_time(&created_at)?,
                backup_fingerprint,
            });
        }
        Ok(records)
    }
}
