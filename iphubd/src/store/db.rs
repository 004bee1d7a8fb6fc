use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use shared::types::DeviceRecord;
use super::{StoreError, StoreResult};

const SELECT_ONE: &str =
    "SELECT hostname, address, last_updated FROM devices WHERE hostname = ?1";

pub struct DeviceDb {
    conn: Connection,
}

/// Result of an upsert: the record as committed and the record it replaced.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: DeviceRecord,
    pub previous: Option<DeviceRecord>,
}

impl Upserted {
    /// An existing hostname now points somewhere else.
    pub fn address_changed(&self) -> bool {
        self.previous
            .as_ref()
            .is_some_and(|prev| prev.address != self.record.address)
    }

    /// The hostname/address mapping differs from before the write.
    /// Timestamp-only refreshes don't count.
    pub fn mapping_changed(&self) -> bool {
        self.previous.is_none() || self.address_changed()
    }
}

impl DeviceDb {
    /// Open or create the SQLite database and make sure the device table exists.
    /// Safe to call repeatedly against the same file.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                hostname     TEXT PRIMARY KEY,
                address      TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert or replace the record for `hostname`, stamping it with the current time.
    ///
    /// Runs in an IMMEDIATE transaction so the read of the previous record and
    /// the write commit together. The new timestamp is never earlier than the
    /// stored one, even if the wall clock stepped backwards.
    pub fn upsert(&mut self, hostname: &str, address: &str) -> StoreResult<Upserted> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // An unreadable row is overwritten rather than blocking the report
        let previous = match tx
            .query_row(SELECT_ONE, params![hostname], StoredRow::read)
            .optional()?
            .map(StoredRow::into_record)
            .transpose()
        {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Replacing unreadable record: {}", e);
                None
            }
        };

        let mut now = Utc::now();
        if let Some(prev) = &previous {
            now = now.max(prev.last_updated);
        }

        let record = tx.query_row(
            r#"
            INSERT INTO devices (hostname, address, last_updated)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(hostname) DO UPDATE SET
                address = excluded.address,
                last_updated = excluded.last_updated
            RETURNING hostname, address, last_updated
            "#,
            params![hostname, address, format_timestamp(now)],
            StoredRow::read,
        )?
        .into_record()?;

        tx.commit()?;

        Ok(Upserted { record, previous })
    }

    /// Get the record for a single hostname
    pub fn lookup(&self, hostname: &str) -> StoreResult<Option<DeviceRecord>> {
        self.conn
            .query_row(SELECT_ONE, params![hostname], StoredRow::read)
            .optional()?
            .map(StoredRow::into_record)
            .transpose()
    }

    /// All known hostnames in ascending byte order
    pub fn list_hostnames(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT hostname FROM devices ORDER BY hostname")?;

        let hostnames = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(hostnames)
    }

    /// All records ordered by hostname
    pub fn all_records(&self) -> StoreResult<Vec<DeviceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, address, last_updated FROM devices ORDER BY hostname",
        )?;

        let rows = stmt
            .query_map([], StoredRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(StoredRow::into_record).collect()
    }

    /// Delete the record for `hostname`. Returns false if there was none.
    pub fn remove(&mut self, hostname: &str) -> StoreResult<bool> {
        let count = self
            .conn
            .execute("DELETE FROM devices WHERE hostname = ?1", params![hostname])?;

        Ok(count > 0)
    }
}

/// A row as stored, before the timestamp is parsed
struct StoredRow {
    hostname: String,
    address: String,
    last_updated: String,
}

impl StoredRow {
    fn read(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            hostname: row.get(0)?,
            address: row.get(1)?,
            last_updated: row.get(2)?,
        })
    }

    fn into_record(self) -> StoreResult<DeviceRecord> {
        let last_updated = match DateTime::parse_from_rfc3339(&self.last_updated) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                return Err(StoreError::Corrupt {
                    hostname: self.hostname,
                    reason: format!("last_updated '{}': {}", self.last_updated, e),
                })
            }
        };

        Ok(DeviceRecord {
            hostname: self.hostname,
            address: self.address,
            last_updated,
        })
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
