use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use crate::clock::format_timestamp;

use super::error::StorageError;
use super::schema::init_database;
use super::types::{QuotaCounter, Reservation, ReservationStatus, ReserveOutcome, ReserveRequest};
use super::{counter_key, QuotaStore, UPLOAD_QUOTA_DB_FILENAME};

const RESERVATION_COLUMNS: &str =
    "id, user_id, date_key, status, full_path, size, created_at, uploaded_at, expired_at";

/// SQLite-backed ledger. Writers take the database write lock up front
/// (`BEGIN IMMEDIATE`) so the limit check and the increment cannot be split
/// by another reservation.
pub struct SqliteQuotaStore {
    conn: Mutex<Connection>,
}

impl SqliteQuotaStore {
    pub fn new(data_dir: PathBuf, busy_timeout: Duration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(UPLOAD_QUOTA_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        init_database(&conn)?;

        debug!(
            path = %db_path.display(),
            journal_mode = %journal_mode,
            "opened upload quota database"
        );

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::ConnectionPoisoned)
    }
}

impl QuotaStore for SqliteQuotaStore {
    fn load_counter(
        &self,
        user_id: &str,
        date_key: &str,
    ) -> Result<Option<QuotaCounter>, StorageError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                r#"
                SELECT user_id, date_key, count, created_at, updated_at
                FROM quota_counters
                WHERE counter_key = ?1
                "#,
                params![counter_key(user_id, date_key)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(user_id, date_key, count, created_at, updated_at)| {
            Ok(QuotaCounter {
                user_id,
                date_key,
                count: to_count(count)?,
                created_at: parse_timestamp(&created_at)?,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    fn reserve_slot(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let key = counter_key(&request.user_id, &request.date_key);

        let current = tx
            .query_row(
                "SELECT count FROM quota_counters WHERE counter_key = ?1",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(to_count)
            .transpose()?
            .unwrap_or(0);

        if current >= request.limit {
            // Dropping the transaction rolls it back; nothing was written.
            return Ok(ReserveOutcome::LimitReached { count: current });
        }

        let next = current + 1;
        let now = format_timestamp(request.created_at);

        tx.execute(
            r#"
            INSERT INTO quota_counters (counter_key, user_id, date_key, count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(counter_key) DO UPDATE SET
                count = excluded.count,
                updated_at = excluded.updated_at
            "#,
            params![key, request.user_id, request.date_key, i64::from(next), now],
        )?;

        tx.execute(
            r#"
            INSERT INTO upload_reservations (id, user_id, date_key, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                request.reservation_id,
                request.user_id,
                request.date_key,
                ReservationStatus::Reserved.as_str(),
                now
            ],
        )?;

        tx.commit()?;
        Ok(ReserveOutcome::Reserved { count: next })
    }

    fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>, StorageError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {RESERVATION_COLUMNS} FROM upload_reservations WHERE id = ?1"),
                params![reservation_id],
                ReservationRow::from_row,
            )
            .optional()?;

        row.map(Reservation::try_from).transpose()
    }

    fn mark_uploaded(
        &self,
        reservation_id: &str,
        full_path: &str,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let size = i64::try_from(size)
            .map_err(|_| StorageError::InvalidRecord(format!("size {size} out of range")))?;
        let conn = self.lock()?;

        let updated = conn.execute(
            r#"
            UPDATE upload_reservations
            SET status = ?2, full_path = ?3, size = ?4, uploaded_at = ?5
            WHERE id = ?1 AND status = ?6
            "#,
            params![
                reservation_id,
                ReservationStatus::Uploaded.as_str(),
                full_path,
                size,
                format_timestamp(uploaded_at),
                ReservationStatus::Reserved.as_str()
            ],
        )?;

        Ok(updated == 1)
    }

    fn expire_reservation(
        &self,
        reservation_id: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owner = tx
            .query_row(
                "SELECT user_id, date_key FROM upload_reservations WHERE id = ?1 AND status = ?2",
                params![reservation_id, ReservationStatus::Reserved.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((user_id, date_key)) = owner else {
            return Ok(false);
        };

        release_slot(&tx, reservation_id, &user_id, &date_key, expired_at)?;
        tx.commit()?;
        Ok(true)
    }

    fn expire_reserved_through(
        &self,
        cutoff: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stale = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, user_id, date_key
                FROM upload_reservations
                WHERE status = ?1 AND created_at <= ?2
                "#,
            )?;
            let rows = stmt.query_map(
                params![ReservationStatus::Reserved.as_str(), format_timestamp(cutoff)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )?;

            let mut stale = Vec::new();
            for row in rows {
                stale.push(row?);
            }
            stale
        };

        for (id, user_id, date_key) in &stale {
            release_slot(&tx, id, user_id, date_key, expired_at)?;
        }

        tx.commit()?;
        Ok(stale.len())
    }
}

fn release_slot(
    tx: &rusqlite::Transaction<'_>,
    reservation_id: &str,
    user_id: &str,
    date_key: &str,
    expired_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    let now = format_timestamp(expired_at);

    tx.execute(
        "UPDATE upload_reservations SET status = ?2, expired_at = ?3 WHERE id = ?1",
        params![reservation_id, ReservationStatus::Expired.as_str(), now],
    )?;
    tx.execute(
        r#"
        UPDATE quota_counters
        SET count = MAX(count - 1, 0), updated_at = ?2
        WHERE counter_key = ?1
        "#,
        params![counter_key(user_id, date_key), now],
    )?;

    Ok(())
}

struct ReservationRow {
    id: String,
    user_id: String,
    date_key: String,
    status: String,
    full_path: Option<String>,
    size: Option<i64>,
    created_at: String,
    uploaded_at: Option<String>,
    expired_at: Option<String>,
}

impl ReservationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date_key: row.get(2)?,
            status: row.get(3)?,
            full_path: row.get(4)?,
            size: row.get(5)?,
            created_at: row.get(6)?,
            uploaded_at: row.get(7)?,
            expired_at: row.get(8)?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StorageError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            status: row.status.parse()?,
            size: row
                .size
                .map(|size| {
                    u64::try_from(size)
                        .map_err(|_| StorageError::InvalidRecord(format!("negative size {size}")))
                })
                .transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            uploaded_at: row.uploaded_at.as_deref().map(parse_timestamp).transpose()?,
            expired_at: row.expired_at.as_deref().map(parse_timestamp).transpose()?,
            id: row.id,
            user_id: row.user_id,
            date_key: row.date_key,
            full_path: row.full_path,
        })
    }
}

fn to_count(value: i64) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::InvalidRecord(format!("count {value} out of range")))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| StorageError::InvalidRecord(format!("bad timestamp {value}: {err}")))
}
