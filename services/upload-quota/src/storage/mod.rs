pub mod database;
pub mod error;
pub mod memory;
pub mod schema;
pub mod types;

use chrono::{DateTime, Utc};

pub use database::SqliteQuotaStore;
pub use error::StorageError;
pub use memory::InMemoryQuotaStore;
pub use types::{QuotaCounter, Reservation, ReservationStatus, ReserveOutcome, ReserveRequest};

pub const UPLOAD_QUOTA_DB_FILENAME: &str = "upload_quota.db";

/// Persisted identity of a ledger entry.
pub fn counter_key(user_id: &str, date_key: &str) -> String {
    format!("{user_id}_{date_key}")
}

/// Transactional store behind the quota ledger and the reservation records.
///
/// Every mutating method is atomic: either all of its writes become visible
/// or none do. Implementations return [`StorageError::is_transient`] errors
/// only when nothing was applied.
pub trait QuotaStore: Send + Sync {
    fn load_counter(
        &self,
        user_id: &str,
        date_key: &str,
    ) -> Result<Option<QuotaCounter>, StorageError>;

    /// Checks the counter against `request.limit` and, when there is room,
    /// increments it and inserts a `reserved` reservation.
    fn reserve_slot(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StorageError>;

    fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>, StorageError>;

    /// `reserved -> uploaded`. Returns `false` when the reservation was no
    /// longer `reserved`.
    fn mark_uploaded(
        &self,
        reservation_id: &str,
        full_path: &str,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// `reserved -> expired`, giving the slot back to its counter. Returns
    /// `false` when the reservation was no longer `reserved`.
    fn expire_reservation(
        &self,
        reservation_id: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Expires every `reserved` reservation created at or before `cutoff`.
    fn expire_reserved_through(
        &self,
        cutoff: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<usize, StorageError>;
}
