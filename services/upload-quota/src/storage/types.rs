use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StorageError;

/// Per-(user, day) ledger entry. `count` covers reservations that are still
/// reserved or already uploaded; expired reservations have been given back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub user_id: String,
    pub date_key: String,
    pub count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Reserved,
    Uploaded,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Uploaded => "uploaded",
            ReservationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "reserved" => Ok(ReservationStatus::Reserved),
            "uploaded" => Ok(ReservationStatus::Uploaded),
            "expired" => Ok(ReservationStatus::Expired),
            other => Err(StorageError::InvalidRecord(format!(
                "unknown reservation status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    pub date_key: String,
    pub status: ReservationStatus,
    pub full_path: Option<String>,
    pub size: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn reserved(request: &ReserveRequest) -> Self {
        Self {
            id: request.reservation_id.clone(),
            user_id: request.user_id.clone(),
            date_key: request.date_key.clone(),
            status: ReservationStatus::Reserved,
            full_path: None,
            size: None,
            created_at: request.created_at,
            uploaded_at: None,
            expired_at: None,
        }
    }
}

/// Input of the reserve transaction.
#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub user_id: String,
    pub date_key: String,
    pub limit: u32,
    pub reservation_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Counter incremented and reservation created; `count` is post-increment.
    Reserved { count: u32 },
    /// Nothing was written.
    LimitReached { count: u32 },
}
