use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::error::StorageError;
use super::types::{QuotaCounter, Reservation, ReservationStatus, ReserveOutcome, ReserveRequest};
use super::{counter_key, QuotaStore};

/// Process-local ledger. Each counter key is guarded by its map entry, so
/// reservations for different keys never wait on each other's check.
///
/// Lock order is always counter entry, then reservation entry; expiry
/// releases the reservation entry before touching the counter.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    counters: DashMap<String, QuotaCounter>,
    reservations: DashMap<String, Reservation>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn load_counter(
        &self,
        user_id: &str,
        date_key: &str,
    ) -> Result<Option<QuotaCounter>, StorageError> {
        Ok(self
            .counters
            .get(&counter_key(user_id, date_key))
            .map(|counter| counter.clone()))
    }

    fn reserve_slot(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StorageError> {
        if self.reservations.contains_key(&request.reservation_id) {
            return Err(StorageError::DuplicateReservation(
                request.reservation_id.clone(),
            ));
        }

        let key = counter_key(&request.user_id, &request.date_key);
        let mut counter = self.counters.entry(key).or_insert_with(|| QuotaCounter {
            user_id: request.user_id.clone(),
            date_key: request.date_key.clone(),
            count: 0,
            created_at: request.created_at,
            updated_at: request.created_at,
        });

        if counter.count >= request.limit {
            return Ok(ReserveOutcome::LimitReached {
                count: counter.count,
            });
        }

        counter.count += 1;
        counter.updated_at = request.created_at;
        self.reservations.insert(
            request.reservation_id.clone(),
            Reservation::reserved(request),
        );

        Ok(ReserveOutcome::Reserved {
            count: counter.count,
        })
    }

    fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>, StorageError> {
        Ok(self
            .reservations
            .get(reservation_id)
            .map(|reservation| reservation.clone()))
    }

    fn mark_uploaded(
        &self,
        reservation_id: &str,
        full_path: &str,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let Some(mut reservation) = self.reservations.get_mut(reservation_id) else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Reserved {
            return Ok(false);
        }

        reservation.status = ReservationStatus::Uploaded;
        reservation.full_path = Some(full_path.to_string());
        reservation.size = Some(size);
        reservation.uploaded_at = Some(uploaded_at);
        Ok(true)
    }

    fn expire_reservation(
        &self,
        reservation_id: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let key = {
            let Some(mut reservation) = self.reservations.get_mut(reservation_id) else {
                return Ok(false);
            };
            if reservation.status != ReservationStatus::Reserved {
                return Ok(false);
            }
            reservation.status = ReservationStatus::Expired;
            reservation.expired_at = Some(expired_at);
            counter_key(&reservation.user_id, &reservation.date_key)
        };

        if let Some(mut counter) = self.counters.get_mut(&key) {
            counter.count = counter.count.saturating_sub(1);
            counter.updated_at = expired_at;
        }

        Ok(true)
    }

    fn expire_reserved_through(
        &self,
        cutoff: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let stale: Vec<String> = self
            .reservations
            .iter()
            .filter(|entry| {
                entry.status == ReservationStatus::Reserved && entry.created_at <= cutoff
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = 0usize;
        for id in stale {
            if self.expire_reservation(&id, expired_at)? {
                expired += 1;
            }
        }

        Ok(expired)
    }
}
