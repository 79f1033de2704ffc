use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::UserContext;
use crate::clock::{date_key, Clock};
use crate::config::UploadQuotaConfig;
use crate::storage::{QuotaStore, ReservationStatus, ReserveOutcome, ReserveRequest};

use super::error::QuotaError;
use super::retry::RetryPolicy;
use super::types::{FinalizeUpload, FinalizedUpload, SlotReservation, UploadStatus};

/// Admission control for daily uploads: status, reserve, finalize, expire.
pub struct UploadQuotaService {
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn Clock>,
    limit: u32,
    retry: RetryPolicy,
    reservation_ttl: Option<ChronoDuration>,
}

impl UploadQuotaService {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        limit: u32,
        retry: RetryPolicy,
        reservation_ttl: Option<Duration>,
    ) -> Self {
        Self {
            store,
            clock,
            limit,
            retry,
            reservation_ttl: reservation_ttl.and_then(|ttl| ChronoDuration::from_std(ttl).ok()),
        }
    }

    pub fn from_config(
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn Clock>,
        config: &UploadQuotaConfig,
    ) -> Self {
        Self::new(
            store,
            clock,
            config.daily_limit,
            RetryPolicy::from_config(config),
            config.reservation_ttl(),
        )
    }

    /// Read-only: an absent counter reads as zero and is not created.
    pub async fn get_status(&self, user: &UserContext) -> Result<UploadStatus, QuotaError> {
        let date_key = date_key(self.clock.now());

        let user_id = user.user_id.clone();
        let day = date_key.clone();
        let counter = self
            .run_blocking(move |store| store.load_counter(&user_id, &day))
            .await?;
        let count = counter.map(|counter| counter.count).unwrap_or(0);

        Ok(UploadStatus {
            count,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            date_key,
        })
    }

    pub async fn reserve_slot(&self, user: &UserContext) -> Result<SlotReservation, QuotaError> {
        let now = self.clock.now();
        let mut request = ReserveRequest {
            user_id: user.user_id.clone(),
            date_key: date_key(now),
            limit: self.limit,
            reservation_id: Uuid::new_v4().to_string(),
            created_at: now,
        };
        let deadline = Instant::now() + self.retry.deadline;
        let mut attempt = 0u32;

        loop {
            let attempt_request = request.clone();
            let result = self
                .run_blocking(move |store| store.reserve_slot(&attempt_request))
                .await;

            match result {
                Ok(ReserveOutcome::Reserved { count }) => {
                    info!(
                        request_id = %user.request_id,
                        user_id = %request.user_id,
                        date_key = %request.date_key,
                        reservation_id = %request.reservation_id,
                        count,
                        limit = self.limit,
                        "upload slot reserved"
                    );
                    return Ok(SlotReservation {
                        reservation_id: request.reservation_id,
                        date_key: request.date_key,
                        count,
                        limit: self.limit,
                    });
                }
                Ok(ReserveOutcome::LimitReached { count }) => {
                    info!(
                        user_id = %request.user_id,
                        date_key = %request.date_key,
                        count,
                        limit = self.limit,
                        "daily upload limit reached"
                    );
                    return Err(QuotaError::ResourceExhausted { limit: self.limit });
                }
                Err(err) if err.is_transient() => {
                    if attempt >= self.retry.max_retries {
                        warn!(
                            user_id = %request.user_id,
                            attempts = attempt + 1,
                            error = %err,
                            "reservation retries exhausted"
                        );
                        return Err(QuotaError::Unavailable(format!(
                            "reservation did not commit after {} attempts",
                            attempt + 1
                        )));
                    }

                    let backoff = self.retry.backoff_with_jitter(attempt);
                    if Instant::now() + backoff >= deadline {
                        warn!(
                            user_id = %request.user_id,
                            attempts = attempt + 1,
                            error = %err,
                            "reservation deadline exceeded"
                        );
                        return Err(QuotaError::Unavailable(
                            "reservation deadline exceeded".to_string(),
                        ));
                    }

                    debug!(
                        user_id = %request.user_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying reservation after transient store error"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                    request.reservation_id = Uuid::new_v4().to_string();
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn finalize_upload(
        &self,
        user: &UserContext,
        upload: FinalizeUpload,
    ) -> Result<FinalizedUpload, QuotaError> {
        if upload.reservation_id.trim().is_empty() {
            return Err(QuotaError::InvalidArgument(
                "reservationId must be a non-empty string".to_string(),
            ));
        }
        if upload.full_path.trim().is_empty() {
            return Err(QuotaError::InvalidArgument(
                "fullPath must be a non-empty string".to_string(),
            ));
        }

        let now = self.clock.now();
        let today = date_key(now);

        let id = upload.reservation_id.clone();
        let reservation = self
            .run_blocking(move |store| store.get_reservation(&id))
            .await?
            .ok_or_else(|| QuotaError::NotFound(upload.reservation_id.clone()))?;

        if reservation.user_id != user.user_id {
            warn!(
                user_id = %user.user_id,
                reservation_id = %reservation.id,
                "finalize attempted on another user's reservation"
            );
            return Err(QuotaError::PermissionDenied);
        }

        if reservation.date_key != today {
            return Err(QuotaError::FailedPrecondition(format!(
                "reservation dateKey {} does not match current date {today}",
                reservation.date_key
            )));
        }

        if reservation.status != ReservationStatus::Reserved {
            return Err(QuotaError::FailedPrecondition(format!(
                "reservation status is {}, expected 'reserved'",
                reservation.status
            )));
        }

        if let Some(ttl) = self.reservation_ttl {
            if reservation.created_at + ttl <= now {
                let id = reservation.id.clone();
                let expired = self
                    .run_blocking(move |store| store.expire_reservation(&id, now))
                    .await?;
                info!(
                    user_id = %user.user_id,
                    reservation_id = %reservation.id,
                    released = expired,
                    "reservation expired before finalize"
                );
                return Err(QuotaError::FailedPrecondition(
                    "reservation expired".to_string(),
                ));
            }
        }

        let id = reservation.id.clone();
        let full_path = upload.full_path.clone();
        let size = upload.size;
        let updated = self
            .run_blocking(move |store| store.mark_uploaded(&id, &full_path, size, now))
            .await?;

        if !updated {
            return Err(QuotaError::FailedPrecondition(
                "reservation is no longer reserved".to_string(),
            ));
        }

        info!(
            request_id = %user.request_id,
            user_id = %user.user_id,
            reservation_id = %reservation.id,
            full_path = %upload.full_path,
            size = upload.size,
            "upload finalized"
        );

        Ok(FinalizedUpload {
            success: true,
            reservation_id: reservation.id,
        })
    }

    /// Expires reservations older than the TTL and returns their slots.
    pub async fn expire_stale(&self) -> Result<usize, QuotaError> {
        let Some(ttl) = self.reservation_ttl else {
            return Ok(0);
        };

        let now = self.clock.now();
        let cutoff = now - ttl;
        self.run_blocking(move |store| store.expire_reserved_through(cutoff, now))
            .await
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, QuotaError>
    where
        F: FnOnce(&dyn QuotaStore) -> Result<T, crate::storage::StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|err| QuotaError::Internal(format!("store task failed: {err}")))?
            .map_err(QuotaError::from)
    }
}
