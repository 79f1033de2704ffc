use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tempfile::{tempdir, TempDir};
use upload_quota::storage::{ReserveOutcome, ReserveRequest};
use upload_quota::{
    AuthMethod, FinalizeUpload, FixedClock, InMemoryQuotaStore, QuotaCounter, QuotaError,
    QuotaStore, Reservation, ReservationStatus, RetryPolicy, SqliteQuotaStore, StorageError,
    UploadQuotaConfig, UploadQuotaService, UserContext,
};

const LIMIT: u32 = 5;

fn start_of_test() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        deadline: Duration::from_secs(2),
    }
}

fn user(id: &str) -> UserContext {
    UserContext::new(id, AuthMethod::Header)
}

fn upload(reservation_id: &str) -> FinalizeUpload {
    FinalizeUpload {
        reservation_id: reservation_id.to_string(),
        full_path: "u/f.png".to_string(),
        size: 1024,
    }
}

struct Fixture {
    service: Arc<UploadQuotaService>,
    store: Arc<dyn QuotaStore>,
    clock: FixedClock,
    _dir: Option<TempDir>,
}

fn fixture_with(store: Arc<dyn QuotaStore>, dir: Option<TempDir>) -> Fixture {
    let clock = FixedClock::new(start_of_test());
    let service = UploadQuotaService::new(
        Arc::clone(&store),
        Arc::new(clock.clone()),
        LIMIT,
        fast_retry(),
        Some(Duration::from_secs(30 * 60)),
    );
    Fixture {
        service: Arc::new(service),
        store,
        clock,
        _dir: dir,
    }
}

fn memory_fixture() -> Fixture {
    fixture_with(Arc::new(InMemoryQuotaStore::new()), None)
}

fn sqlite_store() -> (TempDir, SqliteQuotaStore) {
    let dir = tempdir().expect("failed to create temp dir");
    let store = SqliteQuotaStore::new(dir.path().to_path_buf(), Duration::from_secs(1))
        .expect("store should open");
    (dir, store)
}

fn sqlite_fixture() -> Fixture {
    let (dir, store) = sqlite_store();
    fixture_with(Arc::new(store), Some(dir))
}

async fn run_daily_scenario(fx: Fixture) {
    let alice = user("alice");

    let mut reservations = Vec::new();
    for expected in 1..=LIMIT {
        let reservation = fx.service.reserve_slot(&alice).await.expect("slot available");
        assert_eq!(reservation.count, expected);
        assert_eq!(reservation.limit, LIMIT);
        assert_eq!(reservation.date_key, "2024-05-01");
        reservations.push(reservation);
    }

    let err = fx.service.reserve_slot(&alice).await.unwrap_err();
    assert!(matches!(err, QuotaError::ResourceExhausted { limit: LIMIT }));

    let status = fx.service.get_status(&alice).await.unwrap();
    assert_eq!(status.count, LIMIT);
    assert_eq!(status.remaining, 0);

    let third = &reservations[2].reservation_id;
    let finalized = fx.service.finalize_upload(&alice, upload(third)).await.unwrap();
    assert!(finalized.success);
    assert_eq!(&finalized.reservation_id, third);

    let again = fx.service.finalize_upload(&alice, upload(third)).await.unwrap_err();
    assert!(matches!(again, QuotaError::FailedPrecondition(_)));

    let stored = fx.store.get_reservation(third).unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Uploaded);
    assert_eq!(stored.full_path.as_deref(), Some("u/f.png"));
    assert_eq!(stored.size, Some(1024));

    fx.clock.advance(ChronoDuration::days(1));
    let next_day = fx.service.reserve_slot(&alice).await.unwrap();
    assert_eq!(next_day.count, 1);
    assert_eq!(next_day.date_key, "2024-05-02");
}

#[tokio::test]
async fn daily_scenario_in_memory() {
    run_daily_scenario(memory_fixture()).await;
}

#[tokio::test]
async fn daily_scenario_sqlite() {
    run_daily_scenario(sqlite_fixture()).await;
}

#[tokio::test]
async fn status_is_a_pure_read() {
    let fx = sqlite_fixture();
    let alice = user("alice");

    let status = fx.service.get_status(&alice).await.unwrap();
    assert_eq!(status.count, 0);
    assert_eq!(status.limit, LIMIT);
    assert_eq!(status.remaining, LIMIT);
    assert_eq!(status.date_key, "2024-05-01");
    assert!(fx.store.load_counter("alice", "2024-05-01").unwrap().is_none());

    fx.service.reserve_slot(&alice).await.unwrap();
    fx.service.get_status(&alice).await.unwrap();
    fx.service.get_status(&alice).await.unwrap();
    let status = fx.service.get_status(&alice).await.unwrap();
    assert_eq!(status.count, 1);
    assert_eq!(status.remaining, LIMIT - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_over_admit() {
    for fx in [memory_fixture(), sqlite_fixture()] {
        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let service = Arc::clone(&fx.service);
                tokio::spawn(async move { service.reserve_slot(&user("alice")).await })
            })
            .collect();

        let mut admitted = 0u32;
        for task in tasks {
            match task.await.expect("task should not panic") {
                Ok(_) => admitted += 1,
                Err(QuotaError::ResourceExhausted { limit }) => assert_eq!(limit, LIMIT),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(admitted, LIMIT);
        let counter = fx.store.load_counter("alice", "2024-05-01").unwrap().unwrap();
        assert_eq!(counter.count, admitted);
    }
}

#[tokio::test]
async fn users_do_not_share_quota() {
    let fx = memory_fixture();
    for _ in 0..LIMIT {
        fx.service.reserve_slot(&user("alice")).await.unwrap();
    }

    let bob = fx.service.reserve_slot(&user("bob")).await.unwrap();
    assert_eq!(bob.count, 1);
}

#[tokio::test]
async fn finalize_by_another_user_is_denied() {
    let fx = memory_fixture();
    let reservation = fx.service.reserve_slot(&user("alice")).await.unwrap();

    let err = fx
        .service
        .finalize_upload(&user("mallory"), upload(&reservation.reservation_id))
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::PermissionDenied));

    let stored = fx.store.get_reservation(&reservation.reservation_id).unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Reserved);
}

#[tokio::test]
async fn finalize_after_midnight_fails_precondition() {
    let fx = sqlite_fixture();
    let alice = user("alice");
    fx.clock.set(Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap());
    let reservation = fx.service.reserve_slot(&alice).await.unwrap();

    fx.clock.advance(ChronoDuration::minutes(2));
    let err = fx
        .service
        .finalize_upload(&alice, upload(&reservation.reservation_id))
        .await
        .unwrap_err();

    match err {
        QuotaError::FailedPrecondition(message) => assert!(message.contains("2024-05-01")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn finalize_validates_payload_and_existence() {
    let fx = memory_fixture();
    let alice = user("alice");

    let mut blank_path = upload("r1");
    blank_path.full_path = "  ".to_string();
    assert!(matches!(
        fx.service.finalize_upload(&alice, blank_path).await,
        Err(QuotaError::InvalidArgument(_))
    ));

    assert!(matches!(
        fx.service.finalize_upload(&alice, upload("")).await,
        Err(QuotaError::InvalidArgument(_))
    ));

    assert!(matches!(
        fx.service.finalize_upload(&alice, upload("missing")).await,
        Err(QuotaError::NotFound(_))
    ));
}

#[tokio::test]
async fn abandoned_reservation_expires_and_returns_its_slot() {
    let fx = sqlite_fixture();
    let alice = user("alice");

    let mut ids = Vec::new();
    for _ in 0..LIMIT {
        ids.push(fx.service.reserve_slot(&alice).await.unwrap().reservation_id);
    }
    fx.service.finalize_upload(&alice, upload(&ids[0])).await.unwrap();

    fx.clock.advance(ChronoDuration::minutes(31));

    let err = fx
        .service
        .finalize_upload(&alice, upload(&ids[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::FailedPrecondition(_)));
    assert_eq!(
        fx.store.get_reservation(&ids[1]).unwrap().unwrap().status,
        ReservationStatus::Expired
    );
    assert_eq!(fx.service.get_status(&alice).await.unwrap().count, LIMIT - 1);

    let swept = fx.service.expire_stale().await.unwrap();
    assert_eq!(swept, 3);

    let status = fx.service.get_status(&alice).await.unwrap();
    assert_eq!(status.count, 1);
    assert_eq!(status.remaining, LIMIT - 1);
    assert_eq!(
        fx.store.get_reservation(&ids[0]).unwrap().unwrap().status,
        ReservationStatus::Uploaded
    );

    let fresh = fx.service.reserve_slot(&alice).await.unwrap();
    assert_eq!(fresh.count, 2);
}

#[tokio::test]
async fn expiry_disabled_keeps_slots_consumed() {
    let store: Arc<dyn QuotaStore> = Arc::new(InMemoryQuotaStore::new());
    let clock = FixedClock::new(start_of_test());
    let service = UploadQuotaService::new(
        Arc::clone(&store),
        Arc::new(clock.clone()),
        LIMIT,
        fast_retry(),
        None,
    );
    let alice = user("alice");
    let reservation = service.reserve_slot(&alice).await.unwrap();

    clock.advance(ChronoDuration::hours(3));
    assert_eq!(service.expire_stale().await.unwrap(), 0);
    assert_eq!(service.get_status(&alice).await.unwrap().count, 1);
    assert!(service
        .finalize_upload(&alice, upload(&reservation.reservation_id))
        .await
        .is_ok());
}

/// Fails the first `failures` reserve attempts with a write conflict.
struct FlakyStore {
    inner: InMemoryQuotaStore,
    failures: AtomicU32,
    attempted_ids: Mutex<Vec<String>>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryQuotaStore::new(),
            failures: AtomicU32::new(failures),
            attempted_ids: Mutex::new(Vec::new()),
        }
    }
}

impl QuotaStore for FlakyStore {
    fn load_counter(
        &self,
        user_id: &str,
        date_key: &str,
    ) -> Result<Option<QuotaCounter>, StorageError> {
        self.inner.load_counter(user_id, date_key)
    }

    fn reserve_slot(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StorageError> {
        self.attempted_ids
            .lock()
            .unwrap()
            .push(request.reservation_id.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Conflict("counter".to_string()));
        }
        self.inner.reserve_slot(request)
    }

    fn get_reservation(&self, reservation_id: &str) -> Result<Option<Reservation>, StorageError> {
        self.inner.get_reservation(reservation_id)
    }

    fn mark_uploaded(
        &self,
        reservation_id: &str,
        full_path: &str,
        size: u64,
        uploaded_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner
            .mark_uploaded(reservation_id, full_path, size, uploaded_at)
    }

    fn expire_reservation(
        &self,
        reservation_id: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.inner.expire_reservation(reservation_id, expired_at)
    }

    fn expire_reserved_through(
        &self,
        cutoff: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        self.inner.expire_reserved_through(cutoff, expired_at)
    }
}

#[tokio::test]
async fn transient_conflicts_are_retried_with_fresh_ids() {
    let flaky = Arc::new(FlakyStore::new(2));
    let fx = fixture_with(Arc::clone(&flaky) as Arc<dyn QuotaStore>, None);

    let reservation = fx.service.reserve_slot(&user("alice")).await.unwrap();
    assert_eq!(reservation.count, 1);

    let attempted = flaky.attempted_ids.lock().unwrap().clone();
    assert_eq!(attempted.len(), 3);
    assert_eq!(attempted.iter().collect::<HashSet<_>>().len(), 3);
    assert_eq!(attempted.last(), Some(&reservation.reservation_id));
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable() {
    let fx = fixture_with(Arc::new(FlakyStore::new(100)), None);

    let err = fx.service.reserve_slot(&user("alice")).await.unwrap_err();
    assert!(matches!(err, QuotaError::Unavailable(_)));
    assert!(fx.store.load_counter("alice", "2024-05-01").unwrap().is_none());
}

#[tokio::test]
async fn default_config_keeps_slots_consumed_across_sweeps() {
    let (_dir, store) = sqlite_store();
    let store: Arc<dyn QuotaStore> = Arc::new(store);
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
    let config = UploadQuotaConfig::default();
    let service =
        UploadQuotaService::from_config(Arc::clone(&store), Arc::new(clock.clone()), &config);
    let alice = user("alice");

    let mut admitted = 0u32;
    for _ in 0..4 {
        while service.reserve_slot(&alice).await.is_ok() {
            admitted += 1;
        }
        clock.advance(ChronoDuration::minutes(31));
        assert_eq!(service.expire_stale().await.unwrap(), 0);
    }

    assert_eq!(admitted, config.daily_limit);
    let status = service.get_status(&alice).await.unwrap();
    assert_eq!(status.count, config.daily_limit);
    assert_eq!(status.remaining, 0);
}

#[tokio::test]
async fn finalize_and_sweep_agree_on_the_ttl_boundary() {
    for fx in [memory_fixture(), sqlite_fixture()] {
        let alice = user("alice");
        let early = fx.service.reserve_slot(&alice).await.unwrap();
        fx.clock.advance(ChronoDuration::seconds(1));
        let late = fx.service.reserve_slot(&alice).await.unwrap();

        // Exactly one TTL after the first reservation.
        fx.clock.advance(ChronoDuration::minutes(30) - ChronoDuration::seconds(1));
        assert_eq!(fx.service.expire_stale().await.unwrap(), 1);
        assert_eq!(
            fx.store.get_reservation(&early.reservation_id).unwrap().unwrap().status,
            ReservationStatus::Expired
        );

        fx.clock.advance(ChronoDuration::seconds(1));
        let err = fx
            .service
            .finalize_upload(&alice, upload(&late.reservation_id))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::FailedPrecondition(_)));
        assert_eq!(fx.service.get_status(&alice).await.unwrap().count, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_finalizes_have_a_single_winner() {
    for fx in [memory_fixture(), sqlite_fixture()] {
        let reservation = fx.service.reserve_slot(&user("alice")).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&fx.service);
                let id = reservation.reservation_id.clone();
                tokio::spawn(
                    async move { service.finalize_upload(&user("alice"), upload(&id)).await },
                )
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            match task.await.expect("task should not panic") {
                Ok(finalized) => {
                    assert!(finalized.success);
                    winners += 1;
                }
                Err(QuotaError::FailedPrecondition(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        let stored = fx.store.get_reservation(&reservation.reservation_id).unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Uploaded);
        assert_eq!(fx.store.load_counter("alice", "2024-05-01").unwrap().unwrap().count, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finalize_racing_the_sweeper_settles_one_way() {
    for fx in [memory_fixture(), sqlite_fixture()] {
        // Finalizes without its own expiry check so the store decides the race.
        let finalizer = Arc::new(UploadQuotaService::new(
            Arc::clone(&fx.store),
            Arc::new(fx.clock.clone()),
            LIMIT,
            fast_retry(),
            None,
        ));

        for round in 0..10 {
            let owner = user(&format!("user-{round}"));
            let reservation = finalizer.reserve_slot(&owner).await.unwrap();
            fx.clock.advance(ChronoDuration::minutes(31));

            let finalize = {
                let finalizer = Arc::clone(&finalizer);
                let owner = owner.clone();
                let id = reservation.reservation_id.clone();
                tokio::spawn(async move { finalizer.finalize_upload(&owner, upload(&id)).await })
            };
            let sweep = {
                let sweeper = Arc::clone(&fx.service);
                tokio::spawn(async move { sweeper.expire_stale().await })
            };

            let finalized = finalize.await.expect("task should not panic");
            let swept = sweep.await.expect("task should not panic").unwrap();

            let stored = fx.store.get_reservation(&reservation.reservation_id).unwrap().unwrap();
            let count = fx
                .store
                .load_counter(&owner.user_id, "2024-05-01")
                .unwrap()
                .unwrap()
                .count;
            match finalized {
                Ok(_) => {
                    assert_eq!(stored.status, ReservationStatus::Uploaded);
                    assert!(stored.expired_at.is_none());
                    assert_eq!(swept, 0);
                    assert_eq!(count, 1);
                }
                Err(QuotaError::FailedPrecondition(_)) => {
                    assert_eq!(stored.status, ReservationStatus::Expired);
                    assert!(stored.uploaded_at.is_none());
                    assert_eq!(swept, 1);
                    assert_eq!(count, 0);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }
}
