pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod quota;
pub mod storage;

pub use api::{create_router, ApiState, ErrorResponse, FinalizeUploadRequest};
pub use auth::{AuthError, AuthMethod, IdentityExtractor, UserContext};
pub use clock::{date_key, Clock, FixedClock, SystemClock};
pub use config::{StoreBackend, UploadQuotaConfig};
pub use quota::{
    start_reservation_sweeper, FinalizeUpload, FinalizedUpload, QuotaError, RetryPolicy,
    SlotReservation, UploadQuotaService, UploadStatus,
};
pub use storage::{
    InMemoryQuotaStore, QuotaCounter, QuotaStore, Reservation, ReservationStatus,
    SqliteQuotaStore, StorageError,
};
