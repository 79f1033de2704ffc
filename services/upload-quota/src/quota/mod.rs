pub mod error;
pub mod retry;
pub mod service;
pub mod sweeper;
pub mod types;

pub use error::QuotaError;
pub use retry::RetryPolicy;
pub use service::UploadQuotaService;
pub use sweeper::start_reservation_sweeper;
pub use types::{FinalizeUpload, FinalizedUpload, SlotReservation, UploadStatus};
