use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::auth::IdentityExtractor;
use crate::config::UploadQuotaConfig;
use crate::quota::UploadQuotaService;

pub struct ApiState {
    pub quota_service: Arc<UploadQuotaService>,
    pub identity: Arc<IdentityExtractor>,
    pub config: Arc<UploadQuotaConfig>,
}

impl ApiState {
    pub fn new(
        quota_service: Arc<UploadQuotaService>,
        identity: IdentityExtractor,
        config: UploadQuotaConfig,
    ) -> Self {
        Self {
            quota_service,
            identity: Arc::new(identity),
            config: Arc::new(config),
        }
    }
}
