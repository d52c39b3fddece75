use std::sync::Arc;

pub mod handlers;
pub mod router;
pub mod types;

pub use router::create_router;
pub use types::*;

use crate::config::QuotaServiceConfig;
use crate::quota::QuotaManager;
use crate::reconcile::Reconciler;

pub struct ApiState {
    pub quota_manager: Arc<QuotaManager>,
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<QuotaServiceConfig>,
}

impl ApiState {
    pub fn new(
        quota_manager: Arc<QuotaManager>,
        reconciler: Arc<Reconciler>,
        config: QuotaServiceConfig,
    ) -> Self {
        Self {
            quota_manager,
            reconciler,
            config: Arc::new(config),
        }
    }
}
