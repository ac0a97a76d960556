use std::sync::Arc;

use sqlx::PgPool;

use crate::transfer::TransferService;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn TransferService>,
    /// Pinged by the health check when the durable backend is in use
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(service: Arc<dyn TransferService>) -> Self {
        Self {
            service,
            pool: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
