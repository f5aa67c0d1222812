use std::sync::Arc;
use strata::TieredCache;

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<TieredCache>,
}

impl AppState {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }
}
