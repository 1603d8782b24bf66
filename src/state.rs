use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Store;
use crate::security::csrf::CsrfKeys;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub csrf: CsrfKeys,
}

impl AppState {
    pub fn from_parts(store: Store, config: Arc<AppConfig>) -> Self {
        let csrf = CsrfKeys::new(&config.csrf_secret);
        Self { store, config, csrf }
    }

    /// In-memory store with an initialized schema and test configuration.
    #[cfg(test)]
    pub async fn fake() -> Self {
        let store = crate::db::memory_store().await;
        Self::from_parts(store, Arc::new(AppConfig::for_tests()))
    }
}
