use std::sync::Arc;

use reqwest::Client;

use crate::config::Config;
use crate::db::store::Store;
use crate::middleware::auth::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub config: Arc<Config>,
    /// Shared client for the OAuth token exchange.
    pub http: Client,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self {
            store,
            sessions: SessionStore::new(config.session_ttl),
            config,
            http: Client::new(),
        }
    }
}
