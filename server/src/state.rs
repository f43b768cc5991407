//! Shared application state (§4.5, §4.7), grounded on the teacher's
//! `api::AppState`: one `Clone`-able struct threaded through every handler
//! via axum's `State` extractor.

use std::sync::Arc;

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::shipper::Shipper;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub shipper: Arc<Shipper>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, storage: Storage) -> Self {
        let config = Arc::new(config);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let shipper = Arc::new(Shipper::new(Arc::clone(&config), storage.clone()));
        Self {
            storage,
            config,
            rate_limiter,
            shipper,
        }
    }
}
