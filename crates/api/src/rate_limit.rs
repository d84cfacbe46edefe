//! Per-IP rate limiting for the upload endpoint
//!
//! Uses tower_governor's GCRA implementation, keyed on the peer address.
//! The service must be served with
//! `into_make_service_with_connect_info::<SocketAddr>()` for the key to
//! resolve.

use governor::middleware::StateInformationMiddleware;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;

use crate::ServerError;

/// Governor config keyed by peer IP, reporting X-RateLimit-* headers
pub type PeerGovernorConfig =
    tower_governor::governor::GovernorConfig<PeerIpKeyExtractor, StateInformationMiddleware>;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Requests that can be made immediately
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_second: 1,
            burst_size: 10,
        }
    }
}

/// Build the governor config, rejecting zero periods or bursts
pub fn create_governor_config(config: &RateLimitConfig) -> Result<Arc<PeerGovernorConfig>, ServerError> {
    GovernorConfigBuilder::default()
        .per_second(config.per_second)
        .burst_size(config.burst_size)
        .use_headers()
        .finish()
        .map(Arc::new)
        .ok_or_else(|| {
            ServerError::RateLimit(format!(
                "invalid rate limit: per_second={}, burst_size={}",
                config.per_second, config.burst_size
            ))
        })
}
