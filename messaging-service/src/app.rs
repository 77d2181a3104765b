use std::sync::Arc;

use axum::extract::FromRef;
use common_audit::AuditProducer;
use common_auth::JwtVerifier;
use common_crypto::MasterKey;
use redis::aio::ConnectionManager;
use reqwest::Client;
use sqlx::PgPool;

use crate::config::AppConfig;
use crate::metrics::MessagingMetrics;
use crate::rate_limiter::TokenBucketLimiter;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub config: Arc<AppConfig>,
    pub audit: AuditProducer,
    pub http_client: Client,
    pub metrics: Arc<MessagingMetrics>,
    pub master_key: Arc<MasterKey>,
    pub rate_limiter: Arc<dyn TokenBucketLimiter>,
    /// Dedicated connection for webhook inbound-event deduplication
    /// (`SET ... NX EX`), separate from the rate limiter's own Redis use so
    /// the two concerns don't share key namespaces by accident.
    pub dedup_cache: ConnectionManager,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
