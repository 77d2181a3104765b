use std::sync::Arc;

use axum::extract::FromRef;
use common_audit::AuditProducer;
use common_auth::JwtVerifier;
use reqwest::Client;
use sqlx::PgPool;
use tracing::warn;

use crate::config::AppConfig;
use crate::metrics::IdentityMetrics;
use crate::notifications::{
    post_suspicious_webhook, publish_mfa_activity, KafkaProducer, MfaActivityEvent, SuspiciousLoginPayload,
};
use crate::tokens::TokenSigner;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub token_signer: Arc<TokenSigner>,
    pub config: Arc<AppConfig>,
    pub audit: AuditProducer,
    pub security_producer: Arc<dyn KafkaProducer>,
    pub http_client: Client,
    pub metrics: Arc<IdentityMetrics>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}

impl FromRef<AppState> for Arc<TokenSigner> {
    fn from_ref(state: &AppState) -> Self {
        state.token_signer.clone()
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl AppState {
    /// Fans a security-relevant event out to the MFA activity topic and,
    /// if configured, an outbound webhook. Best-effort: the durable
    /// `AuditLog` row written via `self.audit` is the system of record,
    /// this is an ambient side channel for monitoring only.
    pub async fn emit_mfa_activity(&self, event: MfaActivityEvent, webhook_message: Option<String>) {
        if let Err(err) = publish_mfa_activity(
            self.security_producer.as_ref(),
            &self.config.mfa_activity_topic,
            &event,
        )
        .await
        {
            warn!(?err, tenant_id = %event.tenant_id, trace_id = %event.trace_id, "failed to publish MFA activity");
        }

        if let Some(message) = webhook_message {
            if let Some(url) = &self.config.suspicious_webhook_url {
                let bearer = self.config.suspicious_webhook_bearer.as_deref();
                let payload = SuspiciousLoginPayload { text: message };
                if let Err(err) = post_suspicious_webhook(&self.http_client, url, bearer, &payload).await {
                    warn!(?err, trace_id = %event.trace_id, "failed to post suspicious login webhook");
                }
            }
        }
    }
}
