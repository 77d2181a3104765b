use anyhow::{Context, Result};
use std::env;

/// Runtime configuration for messaging-service, loaded from plain
/// environment variables rather than a layered config file, matching the
/// rest of this codebase's services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    /// Base64-encoded 32-byte key used to envelope-encrypt per-channel DEKs.
    pub channel_encryption_key: String,
    pub default_rate_limit_per_second: i32,
    pub default_monthly_message_limit: i32,
    pub provider_base_url: String,
    pub provider_request_timeout_seconds: u64,
    pub kafka_bootstrap: String,
    /// Issuer/audience checks are optional; when unset, tokens are verified
    /// without either claim, matching identity-service's own defaults.
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub webhook_dedup_ttl_seconds: u64,
}

pub fn load_app_config() -> Result<AppConfig> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8082);

    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let channel_encryption_key =
        env::var("CHANNEL_ENCRYPTION_KEY").context("CHANNEL_ENCRYPTION_KEY must be set")?;

    let default_rate_limit_per_second = env::var("DEFAULT_RATE_LIMIT_PER_SECOND")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(80);

    let default_monthly_message_limit = env::var("DEFAULT_MONTHLY_MESSAGE_LIMIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100_000);

    let provider_base_url = env::var("WHATSAPP_PROVIDER_BASE_URL")
        .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string());

    let provider_request_timeout_seconds = env::var("PROVIDER_REQUEST_TIMEOUT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP")
        .or_else(|_| env::var("KAFKA_BROKERS"))
        .unwrap_or_else(|_| "localhost:9092".to_string());

    let jwt_issuer = normalize_optional(env::var("JWT_ISSUER").unwrap_or_default());
    let jwt_audience = normalize_optional(env::var("JWT_AUDIENCE").unwrap_or_default());

    let webhook_dedup_ttl_seconds = env::var("WEBHOOK_DEDUP_TTL_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);

    Ok(AppConfig {
        database_url,
        host,
        port,
        redis_url,
        channel_encryption_key,
        default_rate_limit_per_second,
        default_monthly_message_limit,
        provider_base_url,
        provider_request_timeout_seconds,
        kafka_bootstrap,
        jwt_issuer,
        jwt_audience,
        webhook_dedup_ttl_seconds,
    })
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_app_config_requires_database_url() {
        env::remove_var("DATABASE_URL");
        assert!(load_app_config().is_err());
    }
}
