use anyhow::{anyhow, Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSameSite {
    Lax,
    Strict,
    None,
}

impl CookieSameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieSameSite::Lax => "Lax",
            CookieSameSite::Strict => "Strict",
            CookieSameSite::None => "None",
        }
    }
}

/// Runtime configuration for identity-service, loaded from plain
/// environment variables rather than a layered config file — matching the
/// rest of this codebase's services.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Issuer/audience checks are optional; when unset, tokens are issued
    /// and verified without either claim.
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub access_ttl_seconds: i64,
    pub mfa_issuer: String,
    pub mfa_required_roles: Vec<String>,
    pub refresh_cookie_name: String,
    pub refresh_cookie_domain: Option<String>,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_same_site: CookieSameSite,
    pub kafka_bootstrap: String,
    pub mfa_activity_topic: String,
    pub suspicious_webhook_url: Option<String>,
    pub suspicious_webhook_bearer: Option<String>,
}

pub fn load_app_config() -> Result<AppConfig> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8081);

    let jwt_issuer = normalize_optional(env::var("JWT_ISSUER").unwrap_or_default());
    let jwt_audience = normalize_optional(env::var("JWT_AUDIENCE").unwrap_or_default());

    let access_ttl_seconds = env::var("TOKEN_ACCESS_TTL_SECONDS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(900);

    let mfa_issuer = env::var("MFA_ISSUER").unwrap_or_else(|_| "Identity".to_string());
    let mfa_required_roles = env::var("MFA_REQUIRED_ROLES")
        .ok()
        .map(|value| parse_list(&value))
        .unwrap_or_else(|| vec!["super_admin".to_string(), "reseller_admin".to_string()]);

    let refresh_cookie_name =
        env::var("REFRESH_COOKIE_NAME").unwrap_or_else(|_| "identity_refresh".to_string());
    let refresh_cookie_domain = normalize_optional(env::var("REFRESH_COOKIE_DOMAIN").unwrap_or_default());
    let refresh_cookie_secure = bool_from_env("REFRESH_COOKIE_SECURE").unwrap_or(true);
    let refresh_cookie_same_site = env::var("REFRESH_COOKIE_SAMESITE")
        .ok()
        .map(|value| parse_same_site(&value))
        .transpose()
        .context("Failed to parse REFRESH_COOKIE_SAMESITE")?
        .unwrap_or(CookieSameSite::Lax);

    let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP")
        .or_else(|_| env::var("KAFKA_BROKERS"))
        .unwrap_or_else(|_| "localhost:9092".to_string());

    let mfa_activity_topic =
        env::var("SECURITY_MFA_ACTIVITY_TOPIC").unwrap_or_else(|_| "security.mfa.activity".to_string());
    let suspicious_webhook_url = normalize_optional(env::var("SECURITY_SUSPICIOUS_WEBHOOK_URL").unwrap_or_default());
    let suspicious_webhook_bearer =
        normalize_optional(env::var("SECURITY_SUSPICIOUS_WEBHOOK_BEARER").unwrap_or_default());

    Ok(AppConfig {
        database_url,
        host,
        port,
        jwt_issuer,
        jwt_audience,
        access_ttl_seconds,
        mfa_issuer,
        mfa_required_roles,
        refresh_cookie_name,
        refresh_cookie_domain,
        refresh_cookie_secure,
        refresh_cookie_same_site,
        kafka_bootstrap,
        mfa_activity_topic,
        suspicious_webhook_url,
        suspicious_webhook_bearer,
    })
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .filter_map(|item| {
            let item = item.trim();
            if item.is_empty() {
                None
            } else {
                Some(item.to_ascii_lowercase())
            }
        })
        .collect()
}

fn normalize_optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_same_site(value: &str) -> Result<CookieSameSite> {
    match value.trim().to_ascii_lowercase().as_str() {
        "lax" => Ok(CookieSameSite::Lax),
        "strict" => Ok(CookieSameSite::Strict),
        "none" => Ok(CookieSameSite::None),
        other => Err(anyhow!(
            "Unsupported cookie same-site policy '{other}'. Use Lax, Strict, or None."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_normalises_case_and_separators() {
        let roles = parse_list("SuperAdmin,reseller_admin tenant_admin");
        assert_eq!(
            roles,
            vec!["superadmin", "reseller_admin", "tenant_admin"]
        );
    }

    #[test]
    fn bool_from_env_parses_truthy_values() {
        std::env::set_var("IDENTITY_CFG_TEST_BOOL", "yes");
        assert_eq!(bool_from_env("IDENTITY_CFG_TEST_BOOL"), Some(true));
    }
}
