use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct TokenConfig {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub access_ttl_seconds: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            // spec.md 4.5: access tokens are short-lived, 15 minutes.
            access_ttl_seconds: 15 * 60,
        }
    }
}

pub struct TokenSigner {
    pool: PgPool,
    config: TokenConfig,
    active_key: ActiveKey,
    fallback_jwk: Option<JwkKey>,
}

struct ActiveKey {
    kid: String,
    encoding_key: EncodingKey,
}

#[derive(Clone, Serialize)]
pub struct JwkKey {
    pub kty: &'static str,
    #[serde(rename = "use")]
    pub use_: &'static str,
    pub kid: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

/// Principal a freshly-authenticated (or refreshed) session is minted for.
pub struct TokenSubject {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

pub struct IssuedAccessToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in: i64,
    pub token_type: &'static str,
}

struct DbSigningKey {
    kid: String,
    private_pem: String,
    alg: String,
    n: String,
    e: String,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    sub: String,
    #[serde(rename = "tid")]
    tenant_id: String,
    email: &'a str,
    roles: &'a [String],
    permissions: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<&'a str>,
    exp: i64,
    iat: i64,
    jti: String,
    token_type: &'static str,
}

impl TokenSigner {
    pub async fn new(
        pool: PgPool,
        config: TokenConfig,
        fallback_private_pem: Option<&str>,
    ) -> Result<Self> {
        let db_key = Self::load_active_key(&pool).await?;

        let (active_key, fallback_jwk) = match db_key {
            Some(row) => {
                let encoding_key = EncodingKey::from_rsa_pem(row.private_pem.as_bytes())
                    .map_err(|err| anyhow!("Failed to parse active private key: {err}"))?;
                let jwk = JwkKey {
                    kty: "RSA",
                    use_: "sig",
                    kid: row.kid.clone(),
                    alg: row.alg.clone(),
                    n: row.n,
                    e: row.e,
                };
                (
                    ActiveKey {
                        kid: row.kid,
                        encoding_key,
                    },
                    Some(jwk),
                )
            }
            None => {
                let pem = fallback_private_pem.ok_or_else(|| {
                    anyhow!("No signing key configured. Provide database key or JWT_DEV_PRIVATE_KEY_PEM")
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|err| anyhow!("Failed to parse JWT_DEV_PRIVATE_KEY_PEM: {err}"))?;
                let (n, e) = Self::components_from_private_pem(pem)?;
                let jwk = JwkKey {
                    kty: "RSA",
                    use_: "sig",
                    kid: "local-dev".to_string(),
                    alg: "RS256".to_string(),
                    n,
                    e,
                };
                (
                    ActiveKey {
                        kid: jwk.kid.clone(),
                        encoding_key,
                    },
                    Some(jwk),
                )
            }
        };

        Ok(Self {
            pool,
            config,
            active_key,
            fallback_jwk,
        })
    }

    async fn load_active_key(pool: &PgPool) -> Result<Option<DbSigningKey>> {
        let row = sqlx::query(
            "SELECT kid, private_pem, alg, n, e FROM auth_signing_keys WHERE active = TRUE ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(pool)
        .await?;

        if let Some(row) = row {
            Ok(Some(DbSigningKey {
                kid: row.try_get("kid")?,
                private_pem: row.try_get("private_pem")?,
                alg: row.try_get("alg")?,
                n: row.try_get("n")?,
                e: row.try_get("e")?,
            }))
        } else {
            Ok(None)
        }
    }

    fn components_from_private_pem(pem: &str) -> Result<(String, String)> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|err| anyhow!("Failed to parse RSA private key: {err}"))?;
        let public = private.to_public_key();
        let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
        Ok((n, e))
    }

    pub async fn jwks(&self) -> Result<Vec<JwkKey>> {
        let rows = sqlx::query(
            "SELECT kid, alg, n, e FROM auth_signing_keys WHERE active = TRUE ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(JwkKey {
                kty: "RSA",
                use_: "sig",
                kid: row.try_get("kid")?,
                alg: row.try_get("alg")?,
                n: row.try_get("n")?,
                e: row.try_get("e")?,
            });
        }

        if keys.is_empty() {
            if let Some(fallback) = &self.fallback_jwk {
                keys.push(fallback.clone());
            }
        }

        if keys.is_empty() {
            Err(anyhow!("No signing keys available for JWKS response"))
        } else {
            Ok(keys)
        }
    }

    /// Signs a short-lived access token for `subject`. Refresh tokens are
    /// minted separately by `domain::refresh_token::issue` since they never
    /// go through JWT signing.
    pub fn issue_access_token(&self, subject: &TokenSubject) -> Result<IssuedAccessToken> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.config.access_ttl_seconds);

        let claims = AccessClaims {
            sub: subject.user_id.to_string(),
            tenant_id: subject.organization_id.to_string(),
            email: &subject.email,
            roles: &subject.roles,
            permissions: &subject.permissions,
            iss: self.config.issuer.as_deref(),
            aud: self.config.audience.as_deref(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: "access",
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.active_key.kid.clone());

        let access_token = encode(&header, &claims, &self.active_key.encoding_key)
            .map_err(|err| anyhow!("Failed to sign access token: {err}"))?;

        Ok(IssuedAccessToken {
            access_token,
            expires_at: exp,
            expires_in: self.config.access_ttl_seconds,
            token_type: "Bearer",
        })
    }
}
