/// Runtime configuration for JWT verification.
///
/// Issuer/audience checks are optional: when unset, the verifier accepts
/// tokens regardless of `iss`/`aud`. When set, they are enforced strictly.
#[derive(Debug, Clone, Default)]
pub struct JwtConfig {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
}

impl JwtConfig {
    /// Construct config with sensible defaults (30 second leeway) and no
    /// issuer/audience enforcement.
    pub fn new() -> Self {
        Self {
            issuer: None,
            audience: None,
            leeway_seconds: 30,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
