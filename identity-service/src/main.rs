use std::{env, fs, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use common_audit::AuditProducer;
use common_auth::{JwtConfig, JwtVerifier};
use reqwest::Client;
use serde::Serialize;
use sqlx::PgPool;
use tokio::{
    net::TcpListener,
    time::{interval, Duration, MissedTickBehavior},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

use identity_service::config::load_app_config;
use identity_service::handlers::{api_key, auth, mfa, organization, role};
use identity_service::metrics::IdentityMetrics;
use identity_service::notifications::KafkaProducer;
use identity_service::tokens::{JwkKey, TokenConfig, TokenSigner};
use identity_service::AppState;

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            warn!(?err, "failed to render metrics");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .body(axum::body::Body::from("metrics unavailable"))
                .expect("failed to build metrics response")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(load_app_config()?);
    let db_pool = PgPool::connect(&config.database_url).await?;

    let jwt_verifier = build_jwt_verifier_from_env(&config).await?;
    spawn_jwks_refresh(jwt_verifier.clone());

    let token_signer = build_token_signer(&db_pool, &config).await?;

    let audit = build_audit_producer()?;
    let security_producer = build_security_producer()?;
    let http_client = Client::builder().build().context("failed to build HTTP client")?;

    let state = AppState {
        db: db_pool,
        jwt_verifier,
        token_signer,
        config: config.clone(),
        audit,
        security_producer,
        http_client,
        metrics: Arc::new(IdentityMetrics::new()?),
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:3001"),
            HeaderValue::from_static("http://localhost:5173"),
        ]))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-tenant-id"),
            HeaderName::from_static("x-trace-id"),
        ])
        .allow_credentials(true);

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/jwks", get(jwks))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/password-reset/request", post(auth::request_password_reset))
        .route("/auth/password-reset/confirm", post(auth::confirm_password_reset))
        .route("/auth/email-verify/request", post(auth::request_email_verification))
        .route("/auth/email-verify/confirm", post(auth::confirm_email_verification))
        .route("/mfa/enroll", post(mfa::enroll))
        .route("/mfa/verify", post(mfa::verify))
        .route("/organizations", post(organization::create))
        .route("/organizations/me", get(organization::get_mine))
        .route(
            "/organizations/:organization_id",
            get(organization::get).put(organization::update),
        )
        .route("/roles", get(role::list).post(role::create))
        .route("/roles/:role_id", put(role::update))
        .route("/roles/assign", post(role::assign))
        .route("/roles/revoke", post(role::revoke))
        .route("/roles/users/:user_id", get(role::for_user))
        .route("/api-keys", get(api_key::list).post(api_key::create))
        .route("/api-keys/:api_key_id/revoke", post(api_key::revoke))
        .with_state(state)
        .layer(cors);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));

    info!(%addr, "starting identity-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_jwt_verifier_from_env(config: &identity_service::config::AppConfig) -> anyhow::Result<Arc<JwtVerifier>> {
    let mut jwt_config = JwtConfig::new();
    if let Some(issuer) = &config.jwt_issuer {
        jwt_config = jwt_config.with_issuer(issuer.clone());
    }
    if let Some(audience) = &config.jwt_audience {
        jwt_config = jwt_config.with_audience(audience.clone());
    }
    if let Ok(value) = env::var("JWT_LEEWAY_SECONDS") {
        if let Ok(leeway) = value.parse::<u32>() {
            jwt_config = jwt_config.with_leeway(leeway);
        }
    }

    let mut builder = JwtVerifier::builder(jwt_config);

    if let Ok(url) = env::var("JWT_JWKS_URL") {
        info!(jwks_url = %url, "configuring JWKS fetcher");
        builder = builder.with_jwks_url(url);
    }

    if let Some(pem) = read_secret_env("JWT_DEV_PUBLIC_KEY_PEM")? {
        warn!("using JWT_DEV_PUBLIC_KEY_PEM for verification; do not enable in production");
        builder = builder.with_rsa_pem("local-dev", pem.as_bytes()).map_err(anyhow::Error::from)?;
    }

    let verifier = builder.build().await.map_err(anyhow::Error::from)?;
    info!("JWT verifier initialised");
    Ok(Arc::new(verifier))
}

async fn build_token_signer(db_pool: &PgPool, config: &identity_service::config::AppConfig) -> anyhow::Result<Arc<TokenSigner>> {
    let fallback_private = read_secret_env("JWT_DEV_PRIVATE_KEY_PEM")?;
    let token_config = TokenConfig {
        issuer: config.jwt_issuer.clone(),
        audience: config.jwt_audience.clone(),
        access_ttl_seconds: config.access_ttl_seconds,
    };

    let signer = TokenSigner::new(db_pool.clone(), token_config, fallback_private.as_deref()).await?;
    info!("token signer initialised");
    Ok(Arc::new(signer))
}

#[cfg(feature = "kafka")]
fn build_audit_producer() -> anyhow::Result<AuditProducer> {
    let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP")
        .or_else(|_| env::var("KAFKA_BROKERS"))
        .unwrap_or_else(|_| "localhost:9092".to_string());
    let topic = env::var("AUDIT_KAFKA_TOPIC").unwrap_or_else(|_| "identity.audit".to_string());

    let producer: rdkafka::producer::FutureProducer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &kafka_bootstrap)
        .create()
        .context("failed to create Kafka producer for audit sink")?;

    let sink = common_audit::KafkaAuditSink::new(producer, topic);
    Ok(AuditProducer::new(Arc::new(sink), "identity-service"))
}

#[cfg(not(feature = "kafka"))]
fn build_audit_producer() -> anyhow::Result<AuditProducer> {
    Ok(AuditProducer::noop("identity-service"))
}

#[cfg(feature = "kafka")]
fn build_security_producer() -> anyhow::Result<Arc<dyn KafkaProducer>> {
    let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP")
        .or_else(|_| env::var("KAFKA_BROKERS"))
        .unwrap_or_else(|_| "localhost:9092".to_string());

    let producer: rdkafka::producer::FutureProducer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &kafka_bootstrap)
        .create()
        .context("failed to create Kafka producer for security activity sink")?;

    Ok(Arc::new(producer))
}

#[cfg(not(feature = "kafka"))]
fn build_security_producer() -> anyhow::Result<Arc<dyn KafkaProducer>> {
    Ok(Arc::new(identity_service::notifications::NoopProducer))
}

fn read_secret_env(key: &str) -> anyhow::Result<Option<String>> {
    let file_var = format!("{key}_FILE");
    if let Ok(path) = env::var(&file_var) {
        let contents = fs::read_to_string(&path).with_context(|| format!("failed to read {file_var} from {path}"))?;
        return Ok(Some(contents));
    }
    Ok(env::var(key).ok())
}

fn spawn_jwks_refresh(verifier: Arc<JwtVerifier>) {
    let Some(fetcher) = verifier.jwks_fetcher() else {
        return;
    };

    let refresh_secs = env::var("JWKS_REFRESH_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(300)
        .max(60);
    let interval_duration = Duration::from_secs(refresh_secs);
    let url = fetcher.url().to_owned();
    let handle = verifier.clone();

    tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match handle.refresh_jwks().await {
                Ok(count) => debug!(count, jwks_url = %url, "refreshed JWKS keys"),
                Err(err) => warn!(error = %err, jwks_url = %url, "failed to refresh JWKS keys"),
            }
        }
    });
}

async fn jwks(State(state): State<AppState>) -> Result<Json<JwksResponse>, StatusCode> {
    match state.token_signer.jwks().await {
        Ok(keys) => Ok(Json(JwksResponse { keys })),
        Err(err) => {
            warn!(error = %err, "unable to load JWKS");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Serialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}
