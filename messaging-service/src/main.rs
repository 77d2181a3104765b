use std::{env, fs, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, StatusCode,
    },
    response::Response,
    routing::{get, post},
    Router,
};
use common_audit::AuditProducer;
use common_auth::{JwtConfig, JwtVerifier};
use common_crypto::MasterKey;
use redis::aio::ConnectionManager;
use reqwest::Client;
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use messaging_service::config::load_app_config;
use messaging_service::handlers::{channel, message, template, webhook};
use messaging_service::metrics::MessagingMetrics;
use messaging_service::rate_limiter::{RedisTokenBucket, TokenBucketLimiter};
use messaging_service::AppState;

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
    let master_key = Arc::new(
        MasterKey::from_base64(&config.channel_encryption_key).context("invalid CHANNEL_ENCRYPTION_KEY")?,
    );

    let rate_limiter: Arc<dyn TokenBucketLimiter> = Arc::new(
        RedisTokenBucket::new(&config.redis_url, "messaging:bucket".to_string())
            .await
            .context("failed to connect rate limiter to redis")?,
    );

    let dedup_client = redis::Client::open(config.redis_url.as_str()).context("failed to create redis client")?;
    let dedup_cache = ConnectionManager::new(dedup_client)
        .await
        .context("failed to create dedup cache connection")?;

    let audit = build_audit_producer()?;
    let http_client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.provider_request_timeout_seconds))
        .build()
        .context("failed to build HTTP client")?;

    let state = AppState {
        db: db_pool,
        jwt_verifier,
        config: config.clone(),
        audit,
        http_client,
        metrics: Arc::new(MessagingMetrics::new()?),
        master_key,
        rate_limiter,
        dedup_cache,
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
        .route("/channels", get(channel::list).post(channel::create))
        .route(
            "/channels/:channel_id",
            get(channel::get).put(channel::update).delete(channel::delete),
        )
        .route("/messages/send", post(message::send))
        .route("/messages/send-bulk", post(message::send_bulk))
        .route("/messages", get(message::list))
        .route("/messages/:message_id", get(message::get))
        .route("/messages/:message_id/retry", post(message::retry))
        .route("/templates", get(template::list).post(template::create))
        .route("/templates/:template_id/submit", post(template::submit))
        .route("/templates/:template_id/test", post(template::test))
        .route(
            "/webhooks/whatsapp/:channel_id",
            get(webhook::verify).post(webhook::receive),
        )
        .with_state(state)
        .layer(cors);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));

    info!(%addr, "starting messaging-service");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_jwt_verifier_from_env(config: &messaging_service::config::AppConfig) -> anyhow::Result<Arc<JwtVerifier>> {
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

#[cfg(feature = "kafka")]
fn build_audit_producer() -> anyhow::Result<AuditProducer> {
    let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP")
        .or_else(|_| env::var("KAFKA_BROKERS"))
        .unwrap_or_else(|_| "localhost:9092".to_string());
    let topic = env::var("AUDIT_KAFKA_TOPIC").unwrap_or_else(|_| "messaging.audit".to_string());

    let producer: rdkafka::producer::FutureProducer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", &kafka_bootstrap)
        .create()
        .context("failed to create Kafka producer for audit sink")?;

    let sink = common_audit::KafkaAuditSink::new(producer, topic);
    Ok(AuditProducer::new(Arc::new(sink), "messaging-service"))
}

#[cfg(not(feature = "kafka"))]
fn build_audit_producer() -> anyhow::Result<AuditProducer> {
    Ok(AuditProducer::noop("messaging-service"))
}

fn read_secret_env(key: &str) -> anyhow::Result<Option<String>> {
    let file_var = format!("{key}_FILE");
    if let Ok(path) = env::var(&file_var) {
        let contents = fs::read_to_string(&path).with_context(|| format!("failed to read {file_var} from {path}"))?;
        return Ok(Some(contents));
    }
    Ok(env::var(key).ok())
}
