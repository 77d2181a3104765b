use std::env;
use std::time::Duration;

use anyhow::Context;
use common_crypto::MasterKey;
use common_db::outbox::{claim_pending, mark_failed, mark_processed, PendingOutboxRow};
use messaging_service::domain::message::Message;
use messaging_service::provider::{ProviderOutcome, WhatsAppProvider};
use messaging_service::repo::{channel_repo, message_repo};
use serde::Deserialize;
use sqlx::PgPool;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

const SEND_REQUESTED_EVENT: &str = "message.send_requested";

struct WorkerConfig {
    database_url: String,
    channel_encryption_key: String,
    provider_base_url: String,
    provider_request_timeout_seconds: u64,
    poll_interval_seconds: u64,
    batch_size: i64,
}

fn load_worker_config() -> anyhow::Result<WorkerConfig> {
    Ok(WorkerConfig {
        database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        channel_encryption_key: env::var("CHANNEL_ENCRYPTION_KEY").context("CHANNEL_ENCRYPTION_KEY must be set")?,
        provider_base_url: env::var("WHATSAPP_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".to_string()),
        provider_request_timeout_seconds: env::var("PROVIDER_REQUEST_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10),
        poll_interval_seconds: env::var("OUTBOX_POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2),
        batch_size: env::var("OUTBOX_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
    })
}

#[derive(Deserialize)]
struct SendRequestedPayload {
    aggregate_id: Uuid,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = load_worker_config()?;
    let db = PgPool::connect(&config.database_url).await?;
    let master_key = MasterKey::from_base64(&config.channel_encryption_key).context("invalid CHANNEL_ENCRYPTION_KEY")?;
    let provider = WhatsAppProvider::new(config.provider_base_url.clone(), config.provider_request_timeout_seconds)?;

    info!("starting outbox-worker");

    let mut ticker = interval(Duration::from_secs(config.poll_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = poll_once(&db, &master_key, &provider, config.batch_size).await {
            error!(error = %err, "outbox poll iteration failed");
        }
    }
}

/// Claims and processes one batch inside a single transaction: `claim_pending`'s
/// `FOR UPDATE SKIP LOCKED` only keeps a row invisible to other workers for the
/// life of the transaction that took the lock, so the claim and every row's
/// outcome must commit together rather than over separate connections.
async fn poll_once(db: &PgPool, master_key: &MasterKey, provider: &WhatsAppProvider, batch_size: i64) -> anyhow::Result<()> {
    let mut tx = db.begin().await?;
    let rows = claim_pending(&mut tx, batch_size).await?;
    if rows.is_empty() {
        tx.rollback().await?;
        return Ok(());
    }
    info!(count = rows.len(), "claimed outbox rows");

    for row in rows {
        if row.event_type != SEND_REQUESTED_EVENT {
            // No other consumer is registered for this event type in this
            // system; nothing further to dispatch.
            mark_processed(&mut tx, row.id).await?;
            continue;
        }

        match dispatch_send(&mut tx, master_key, provider, &row).await {
            Ok(()) => mark_processed(&mut tx, row.id).await?,
            Err(err) => {
                warn!(event_id = %row.id, error = %err, "dispatch attempt failed");
                mark_failed(&mut tx, row.id, row.retry_count, &err.to_string()).await?;
            }
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn dispatch_send(
    conn: &mut sqlx::PgConnection,
    master_key: &MasterKey,
    provider: &WhatsAppProvider,
    row: &PendingOutboxRow,
) -> anyhow::Result<()> {
    let payload: SendRequestedPayload = serde_json::from_value(row.payload.clone())
        .context("malformed message.send_requested payload")?;
    let organization_id = row.organization_id.context("send-requested event missing organization_id")?;

    let mut message = message_repo::get_by_id(conn, organization_id, payload.aggregate_id)
        .await?
        .context("message referenced by outbox row no longer exists")?;

    if message.status != messaging_service::domain::message::MessageStatus::Queued {
        // Already advanced by a webhook status update or a previous worker
        // pass; nothing left to send.
        return Ok(());
    }

    let channel = channel_repo::get_by_id(conn, organization_id, message.channel_id)
        .await?
        .context("channel referenced by message no longer exists")?;

    if !channel.is_sendable() {
        apply_send_failure(conn, &mut message, "channel_unavailable".to_string()).await?;
        return Ok(());
    }

    let access_token = channel.decrypt_access_token(master_key)?;
    let (message_type, content) = split_message_type(message.content.clone());

    let outcome = provider
        .send_message(&channel.phone_number_id, &access_token, &message.to_phone, &message_type, content)
        .await?;

    match outcome {
        ProviderOutcome::Sent { whatsapp_message_id } => {
            message.mark_sent(whatsapp_message_id)?;
            message_repo::update(conn, &message).await?;
        }
        ProviderOutcome::Failed { error_code, message: provider_message } => {
            warn!(message_id = %message.id, error_code, provider_message, "provider rejected send");
            apply_send_failure(conn, &mut message, error_code).await?;
        }
    }

    Ok(())
}

async fn apply_send_failure(conn: &mut sqlx::PgConnection, message: &mut Message, error_code: String) -> anyhow::Result<()> {
    message.mark_failed(error_code)?;
    message_repo::update(conn, message).await?;
    Ok(())
}

/// The message's stored content carries the provider's own `type`
/// discriminator alongside its type-specific body (e.g.
/// `{"type": "text", "text": {"body": "..."}}`); the provider client wants
/// these split into a type string plus the remaining flattened object.
fn split_message_type(mut content: serde_json::Value) -> (String, serde_json::Value) {
    let message_type = content
        .as_object_mut()
        .and_then(|obj| obj.remove("type"))
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "text".to_string());
    (message_type, content)
}
