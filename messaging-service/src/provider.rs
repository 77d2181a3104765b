use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Thin client over the WhatsApp Cloud API's message-send endpoint. Kept
/// separate from the handler layer so the outbox worker can reuse it when
/// actually dispatching a queued message.
#[derive(Clone)]
pub struct WhatsAppProvider {
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    #[serde(flatten)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct SendResponseMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SendResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct SendErrorBody {
    error: SendErrorDetail,
}

#[derive(Debug, Deserialize)]
struct SendErrorDetail {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error_subcode: Option<i64>,
    message: String,
}

#[derive(Debug)]
pub enum ProviderOutcome {
    Sent { whatsapp_message_id: String },
    Failed { error_code: String, message: String },
}

impl WhatsAppProvider {
    pub fn new(base_url: String, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(timeout_seconds)).build()?;
        Ok(Self { client, base_url })
    }

    /// Sends a single message through a channel's phone number. `content`
    /// is the already-built message-type-specific JSON object (e.g. a
    /// `{"text": {"body": "..."}}` or template payload).
    pub async fn send_message(
        &self,
        phone_number_id: &str,
        access_token: &str,
        to_phone: &str,
        message_type: &str,
        content: Value,
    ) -> anyhow::Result<ProviderOutcome> {
        let url = format!("{}/{}/messages", self.base_url, phone_number_id);
        let body = SendRequest {
            messaging_product: "whatsapp",
            to: to_phone,
            message_type,
            content,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            let parsed: SendResponse = response.json().await?;
            let id = parsed
                .messages
                .into_iter()
                .next()
                .map(|m| m.id)
                .unwrap_or_default();
            return Ok(ProviderOutcome::Sent { whatsapp_message_id: id });
        }

        let error_body: Result<SendErrorBody, _> = response.json().await;
        let (error_code, message) = match error_body {
            Ok(body) => (
                classify_error_code(body.error.code, body.error.error_subcode),
                body.error.message,
            ),
            Err(_) => (format!("http_{}", status.as_u16()), "provider request failed".to_string()),
        };
        Ok(ProviderOutcome::Failed { error_code, message })
    }
}

/// Maps the provider's numeric error codes to the small set of machine
/// codes the send-pipeline's failure handling switches on (rate limit,
/// invalid token, account suspended), falling back to a generic bucket for
/// anything else so retry logic still has something to act on.
fn classify_error_code(code: Option<i64>, subcode: Option<i64>) -> String {
    match (code, subcode) {
        (Some(4) | Some(80007), _) => "rate_limited".to_string(),
        (Some(190), _) => "token_invalid".to_string(),
        (Some(368), _) | (_, Some(2018001)) => "account_suspended".to_string(),
        (Some(code), _) => format!("provider_error_{code}"),
        (None, _) => "provider_error_unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_error_codes() {
        assert_eq!(classify_error_code(Some(190), None), "token_invalid");
        assert_eq!(classify_error_code(Some(4), None), "rate_limited");
        assert_eq!(classify_error_code(Some(368), None), "account_suspended");
        assert_eq!(classify_error_code(Some(999), None), "provider_error_999");
    }
}
