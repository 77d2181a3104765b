use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct MessagingMetrics {
    registry: Registry,
    messages_sent: IntCounterVec,
    rate_limit_decisions: IntCounterVec,
    webhook_events: IntCounterVec,
    channel_events: IntCounterVec,
}

impl MessagingMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_sent = IntCounterVec::new(
            Opts::new("messaging_messages_total", "Count of outbound messages grouped by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_sent.clone()))?;

        let rate_limit_decisions = IntCounterVec::new(
            Opts::new("messaging_rate_limit_decisions_total", "Count of token-bucket decisions"),
            &["decision"],
        )?;
        registry.register(Box::new(rate_limit_decisions.clone()))?;

        let webhook_events = IntCounterVec::new(
            Opts::new("messaging_webhook_events_total", "Count of inbound webhook events grouped by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(webhook_events.clone()))?;

        let channel_events = IntCounterVec::new(
            Opts::new("messaging_channel_events_total", "Count of channel lifecycle events"),
            &["event"],
        )?;
        registry.register(Box::new(channel_events.clone()))?;

        Ok(Self {
            registry,
            messages_sent,
            rate_limit_decisions,
            webhook_events,
            channel_events,
        })
    }

    pub fn message_sent(&self, outcome: &str) {
        self.messages_sent.with_label_values(&[outcome]).inc();
    }

    pub fn rate_limit_decision(&self, decision: &str) {
        self.rate_limit_decisions.with_label_values(&[decision]).inc();
    }

    pub fn webhook_event(&self, outcome: &str) {
        self.webhook_events.with_label_values(&[outcome]).inc();
    }

    pub fn channel_event(&self, event: &str) {
        self.channel_events.with_label_values(&[event]).inc();
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
