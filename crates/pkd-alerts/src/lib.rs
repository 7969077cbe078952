//! pkd-alerts
//!
//! Alert delivery boundary for hard-stop activations. Only the sink trait
//! and the two shipped sinks live here; delivery guarantees are the
//! receiving system's problem.

use anyhow::{Context, Result};
use async_trait::async_trait;
use pkd_schemas::AlertPayload;
use tracing::warn;

/// Abstract alert sink. Implementations must be object-safe so callers can
/// hold a `Box<dyn AlertSink>` without knowing the transport.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Human-readable name identifying this sink (e.g. `"webhook"`).
    fn name(&self) -> &'static str;

    /// Deliver one alert. Failures are the caller's to log; a failed alert
    /// must never block the run loop.
    async fn send(&self, alert: &AlertPayload) -> Result<()>;
}

/// Sink that logs the alert at WARN level. The default when no webhook is
/// configured.
pub struct ConsoleSink;

#[async_trait]
impl AlertSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        warn!(
            reason = %alert.reason,
            daily_loss_micros = alert.daily_loss_micros,
            consecutive_losses = alert.consecutive_losses,
            bankroll_pct = alert.bankroll_pct,
            trace_id = %alert.trace_id,
            "hard stop alert"
        );
        Ok(())
    }
}

/// Sink that POSTs the alert payload as JSON to a configured webhook URL.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("webhook alert send failed")?;
        resp.error_for_status()
            .context("webhook alert rejected by receiver")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use uuid::Uuid;

    fn alert() -> AlertPayload {
        AlertPayload {
            reason: "HARD_STOP_DAILY_LOSS_LIMIT: daily loss 1200000000 exceeds limit 1000000000"
                .to_string(),
            daily_loss_micros: 1_200_000_000,
            consecutive_losses: 1,
            bankroll_pct: 0.01,
            trace_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn console_sink_never_fails() {
        let sink = ConsoleSink;
        assert_eq!(sink.name(), "console");
        sink.send(&alert()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_sink_posts_the_payload_as_json() {
        let server = MockServer::start();
        let a = alert();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/alerts")
                .json_body_partial(format!(
                    r#"{{"reason": "{}", "consecutive_losses": 1}}"#,
                    a.reason
                ));
            then.status(200);
        });

        let sink = WebhookSink::new(server.url("/alerts"));
        sink.send(&a).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn webhook_sink_surfaces_receiver_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/alerts");
            then.status(500);
        });

        let sink = WebhookSink::new(server.url("/alerts"));
        let err = sink.send(&alert()).await.unwrap_err();
        assert!(format!("{err:#}").contains("rejected"));
    }
}
