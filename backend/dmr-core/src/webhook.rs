// src/webhook.rs

use chrono::NaiveDateTime;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_WEBHOOK_BASE: &str = "https://n8n-v2.mcp.hyperplane.dev";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook base URL '{base}': {source}")]
    InvalidBase {
        #[source]
        source: url::ParseError,
        base: String,
    },
    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}

/// Body posted instead of the report when a run fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub status: &'static str,
    pub error: String,
    pub resort_name: String,
    pub report_date: String,
    pub timestamp: String,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>, resort_name: &str, report_date: NaiveDateTime, now: NaiveDateTime) -> Self {
        ErrorPayload {
            status: "error",
            error: error.into(),
            resort_name: resort_name.to_string(),
            report_date: report_date.format("%Y-%m-%d").to_string(),
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        }
    }
}

/// "Spider Mountain " -> "spider-mountain"
pub fn resort_slug(resort_name: &str) -> String {
    resort_name.trim().to_lowercase().replace(' ', "-")
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    base: Url,
}

impl WebhookClient {
    pub fn new(base: &str) -> Result<Self, WebhookError> {
        let base = Url::parse(base).map_err(|source| WebhookError::InvalidBase {
            source,
            base: base.to_string(),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(WebhookClient { client, base })
    }

    /// Test and production collector endpoints for a resort, in that order.
    pub fn endpoints(&self, resort_name: &str) -> Vec<String> {
        let slug = resort_slug(resort_name);
        let base = self.base.as_str().trim_end_matches('/');
        vec![
            format!("{}/webhook-test/{}-dmr-collector", base, slug),
            format!("{}/webhook/{}-dmr-collector", base, slug),
        ]
    }

    /// Posts `body` to every endpoint. Failures are logged and reported per URL, never raised.
    pub async fn send<T: Serialize + ?Sized>(&self, resort_name: &str, body: &T) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for url in self.endpoints(resort_name) {
            let response = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .json(body)
                .send()
                .await;
            let delivered = match response {
                Ok(resp) if is_accepted(resp.status()) => true,
                Ok(resp) => {
                    warn!("Webhook failed for {}: {} (HTTP {})", resort_name, url, resp.status().as_u16());
                    false
                }
                Err(e) if e.is_timeout() => {
                    warn!("Webhook timeout for {}: {}", resort_name, url);
                    false
                }
                Err(e) => {
                    warn!("Webhook error for {}: {} - {}", resort_name, url, e);
                    false
                }
            };
            results.insert(url, delivered);
        }
        let delivered = results.values().filter(|ok| **ok).count();
        if delivered > 0 {
            info!(
                "Report data sent to {}/{} webhooks for {}",
                delivered,
                results.len(),
                resort_name
            );
        }
        results
    }
}

fn is_accepted(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 202)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_trimmed_lowercase_and_dashed() {
        assert_eq!(resort_slug("  Spider Mountain "), "spider-mountain");
        assert_eq!(resort_slug("PURGATORY"), "purgatory");
    }

    #[test]
    fn endpoints_follow_collector_layout() {
        let client = WebhookClient::new("https://hooks.example.com/").unwrap();
        assert_eq!(
            client.endpoints("Lee Canyon"),
            vec![
                "https://hooks.example.com/webhook-test/lee-canyon-dmr-collector".to_string(),
                "https://hooks.example.com/webhook/lee-canyon-dmr-collector".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_base_is_rejected() {
        assert!(matches!(
            WebhookClient::new("not a url"),
            Err(WebhookError::InvalidBase { .. })
        ));
    }

    #[test]
    fn accepted_statuses() {
        assert!(is_accepted(StatusCode::OK));
        assert!(is_accepted(StatusCode::ACCEPTED));
        assert!(!is_accepted(StatusCode::NO_CONTENT));
        assert!(!is_accepted(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn error_payload_shape() {
        let at = NaiveDateTime::parse_from_str("2025-03-05 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let now = NaiveDateTime::parse_from_str("2025-03-06 07:15:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let json = serde_json::to_value(ErrorPayload::new("boom", "Sipapu", at, now)).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["report_date"], "2025-03-05");
        assert_eq!(json["timestamp"], "2025-03-06T07:15:00.000000");
    }
}
