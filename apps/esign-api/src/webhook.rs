//! Outbound workflow notifications

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{Map, Value};

pub const DOCUMENT_VIEWED: &str = "document.viewed";
pub const DOCUMENT_SIGNED: &str = "document.signed";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{event, at, ...payload}` to a configured webhook
///
/// Delivery is fire-and-forget: it runs on its own task and failures are
/// only logged.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    client: Client,
    url: Option<String>,
}

impl EventNotifier {
    pub fn new(url: Option<String>) -> Self {
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn emit(&self, event: &'static str, payload: Value) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let body = envelope(event, payload);
        let client = self.client.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(event, "Webhook delivered");
                }
                Ok(resp) => {
                    tracing::warn!(event, status = resp.status().as_u16(), "Webhook rejected event");
                }
                Err(e) => {
                    tracing::warn!(event, error = %e, "Webhook POST failed");
                }
            }
        });
    }
}

/// Merge the event name and timestamp with the payload's own fields
pub fn envelope(event: &str, payload: Value) -> Value {
    let mut body = Map::new();
    body.insert("event".to_string(), Value::String(event.to_string()));
    body.insert(
        "at".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    match payload {
        Value::Object(fields) => {
            for (key, value) in fields {
                if value.is_null() {
                    continue;
                }
                body.insert(key, value);
            }
        }
        Value::Null => {}
        other => {
            body.insert("data".to_string(), other);
        }
    }
    Value::Object(body)
}
