//! `SessionTransport` over an HTTP pairing bridge.
//!
//! The bridge owns the WhatsApp multi-device protocol and exposes:
//!
//! - `POST /pair` → `{"code": "..."}`
//! - `POST /connect` with `{"device_id", "secret"}`
//! - `POST /send` with `{"jid", "text"}`
//! - `GET /events?timeout=<secs>` → `{"events": [...]}` (long poll)

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::channels::whatsapp::{DeviceCredential, SessionEvent, SessionTransport};
use crate::error::SessionError;

/// Server-side hold time for one `/events` long poll.
const POLL_TIMEOUT_SECS: u64 = 30;

pub struct HttpBridgeTransport {
    base_url: String,
    client: reqwest::Client,
    pending: Mutex<VecDeque<SessionEvent>>,
}

#[derive(Deserialize)]
struct PairResponse {
    code: String,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<BridgeEvent>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    PairSuccess { device_id: String, secret: String },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    LoggedOut,
    #[serde(other)]
    Unknown,
}

impl BridgeEvent {
    fn into_session_event(self) -> Option<SessionEvent> {
        match self {
            Self::PairSuccess { device_id, secret } => {
                Some(SessionEvent::PairSuccess(DeviceCredential {
                    device_id,
                    secret,
                    paired_at: chrono::Utc::now(),
                }))
            }
            Self::Disconnected { reason } => Some(SessionEvent::Disconnected { reason }),
            Self::LoggedOut => Some(SessionEvent::LoggedOut),
            Self::Unknown => None,
        }
    }
}

impl HttpBridgeTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, SessionError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SessionError::Transport(format!("{path}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SessionError::Transport(format!(
                "{path} returned {status}: {text}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl SessionTransport for HttpBridgeTransport {
    async fn request_pairing(&self) -> Result<String, SessionError> {
        let resp = self.post_json("pair", &serde_json::json!({})).await?;
        let body: PairResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::Transport(format!("pair: bad response: {e}")))?;
        Ok(body.code)
    }

    async fn connect(&self, credential: &DeviceCredential) -> Result<(), SessionError> {
        self.post_json(
            "connect",
            &serde_json::json!({
                "device_id": credential.device_id,
                "secret": credential.secret,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError> {
        self.post_json("send", &serde_json::json!({ "jid": jid, "text": text }))
            .await
            .map(|_| ())
    }

    async fn next_event(&self) -> Result<Option<SessionEvent>, SessionError> {
        if let Some(event) = self.pending.lock().await.pop_front() {
            return Ok(Some(event));
        }

        let resp = self
            .client
            .get(self.url("events"))
            .query(&[("timeout", POLL_TIMEOUT_SECS)])
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await
            .map_err(|e| SessionError::Transport(format!("events: {e}")))?;

        if !resp.status().is_success() {
            return Err(SessionError::Transport(format!(
                "events returned {}",
                resp.status()
            )));
        }

        let body: EventsResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::Transport(format!("events: bad response: {e}")))?;

        let mut pending = self.pending.lock().await;
        pending.extend(
            body.events
                .into_iter()
                .filter_map(BridgeEvent::into_session_event),
        );
        Ok(pending.pop_front())
    }
}
