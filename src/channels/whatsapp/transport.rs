//! The seam between the session state machine and the external protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Long-lived credential identifying this process as a paired device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCredential {
    pub device_id: String,
    /// Opaque secret issued by the transport when pairing succeeds.
    pub secret: String,
    pub paired_at: DateTime<Utc>,
}

/// Something that happened on the transport, delivered to the session listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The pending pairing code was scanned; carries the new device credential.
    PairSuccess(DeviceCredential),
    /// The live session dropped. The stored credential is still valid.
    Disconnected { reason: String },
    /// The device was unlinked remotely. The stored credential is revoked.
    LoggedOut,
}

/// Protocol driver for a paired-device messaging service.
///
/// Only the session listener calls `next_event`.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Request a fresh pairing code for linking a new device.
    async fn request_pairing(&self) -> Result<String, SessionError>;

    /// Open a live session with a stored credential.
    async fn connect(&self, credential: &DeviceCredential) -> Result<(), SessionError>;

    /// Deliver a text message to a user JID over the live session.
    async fn send_text(&self, jid: &str, text: &str) -> Result<(), SessionError>;

    /// Wait for the next event. `Ok(None)` means nothing arrived this round.
    async fn next_event(&self) -> Result<Option<SessionEvent>, SessionError>;
}
