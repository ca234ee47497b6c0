//! Session lifecycle for the WhatsApp channel.
//!
//! ```text
//! Disconnected ──start()──▶ AwaitingPairing ──pair success──▶ Paired ──connect──▶ Connected
//!      ▲  └──stored credential──────────────────────────────────────────────────▶ │
//!      └──────────────────────────── disconnect event ◀────────────────────────────┘
//! ```
//!
//! One instance exists per process. State changes and sends are serialized by
//! separate tokio mutexes, and a single listener task consumes transport events.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;

use crate::channels::whatsapp::{
    CredentialStore, DeviceCredential, SessionEvent, SessionTransport, render_pairing_code,
};
use crate::channels::{ChannelConnector, ChannelKind};
use crate::config::WhatsAppConfig;
use crate::error::{ChannelError, SessionError};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Pause after an empty event poll.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(250);

/// Phone numbers in international format without the leading `+`.
static PHONE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{8,15}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    AwaitingPairing {
        code: String,
        issued_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    },
    Paired,
    Connected,
}

/// Snapshot of the session for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub state: SessionState,
    pub reconnect_attempts: u64,
}

pub struct WhatsAppChannel {
    transport: Arc<dyn SessionTransport>,
    credentials: CredentialStore,
    pairing_file: PathBuf,
    pairing_timeout: Duration,
    state: Mutex<SessionState>,
    /// Held for the whole of a pairing or connect sequence.
    transition: Mutex<()>,
    send_lock: Mutex<()>,
    init: OnceCell<()>,
    reconnect_attempts: AtomicU64,
}

impl WhatsAppChannel {
    pub fn new(transport: Arc<dyn SessionTransport>, config: &WhatsAppConfig) -> Self {
        Self {
            transport,
            credentials: CredentialStore::new(config.credential_path.clone()),
            pairing_file: config.pairing_file.clone(),
            pairing_timeout: config.pairing_timeout,
            state: Mutex::new(SessionState::Disconnected),
            transition: Mutex::new(()),
            send_lock: Mutex::new(()),
            init: OnceCell::new(),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state().await,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.lock().await == SessionState::Connected
    }

    /// Initialize the session exactly once.
    ///
    /// Concurrent callers wait for the first initialization. Fails only when
    /// the credential store is unusable; transport trouble is left for the
    /// listener to retry.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.init
            .get_or_try_init(|| async {
                self.credentials.ensure_usable().await?;
                if let Err(e) = self.establish().await {
                    tracing::warn!(error = %e, "WhatsApp session not established at startup");
                }
                Ok::<(), SessionError>(())
            })
            .await
            .map(|_| ())
    }

    /// From `Disconnected`, connect with the stored credential or begin pairing.
    async fn establish(&self) -> Result<(), SessionError> {
        let _transition = self.transition.lock().await;
        if *self.state.lock().await != SessionState::Disconnected {
            return Ok(());
        }

        match self.credentials.load().await? {
            Some(credential) => self.connect_with(&credential).await,
            None => self.begin_pairing().await,
        }
    }

    async fn connect_with(&self, credential: &DeviceCredential) -> Result<(), SessionError> {
        match self.transport.connect(credential).await {
            Ok(()) => {
                self.set_state(SessionState::Connected).await;
                tracing::info!(device_id = %credential.device_id, "WhatsApp session connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected).await;
                Err(e)
            }
        }
    }

    async fn begin_pairing(&self) -> Result<(), SessionError> {
        let code = self.transport.request_pairing().await?;
        let issued_at = Utc::now();
        let deadline = issued_at
            + chrono::Duration::from_std(self.pairing_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        match render_pairing_code(&code) {
            Ok(qr) => {
                tracing::info!(
                    %deadline,
                    pairing_file = %self.pairing_file.display(),
                    "WhatsApp pairing required, scan this code to link the device:\n{}",
                    qr.terminal
                );
                if let Err(e) = tokio::fs::write(&self.pairing_file, qr.svg).await {
                    tracing::warn!(error = %e, "Could not write WhatsApp pairing file");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not render WhatsApp pairing code as QR");
                tracing::info!(%deadline, "WhatsApp pairing required, link this device with code: {code}");
            }
        }

        self.set_state(SessionState::AwaitingPairing {
            code,
            issued_at,
            deadline,
        })
        .await;
        Ok(())
    }

    /// Replace an expired pairing code with a fresh one.
    pub async fn refresh_pairing(&self) -> Result<(), SessionError> {
        let _transition = self.transition.lock().await;
        if !matches!(*self.state.lock().await, SessionState::AwaitingPairing { .. }) {
            return Ok(());
        }

        tracing::info!("WhatsApp pairing code expired, requesting a new one");
        if let Err(e) = self.begin_pairing().await {
            self.set_state(SessionState::Disconnected).await;
            return Err(e);
        }
        Ok(())
    }

    /// Time left on the current pairing code, if one is pending.
    pub async fn pairing_remaining(&self) -> Option<Duration> {
        match &*self.state.lock().await {
            SessionState::AwaitingPairing { deadline, .. } => {
                Some((*deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
            _ => None,
        }
    }

    /// Apply a transport event to the state machine.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::PairSuccess(credential) => self.on_pair_success(credential).await,
            SessionEvent::Disconnected { reason } => self.on_disconnect(&reason, false).await,
            SessionEvent::LoggedOut => self.on_disconnect("logged out", true).await,
        }
    }

    async fn on_pair_success(&self, credential: DeviceCredential) {
        let _transition = self.transition.lock().await;
        if !matches!(*self.state.lock().await, SessionState::AwaitingPairing { .. }) {
            tracing::debug!("Ignoring pair success outside of pairing");
            return;
        }

        if let Err(e) = self.credentials.save(&credential).await {
            tracing::error!(error = %e, "Failed to persist WhatsApp device credential");
            return;
        }
        match tokio::fs::remove_file(&self.pairing_file).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                tracing::debug!(error = %e, "Could not remove WhatsApp pairing file");
            }
            _ => {}
        }

        self.set_state(SessionState::Paired).await;
        tracing::info!(device_id = %credential.device_id, "WhatsApp device paired");

        if let Err(e) = self.connect_with(&credential).await {
            tracing::warn!(error = %e, "WhatsApp connect after pairing failed");
        }
    }

    async fn on_disconnect(&self, reason: &str, revoked: bool) {
        {
            let _transition = self.transition.lock().await;
            let mut state = self.state.lock().await;

            if revoked {
                if let Err(e) = self.credentials.clear().await {
                    tracing::error!(error = %e, "Failed to clear revoked WhatsApp credential");
                }
            } else if !matches!(*state, SessionState::Connected | SessionState::Paired) {
                tracing::debug!(reason, "Ignoring disconnect while not connected");
                return;
            }

            *state = SessionState::Disconnected;
            tracing::warn!(reason, revoked, "WhatsApp session disconnected");
        }

        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.establish().await {
            tracing::warn!(error = %e, "WhatsApp reconnect failed, listener will retry");
        }
    }

    async fn set_state(&self, next: SessionState) {
        *self.state.lock().await = next;
    }
}

/// Normalize a phone number into a user JID.
fn to_jid(destination: &str) -> Result<String, ChannelError> {
    let number = destination.trim();
    let number = number.strip_prefix('+').unwrap_or(number);
    if !PHONE_NUMBER.is_match(number) {
        return Err(ChannelError::InvalidDestination {
            name: ChannelKind::WhatsApp.to_string(),
            destination: destination.to_string(),
        });
    }
    Ok(format!("{number}@s.whatsapp.net"))
}

#[async_trait]
impl ChannelConnector for WhatsAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), ChannelError> {
        let _send = self.send_lock.lock().await;

        if !self.is_connected().await {
            return Err(ChannelError::NotConnected {
                name: ChannelKind::WhatsApp.to_string(),
            });
        }
        let jid = to_jid(destination)?;

        self.transport
            .send_text(&jid, text)
            .await
            .map_err(|e| ChannelError::TransportFailure {
                name: ChannelKind::WhatsApp.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Run the event listener for the life of the process.
///
/// Re-establishes the session with backoff whenever it falls back to
/// `Disconnected`, and rotates the pairing code when its deadline passes.
pub fn spawn_session_listener(channel: Arc<WhatsAppChannel>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("WhatsApp session listener started");
        let mut backoff = INITIAL_BACKOFF;
        // The in-flight poll survives pairing deadlines; dropping it could
        // lose an event the bridge has already handed over.
        let mut poll = None;

        loop {
            if channel.state().await == SessionState::Disconnected {
                if let Err(e) = channel.establish().await {
                    tracing::warn!(error = %e, retry_in = ?backoff, "WhatsApp session unavailable");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
                backoff = INITIAL_BACKOFF;
            }

            let remaining = channel.pairing_remaining().await;
            let events = poll.get_or_insert_with(|| channel.transport.next_event());
            let next = match remaining {
                Some(remaining) => tokio::select! {
                    next = events => next,
                    () = tokio::time::sleep(remaining) => {
                        if let Err(e) = channel.refresh_pairing().await {
                            tracing::warn!(error = %e, "WhatsApp pairing refresh failed");
                        }
                        continue;
                    }
                },
                None => events.await,
            };
            poll = None;

            match next {
                Ok(Some(event)) => {
                    tracing::debug!(?event, "WhatsApp session event");
                    channel.handle_event(event).await;
                }
                Ok(None) => tokio::time::sleep(IDLE_POLL_DELAY).await,
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "WhatsApp event poll failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    })
}
