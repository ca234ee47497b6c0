//! WhatsApp channel: a paired-device session with a long-lived event listener.

pub mod bridge;
pub mod credential;
pub mod pairing;
pub mod session;
pub mod transport;

pub use bridge::HttpBridgeTransport;
pub use credential::CredentialStore;
pub use pairing::{PairingQr, render_pairing_code};
pub use session::{SessionState, SessionStatus, WhatsAppChannel, spawn_session_listener};
pub use transport::{DeviceCredential, SessionEvent, SessionTransport};
