//! Outbound notification channels.

pub mod connector;
pub mod telegram;
pub mod whatsapp;

pub use connector::{ChannelConnector, ChannelKind, ChannelManager};
pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;
